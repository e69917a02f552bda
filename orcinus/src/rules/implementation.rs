//! Implementation rules of unary and leaf operators.
use anyhow::bail;

use crate::error::{OptResult, OptimizerError};
use crate::operator::LogicalOperator::{
    LogicalGbAgg, LogicalGet, LogicalLimit, LogicalProject, LogicalSelect,
};
use crate::operator::Operator::{Logical, Physical};
use crate::operator::PhysicalOperator::{
    PhysicalComputeScalar, PhysicalFilter, PhysicalHashAgg, PhysicalLimit, PhysicalStreamAgg,
    PhysicalTableScan,
};
use crate::operator::{LogicalOperator, PhysicalOperator};
use crate::optimizer::Optimizer;
use crate::rules::RulePromise::{High, Medium};
use crate::rules::{OptExpression, Pattern, Rule, RuleId, RulePromise, RuleResult};

#[rustfmt::skip::macros(lazy_static)]
lazy_static! {
    static ref GET_TO_TABLE_SCAN_RULE_PATTERN: Pattern = {
        Pattern::new_leaf(|op| matches!(op, Logical(LogicalGet(_))))
    };
    static ref SELECT_TO_FILTER_RULE_PATTERN: Pattern = {
        Pattern::new_leaf(|op| matches!(op, Logical(LogicalSelect(_))))
    };
    static ref PROJECT_TO_COMPUTE_SCALAR_RULE_PATTERN: Pattern = {
        Pattern::new_leaf(|op| matches!(op, Logical(LogicalProject(_))))
    };
    static ref GB_AGG_RULE_PATTERN: Pattern = {
        Pattern::new_leaf(|op| matches!(op, Logical(LogicalGbAgg(_))))
    };
    static ref LIMIT_RULE_PATTERN: Pattern = {
        Pattern::new_leaf(|op| matches!(op, Logical(LogicalLimit(_))))
    };
}

/// Replaces the logical operator of `input` with its physical counterpart, keeping inputs.
fn implement<O, F>(
    input: &OptExpression<O>,
    optimizer: &O,
    rule: RuleId,
    result: &mut RuleResult<O>,
    f: F,
) -> OptResult<()>
where
    O: Optimizer,
    F: Fn(&LogicalOperator) -> Option<PhysicalOperator>,
{
    match input.get_operator(optimizer)? {
        Logical(op) => match f(op) {
            Some(physical) => {
                result.add(input.clone_with_inputs(Physical(physical)));
                Ok(())
            }
            None => bail!(OptimizerError::PatternMismatch(rule.as_ref().to_string())),
        },
        Physical(_) => bail!(OptimizerError::PatternMismatch(rule.as_ref().to_string())),
    }
}

/// Table scan implementation rule.
#[derive(Clone)]
pub struct Get2TableScanRule {}

impl Get2TableScanRule {
    pub fn new() -> Self {
        Self {}
    }
}

impl Rule for Get2TableScanRule {
    fn apply<O: Optimizer>(
        &self,
        input: OptExpression<O>,
        optimizer: &O,
        result: &mut RuleResult<O>,
    ) -> OptResult<()> {
        implement(&input, optimizer, self.rule_id(), result, |op| match op {
            LogicalGet(get) => Some(PhysicalTableScan(get.clone())),
            _ => None,
        })
    }

    fn pattern(&self) -> &Pattern {
        &GET_TO_TABLE_SCAN_RULE_PATTERN
    }

    fn rule_id(&self) -> RuleId {
        RuleId::Get2TableScan
    }

    fn promise<O: Optimizer>(&self, _expr: O::ExprHandle, _optimizer: &O) -> OptResult<RulePromise> {
        Ok(High)
    }
}

#[derive(Clone)]
pub struct Select2FilterRule {}

impl Select2FilterRule {
    pub fn new() -> Self {
        Self {}
    }
}

impl Rule for Select2FilterRule {
    fn apply<O: Optimizer>(
        &self,
        input: OptExpression<O>,
        optimizer: &O,
        result: &mut RuleResult<O>,
    ) -> OptResult<()> {
        implement(&input, optimizer, self.rule_id(), result, |op| match op {
            LogicalSelect(select) => Some(PhysicalFilter(select.clone())),
            _ => None,
        })
    }

    fn pattern(&self) -> &Pattern {
        &SELECT_TO_FILTER_RULE_PATTERN
    }

    fn rule_id(&self) -> RuleId {
        RuleId::Select2Filter
    }

    fn promise<O: Optimizer>(&self, _expr: O::ExprHandle, _optimizer: &O) -> OptResult<RulePromise> {
        Ok(High)
    }
}

#[derive(Clone)]
pub struct Project2ComputeScalarRule {}

impl Project2ComputeScalarRule {
    pub fn new() -> Self {
        Self {}
    }
}

impl Rule for Project2ComputeScalarRule {
    fn apply<O: Optimizer>(
        &self,
        input: OptExpression<O>,
        optimizer: &O,
        result: &mut RuleResult<O>,
    ) -> OptResult<()> {
        implement(&input, optimizer, self.rule_id(), result, |op| match op {
            LogicalProject(project) => Some(PhysicalComputeScalar(project.clone())),
            _ => None,
        })
    }

    fn pattern(&self) -> &Pattern {
        &PROJECT_TO_COMPUTE_SCALAR_RULE_PATTERN
    }

    fn rule_id(&self) -> RuleId {
        RuleId::Project2ComputeScalar
    }

    fn promise<O: Optimizer>(&self, _expr: O::ExprHandle, _optimizer: &O) -> OptResult<RulePromise> {
        Ok(High)
    }
}

#[derive(Clone)]
pub struct GbAgg2HashAggRule {}

impl GbAgg2HashAggRule {
    pub fn new() -> Self {
        Self {}
    }
}

impl Rule for GbAgg2HashAggRule {
    fn apply<O: Optimizer>(
        &self,
        input: OptExpression<O>,
        optimizer: &O,
        result: &mut RuleResult<O>,
    ) -> OptResult<()> {
        implement(&input, optimizer, self.rule_id(), result, |op| match op {
            LogicalGbAgg(agg) => Some(PhysicalHashAgg(agg.clone())),
            _ => None,
        })
    }

    fn pattern(&self) -> &Pattern {
        &GB_AGG_RULE_PATTERN
    }

    fn rule_id(&self) -> RuleId {
        RuleId::GbAgg2HashAgg
    }

    fn promise<O: Optimizer>(&self, _expr: O::ExprHandle, _optimizer: &O) -> OptResult<RulePromise> {
        Ok(High)
    }
}

/// Stream aggregation, its input is sorted on grouping columns.
#[derive(Clone)]
pub struct GbAgg2StreamAggRule {}

impl GbAgg2StreamAggRule {
    pub fn new() -> Self {
        Self {}
    }
}

impl Rule for GbAgg2StreamAggRule {
    fn apply<O: Optimizer>(
        &self,
        input: OptExpression<O>,
        optimizer: &O,
        result: &mut RuleResult<O>,
    ) -> OptResult<()> {
        implement(&input, optimizer, self.rule_id(), result, |op| match op {
            LogicalGbAgg(agg) => Some(PhysicalStreamAgg(agg.clone())),
            _ => None,
        })
    }

    fn pattern(&self) -> &Pattern {
        &GB_AGG_RULE_PATTERN
    }

    fn rule_id(&self) -> RuleId {
        RuleId::GbAgg2StreamAgg
    }

    fn promise<O: Optimizer>(&self, _expr: O::ExprHandle, _optimizer: &O) -> OptResult<RulePromise> {
        Ok(Medium)
    }
}

#[derive(Clone)]
pub struct Limit2LimitRule {}

impl Limit2LimitRule {
    pub fn new() -> Self {
        Self {}
    }
}

impl Rule for Limit2LimitRule {
    fn apply<O: Optimizer>(
        &self,
        input: OptExpression<O>,
        optimizer: &O,
        result: &mut RuleResult<O>,
    ) -> OptResult<()> {
        implement(&input, optimizer, self.rule_id(), result, |op| match op {
            LogicalLimit(limit) => Some(PhysicalLimit(limit.clone())),
            _ => None,
        })
    }

    fn pattern(&self) -> &Pattern {
        &LIMIT_RULE_PATTERN
    }

    fn rule_id(&self) -> RuleId {
        RuleId::Limit2Limit
    }

    fn promise<O: Optimizer>(&self, _expr: O::ExprHandle, _optimizer: &O) -> OptResult<RulePromise> {
        Ok(High)
    }
}
