use std::fmt::{Display, Formatter};

use anyhow::anyhow;
use enum_as_inner::EnumAsInner;
use enum_dispatch::enum_dispatch;
use enumset::EnumSet;
use strum_macros::AsRefStr;

use crate::error::OptResult;
use crate::operator::{Apply, DisplayFields, GbAgg, Get, Join, Limit, Project, Select};
use crate::optimizer::OptimizerContext;
use crate::properties::LogicalProperty;
use crate::rules::RuleId;
use crate::stat::{StatPromise, Statistics};

/// Logical relational operator.
#[derive(Clone, Debug, Hash, Eq, PartialEq, EnumAsInner, AsRefStr)]
#[enum_dispatch]
pub enum LogicalOperator {
    LogicalGet(Get),
    LogicalSelect(Select),
    LogicalProject(Project),
    LogicalJoin(Join),
    LogicalApply(Apply),
    LogicalGbAgg(GbAgg),
    LogicalLimit(Limit),
}

impl Display for LogicalOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())?;
        self.display(f)
    }
}

/// Inputs of logical property and statistics derivation.
pub struct DeriveContext<'a> {
    pub optimizer_context: &'a OptimizerContext,
    pub input_props: &'a [&'a LogicalProperty],
    /// Empty when only logical properties are derived.
    pub input_stats: &'a [&'a Statistics],
}

impl<'a> DeriveContext<'a> {
    pub fn input_prop(&self, idx: usize) -> OptResult<&'a LogicalProperty> {
        self.input_props
            .get(idx)
            .copied()
            .ok_or_else(|| anyhow!("Logical property of input {} not found", idx))
    }

    pub fn input_stat(&self, idx: usize) -> OptResult<&'a Statistics> {
        self.input_stats
            .get(idx)
            .copied()
            .ok_or_else(|| anyhow!("Statistics of input {} not found", idx))
    }
}

#[enum_dispatch(LogicalOperator)]
pub trait LogicalOperatorTrait {
    /// Derives logical property from properties of inputs.
    fn derive_logical_prop(&self, context: &DeriveContext) -> OptResult<LogicalProperty>;

    /// Derives statistics from statistics of inputs.
    fn derive_statistics(
        &self,
        context: &DeriveContext,
        logical_prop: &LogicalProperty,
    ) -> OptResult<Statistics>;

    /// How much statistics derived from this operator can be trusted among equivalent
    /// expressions.
    fn stat_promise(&self) -> StatPromise {
        StatPromise::Medium
    }

    /// Rules which may apply to this operator.
    fn candidate_rules(&self) -> EnumSet<RuleId>;
}
