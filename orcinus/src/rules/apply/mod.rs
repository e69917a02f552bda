//! Rules turning apply into join.
//!
//! An apply evaluates its inner child once per row of its outer child. When the correlated
//! predicates of the inner child can be pulled up, the apply is equivalent to a join of the
//! same kind whose predicate includes the pulled predicates. Otherwise the apply is marked as
//! correlated, and implemented by a correlated nested loop join.
mod decorrelator;

use anyhow::bail;
use datafusion::prelude::lit;
use datafusion::optimizer::utils::conjunction;
use log::debug;

use crate::error::{OptResult, OptimizerError};
use crate::operator::LogicalOperator::{LogicalApply, LogicalGbAgg, LogicalJoin, LogicalProject};
use crate::operator::Operator::{Logical, Physical};
use crate::operator::PhysicalOperator::PhysicalCorrelatedNLJoin;
use crate::operator::{Apply, ApplyKind, GbAgg, Join, JoinKind, Project};
use crate::optimizer::{OptExpr, OptGroup, Optimizer};
use crate::properties::LogicalProperty;
use crate::rules::apply::decorrelator::Decorrelator;
use crate::rules::RulePromise::{High, Low, Medium};
use crate::rules::{
    pattern, OptExpression, Pattern, PatternBuilder, Rule, RuleId, RulePromise, RuleResult,
};
use crate::Expr;

#[rustfmt::skip::macros(lazy_static)]
lazy_static! {
    static ref APPLY_TO_JOIN_RULE_PATTERN: Pattern = {
        pattern(|op| matches!(op, Logical(LogicalApply(_))))
        .any_leaf()
        .tree()
        .finish()
    };
    static ref APPLY_NO_CORRELATIONS_RULE_PATTERN: Pattern = {
        pattern(|op| matches!(op, Logical(LogicalApply(_))))
        .finish()
    };
    static ref CORRELATED_APPLY_RULE_PATTERN: Pattern = {
        Pattern::new_leaf(|op| match op {
            Logical(LogicalApply(apply)) => apply.is_correlated(),
            _ => false,
        })
    };
}

fn apply_of<'a, O: Optimizer>(
    input: &'a OptExpression<O>,
    optimizer: &'a O,
    rule: RuleId,
) -> OptResult<&'a Apply> {
    match input.get_operator(optimizer)? {
        Logical(LogicalApply(apply)) => Ok(apply),
        _ => bail!(OptimizerError::PatternMismatch(rule.as_ref().to_string())),
    }
}

/// Apply of `expr` with logical properties of its outer and inner groups.
fn apply_with_inputs<O: Optimizer>(
    expr: O::ExprHandle,
    optimizer: &O,
) -> Option<(&Apply, &LogicalProperty, &LogicalProperty)> {
    let expr = optimizer.expr_at(expr);
    match expr.operator() {
        Logical(LogicalApply(apply)) if expr.inputs_len() == 2 => Some((
            apply,
            optimizer.group_at(expr.input_at(0)).logical_prop(),
            optimizer.group_at(expr.input_at(1)).logical_prop(),
        )),
        _ => None,
    }
}

/// Conjunction of the apply predicate and pulled up correlations.
fn join_predicate(apply: &Apply, correlations: Vec<Expr>) -> Expr {
    let mut conjuncts = Vec::with_capacity(correlations.len() + 1);
    if apply.predicate() != &lit(true) {
        conjuncts.push(apply.predicate().clone());
    }
    conjuncts.extend(correlations);
    conjunction(conjuncts).unwrap_or_else(|| lit(true))
}

/// Kinds which also have a rule for inner children without outer references.
fn has_no_correlations_rule(kind: ApplyKind) -> bool {
    matches!(
        kind,
        ApplyKind::LeftSemi | ApplyKind::LeftSemiIn | ApplyKind::LeftAntiSemi
    )
}

/// Decorrelates an apply of one kind into a join of the corresponding kind.
#[derive(Clone)]
pub struct Apply2JoinRule {
    kind: ApplyKind,
    rule_id: RuleId,
}

impl Apply2JoinRule {
    pub fn new(kind: ApplyKind) -> Self {
        let rule_id = match kind {
            ApplyKind::Inner => RuleId::InnerApply2InnerJoin,
            ApplyKind::LeftOuter => RuleId::LeftOuterApply2LeftOuterJoin,
            ApplyKind::LeftSemi => RuleId::LeftSemiApply2LeftSemiJoin,
            ApplyKind::LeftSemiIn => RuleId::LeftSemiApplyIn2LeftSemiJoin,
            ApplyKind::LeftAntiSemi => RuleId::LeftAntiSemiApply2LeftAntiSemiJoin,
            ApplyKind::LeftAntiSemiNotIn => RuleId::LeftAntiSemiApplyNotIn2LeftAntiSemiJoinNotIn,
        };
        Self { kind, rule_id }
    }

    pub fn kind(&self) -> ApplyKind {
        self.kind
    }
}

impl Rule for Apply2JoinRule {
    fn apply<O: Optimizer>(
        &self,
        input: OptExpression<O>,
        optimizer: &O,
        result: &mut RuleResult<O>,
    ) -> OptResult<()> {
        let apply = apply_of(&input, optimizer, self.rule_id)?;
        let outer = input.input(0, self.rule_id.as_ref())?;
        let inner = input.input(1, self.rule_id.as_ref())?;

        if apply.allows_decorrelation() {
            match Decorrelator::new(optimizer, None).decorrelate(inner, false)? {
                Some(decorrelated) => {
                    let join_kind = self.kind.join_kind();
                    let join = OptExpression::with_operator(
                        Logical(LogicalJoin(Join::new(
                            join_kind,
                            join_predicate(apply, decorrelated.correlations),
                        ))),
                        vec![outer.clone(), decorrelated.expr],
                    );

                    if join_kind.outputs_inner() && !decorrelated.added_columns.is_empty() {
                        // Columns added for decorrelation are not part of apply's output.
                        let exprs: Vec<Expr> = input
                            .logical_prop(optimizer)?
                            .schema()
                            .fields()
                            .iter()
                            .map(|f| Expr::Column(f.qualified_column()))
                            .collect();
                        result.add(OptExpression::with_operator(
                            Logical(LogicalProject(Project::new(exprs))),
                            vec![join],
                        ));
                    } else {
                        result.add(join);
                    }
                }
                None => debug!("Failed to decorrelate {:?}", apply),
            }
        }

        if !apply.is_correlated() {
            let inner_group = OptExpression::with_group_handle(inner.group_handle(optimizer)?);
            result.add(OptExpression::with_operator(
                Logical(LogicalApply(apply.clone().into_correlated())),
                vec![outer.clone(), inner_group],
            ));
        }
        Ok(())
    }

    fn pattern(&self) -> &Pattern {
        &APPLY_TO_JOIN_RULE_PATTERN
    }

    fn rule_id(&self) -> RuleId {
        self.rule_id
    }

    fn promise<O: Optimizer>(&self, expr: O::ExprHandle, optimizer: &O) -> OptResult<RulePromise> {
        let (apply, _, inner) = match apply_with_inputs(expr, optimizer) {
            Some(found) => found,
            None => return Ok(RulePromise::None),
        };
        if apply.kind() != self.kind || apply.is_correlated() {
            return Ok(RulePromise::None);
        }
        if has_no_correlations_rule(self.kind) && !inner.has_outer_refs() {
            return Ok(RulePromise::None);
        }

        if apply.allows_decorrelation() {
            Ok(Medium)
        } else {
            Ok(Low)
        }
    }
}

/// Turns an apply whose inner child has no outer references into a join directly.
#[derive(Clone)]
pub struct Apply2JoinNoCorrelationsRule {
    kind: ApplyKind,
    rule_id: RuleId,
}

impl Apply2JoinNoCorrelationsRule {
    /// Returns `None` for kinds without such a rule.
    pub fn new(kind: ApplyKind) -> Option<Self> {
        let rule_id = match kind {
            ApplyKind::LeftSemi => RuleId::LeftSemiApply2LeftSemiJoinNoCorrelations,
            ApplyKind::LeftSemiIn => RuleId::LeftSemiApplyIn2LeftSemiJoinNoCorrelations,
            ApplyKind::LeftAntiSemi => RuleId::LeftAntiSemiApply2LeftAntiSemiJoinNoCorrelations,
            _ => return None,
        };
        Some(Self { kind, rule_id })
    }
}

impl Rule for Apply2JoinNoCorrelationsRule {
    fn apply<O: Optimizer>(
        &self,
        input: OptExpression<O>,
        optimizer: &O,
        result: &mut RuleResult<O>,
    ) -> OptResult<()> {
        let apply = apply_of(&input, optimizer, self.rule_id)?;
        result.add(input.clone_with_inputs(Logical(LogicalJoin(Join::new(
            self.kind.join_kind(),
            apply.predicate().clone(),
        )))));
        Ok(())
    }

    fn pattern(&self) -> &Pattern {
        &APPLY_NO_CORRELATIONS_RULE_PATTERN
    }

    fn rule_id(&self) -> RuleId {
        self.rule_id
    }

    fn promise<O: Optimizer>(&self, expr: O::ExprHandle, optimizer: &O) -> OptResult<RulePromise> {
        match apply_with_inputs(expr, optimizer) {
            Some((apply, _, inner))
                if apply.kind() == self.kind
                    && !apply.is_correlated()
                    && apply.allows_decorrelation()
                    && !inner.has_outer_refs() =>
            {
                Ok(High)
            }
            _ => Ok(RulePromise::None),
        }
    }
}

/// Semi apply whose inner child also references columns produced outside of the apply.
///
/// Correlations to the outer child become predicates of an inner join, and duplicates the join
/// produces are removed by grouping on the outer columns:
/// ```no
/// LeftSemiApply                       GbAgg(outer columns)
///  |-- outer                           |-- InnerJoin(correlations)
///  |-- inner(outer refs, external)          |-- outer
///                                           |-- inner'(external)
/// ```
#[derive(Clone)]
pub struct LeftSemiApplyWithExternalCorrs2InnerJoinRule {}

impl LeftSemiApplyWithExternalCorrs2InnerJoinRule {
    pub fn new() -> Self {
        Self {}
    }
}

impl Rule for LeftSemiApplyWithExternalCorrs2InnerJoinRule {
    fn apply<O: Optimizer>(
        &self,
        input: OptExpression<O>,
        optimizer: &O,
        result: &mut RuleResult<O>,
    ) -> OptResult<()> {
        let apply = apply_of(&input, optimizer, self.rule_id())?;
        let outer = input.input(0, self.rule_id().as_ref())?;
        let inner = input.input(1, self.rule_id().as_ref())?;
        let outer_prop = outer.logical_prop(optimizer)?;

        let decorrelated = match Decorrelator::new(optimizer, Some(outer_prop.output_columns()))
            .decorrelate(inner, false)?
        {
            Some(decorrelated) => decorrelated,
            None => {
                debug!("External correlations of {:?} can't be separated", apply);
                return Ok(());
            }
        };

        let join = OptExpression::with_operator(
            Logical(LogicalJoin(Join::new(
                JoinKind::Inner,
                join_predicate(apply, decorrelated.correlations),
            ))),
            vec![outer.clone(), decorrelated.expr],
        );
        let group_by = outer_prop
            .schema()
            .fields()
            .iter()
            .map(|f| f.qualified_column())
            .collect();
        result.add(OptExpression::with_operator(
            Logical(LogicalGbAgg(GbAgg::new(group_by, vec![]))),
            vec![join],
        ));
        Ok(())
    }

    fn pattern(&self) -> &Pattern {
        &APPLY_TO_JOIN_RULE_PATTERN
    }

    fn rule_id(&self) -> RuleId {
        RuleId::LeftSemiApplyWithExternalCorrs2InnerJoin
    }

    fn promise<O: Optimizer>(&self, expr: O::ExprHandle, optimizer: &O) -> OptResult<RulePromise> {
        match apply_with_inputs(expr, optimizer) {
            Some((apply, outer, inner))
                if apply.kind() == ApplyKind::LeftSemi
                    && !apply.is_correlated()
                    && apply.allows_decorrelation()
                    && !inner.outer_refs().is_subset(outer.output_columns())
                    && !outer.keys().is_empty() =>
            {
                Ok(Medium)
            }
            _ => Ok(RulePromise::None),
        }
    }
}

/// Implements correlated apply as correlated nested loop join.
#[derive(Clone)]
pub struct CorrelatedApply2CorrelatedNLJoinRule {}

impl CorrelatedApply2CorrelatedNLJoinRule {
    pub fn new() -> Self {
        Self {}
    }
}

impl Rule for CorrelatedApply2CorrelatedNLJoinRule {
    fn apply<O: Optimizer>(
        &self,
        input: OptExpression<O>,
        optimizer: &O,
        result: &mut RuleResult<O>,
    ) -> OptResult<()> {
        let apply = apply_of(&input, optimizer, self.rule_id())?;
        result.add(input.clone_with_inputs(Physical(PhysicalCorrelatedNLJoin(apply.clone()))));
        Ok(())
    }

    fn pattern(&self) -> &Pattern {
        &CORRELATED_APPLY_RULE_PATTERN
    }

    fn rule_id(&self) -> RuleId {
        RuleId::CorrelatedApply2CorrelatedNLJoin
    }

    fn promise<O: Optimizer>(&self, expr: O::ExprHandle, optimizer: &O) -> OptResult<RulePromise> {
        match optimizer.expr_at(expr).operator() {
            Logical(LogicalApply(apply)) if apply.is_correlated() => Ok(High),
            _ => Ok(RulePromise::None),
        }
    }
}

#[cfg(test)]
mod tests {
    use datafusion::prelude::{col, count, lit};
    use datafusion_common::Column;

    use crate::cascades::Memo;
    use crate::operator::LogicalOperator::{LogicalApply, LogicalGbAgg, LogicalJoin};
    use crate::operator::Operator::Logical;
    use crate::operator::{Apply, ApplyKind, Join, JoinKind, SubqueryOrigin};
    use crate::plan::{LogicalPlanBuilder, Plan};
    use crate::optimizer::{OptGroup, Optimizer};
    use crate::properties::MaxCard;
    use crate::rules::{
        Apply2JoinNoCorrelationsRule, Apply2JoinRule, CorrelatedApply2CorrelatedNLJoinRule,
        LeftSemiApplyWithExternalCorrs2InnerJoinRule, OptExpression, Rule, RulePromise,
        RuleResult,
    };
    use crate::test_utils::{bind_root, memo_for_test};

    fn apply_plan(apply: Apply, inner: Plan) -> Plan {
        LogicalPlanBuilder::scan("t1").apply(apply, inner).build()
    }

    fn correlated_select() -> Plan {
        LogicalPlanBuilder::scan("t2")
            .select(col("t2.b").eq(col("t1.a")))
            .build()
    }

    fn apply_rule<R: Rule>(rule: &R, memo: &Memo) -> Vec<OptExpression<Memo>> {
        let mut result = RuleResult::new();
        for input in bind_root(memo, rule.pattern()) {
            rule.apply(input, memo, &mut result).unwrap();
        }
        result.results().collect()
    }

    fn operators(results: &[OptExpression<Memo>], memo: &Memo) -> Vec<String> {
        results
            .iter()
            .map(|r| r.get_operator(memo).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_inner_apply_to_join() {
        let memo = memo_for_test(apply_plan(
            Apply::new(ApplyKind::Inner, SubqueryOrigin::Scalar, vec![], lit(true)),
            correlated_select(),
        ));
        let rule = Apply2JoinRule::new(ApplyKind::Inner);
        assert_eq!(
            RulePromise::Medium,
            rule.promise(memo.root_expr_id(), &memo).unwrap()
        );

        let results = apply_rule(&rule, &memo);
        assert_eq!(vec!["LogicalJoin", "LogicalApply"], operators(&results, &memo));
        assert_eq!(
            &Logical(LogicalJoin(Join::new(
                JoinKind::Inner,
                col("t2.b").eq(col("t1.a"))
            ))),
            results[0].get_operator(&memo).unwrap()
        );
        match results[1].get_operator(&memo).unwrap() {
            Logical(LogicalApply(apply)) => assert!(apply.is_correlated()),
            op => panic!("Unexpected operator {}", op),
        }
    }

    fn scalar_count_apply(kind: ApplyKind, outer: LogicalPlanBuilder) -> Memo {
        memo_for_test(
            outer
                .apply(
                    Apply::new(kind, SubqueryOrigin::Scalar, vec![], lit(true)),
                    LogicalPlanBuilder::scan("t2")
                        .select(col("t2.b").eq(col("t1.a")))
                        .gb_agg(vec![], vec![count(lit(1))])
                        .build(),
                )
                .build(),
        )
    }

    #[test]
    fn test_decorrelated_join_keeps_output_and_max_card() {
        let cases = vec![
            (ApplyKind::LeftOuter, LogicalPlanBuilder::scan("t1"), MaxCard::Unbounded),
            (ApplyKind::LeftOuter, LogicalPlanBuilder::scan("t1").limit(1), MaxCard::Bounded(1)),
            (ApplyKind::Inner, LogicalPlanBuilder::scan("t1"), MaxCard::Unbounded),
            (ApplyKind::Inner, LogicalPlanBuilder::scan("t1").limit(1), MaxCard::Bounded(1)),
        ];

        for (kind, outer, expected_max_card) in cases {
            let mut memo = scalar_count_apply(kind, outer);
            let results = apply_rule(&Apply2JoinRule::new(kind), &memo);

            // Grouping column added for decorrelation is projected away.
            assert_eq!(vec!["LogicalProject", "LogicalApply"], operators(&results, &memo));
            let join = &results[0][0];
            assert_eq!(
                &Logical(LogicalJoin(Join::new(
                    kind.join_kind(),
                    col("t2.b").eq(col("t1.a"))
                ))),
                join.get_operator(&memo).unwrap()
            );
            assert!(matches!(
                join[1].get_operator(&memo).unwrap(),
                Logical(LogicalGbAgg(_))
            ));

            let apply_prop = memo.group_at(memo.root_group_id()).logical_prop().clone();
            assert_eq!(expected_max_card, apply_prop.max_card(), "{:?}", kind);

            let project = memo.insert_opt_expression(&results[0], None).unwrap();
            let project_prop = memo.group_at(memo.expr_group(project)).logical_prop();
            assert_eq!(apply_prop.output_columns(), project_prop.output_columns());
            assert_eq!(apply_prop.max_card(), project_prop.max_card(), "{:?}", kind);
        }
    }

    #[test]
    fn test_join_on_inner_key_bounded_by_outer() {
        let mut memo = scalar_count_apply(
            ApplyKind::LeftOuter,
            LogicalPlanBuilder::scan("t1").limit(3),
        );
        let results = apply_rule(&Apply2JoinRule::new(ApplyKind::LeftOuter), &memo);
        let join = memo.insert_opt_expression(&results[0][0], None).unwrap();
        let join_prop = memo.group_at(memo.expr_group(join)).logical_prop();
        assert_eq!(MaxCard::Bounded(3), join_prop.max_card());

        // Grouped inner side joined on a non key column may match many rows per outer row.
        let memo = memo_for_test(
            LogicalPlanBuilder::scan("t1")
                .limit(3)
                .join(
                    JoinKind::LeftOuter,
                    col("t2.c").eq(col("t1.a")),
                    LogicalPlanBuilder::scan("t2")
                        .gb_agg(
                            vec![
                                Column::from_qualified_name("t2.b"),
                                Column::from_qualified_name("t2.c"),
                            ],
                            vec![count(lit(1))],
                        )
                        .build(),
                )
                .build(),
        );
        let root = memo.root_group_id();
        assert_eq!(MaxCard::Unbounded, memo.group_at(root).logical_prop().max_card());
    }

    #[test]
    fn test_all_and_not_in_produce_no_join() {
        let not_in = memo_for_test(apply_plan(
            Apply::new(
                ApplyKind::LeftAntiSemiNotIn,
                SubqueryOrigin::Any,
                vec![],
                col("t1.b").eq(col("t2.a")),
            ),
            correlated_select(),
        ));
        let rule = Apply2JoinRule::new(ApplyKind::LeftAntiSemiNotIn);
        assert_eq!(
            RulePromise::Low,
            rule.promise(not_in.root_expr_id(), &not_in).unwrap()
        );
        assert_eq!(vec!["LogicalApply"], operators(&apply_rule(&rule, &not_in), &not_in));

        let all = memo_for_test(apply_plan(
            Apply::new(
                ApplyKind::LeftOuter,
                SubqueryOrigin::All,
                vec![],
                lit(true),
            ),
            correlated_select(),
        ));
        let rule = Apply2JoinRule::new(ApplyKind::LeftOuter);
        assert_eq!(vec!["LogicalApply"], operators(&apply_rule(&rule, &all), &all));
    }

    #[test]
    fn test_no_correlations_rule_takes_over() {
        let memo = memo_for_test(apply_plan(
            Apply::new(
                ApplyKind::LeftSemiIn,
                SubqueryOrigin::Any,
                vec![],
                col("t1.a").eq(col("t2.a")),
            ),
            LogicalPlanBuilder::scan("t2").build(),
        ));
        let general = Apply2JoinRule::new(ApplyKind::LeftSemiIn);
        let no_correlations = Apply2JoinNoCorrelationsRule::new(ApplyKind::LeftSemiIn).unwrap();

        assert_eq!(
            RulePromise::None,
            general.promise(memo.root_expr_id(), &memo).unwrap()
        );
        assert_eq!(
            RulePromise::High,
            no_correlations.promise(memo.root_expr_id(), &memo).unwrap()
        );
        assert_eq!(
            vec!["LogicalJoin"],
            operators(&apply_rule(&no_correlations, &memo), &memo)
        );
        assert!(Apply2JoinNoCorrelationsRule::new(ApplyKind::Inner).is_none());
    }

    #[test]
    fn test_external_correlations_to_inner_join() {
        // Inner child references t3, which is produced above the apply.
        let memo = memo_for_test(apply_plan(
            Apply::new(ApplyKind::LeftSemi, SubqueryOrigin::Exists, vec![], lit(true)),
            LogicalPlanBuilder::scan("t2")
                .select(col("t2.b").eq(col("t1.a")).and(col("t2.c").eq(col("t3.a"))))
                .build(),
        ));
        let rule = LeftSemiApplyWithExternalCorrs2InnerJoinRule::new();
        assert_eq!(
            RulePromise::Medium,
            rule.promise(memo.root_expr_id(), &memo).unwrap()
        );

        let results = apply_rule(&rule, &memo);
        assert_eq!(vec!["LogicalGbAgg"], operators(&results, &memo));
        assert_eq!(
            &Logical(LogicalJoin(Join::new(
                JoinKind::Inner,
                col("t2.b").eq(col("t1.a"))
            ))),
            results[0][0].get_operator(&memo).unwrap()
        );
    }

    #[test]
    fn test_mixed_external_correlation_adds_nothing() {
        let memo = memo_for_test(apply_plan(
            Apply::new(ApplyKind::LeftSemi, SubqueryOrigin::Exists, vec![], lit(true)),
            LogicalPlanBuilder::scan("t2")
                .select(col("t1.a").eq(col("t3.a")))
                .build(),
        ));
        let rule = LeftSemiApplyWithExternalCorrs2InnerJoinRule::new();
        assert!(apply_rule(&rule, &memo).is_empty());
    }

    #[test]
    fn test_correlated_apply_implementation() {
        let memo = memo_for_test(apply_plan(
            Apply::new(ApplyKind::Inner, SubqueryOrigin::Scalar, vec![], lit(true))
                .into_correlated(),
            correlated_select(),
        ));
        let rule = CorrelatedApply2CorrelatedNLJoinRule::new();
        assert_eq!(
            RulePromise::High,
            rule.promise(memo.root_expr_id(), &memo).unwrap()
        );
        assert_eq!(
            vec!["PhysicalCorrelatedNLJoin"],
            operators(&apply_rule(&rule, &memo), &memo)
        );
        assert_eq!(
            RulePromise::None,
            Apply2JoinRule::new(ApplyKind::Inner)
                .promise(memo.root_expr_id(), &memo)
                .unwrap()
        );
    }
}
