use anyhow::bail;

use crate::error::{OptResult, OptimizerError};
use crate::operator::LogicalOperator::LogicalJoin;
use crate::operator::Operator::{Logical, Physical};
use crate::operator::PhysicalOperator::{PhysicalHashJoin, PhysicalNLJoin};
use crate::operator::{Join, JoinKind, Operator};
use crate::optimizer::{OptExpr, OptGroup, Optimizer};
use crate::rules::RulePromise::{High, Medium};
use crate::rules::{
    pattern, OptExpression, PatternBuilder, Pattern, Rule, RuleId, RulePromise, RuleResult,
};

#[rustfmt::skip::macros(lazy_static)]
lazy_static! {
    static ref COMMUTATE_JOIN_RULE_PATTERN: Pattern = {
        pattern(CommutateJoinRule::matches)
        .finish()
    };
    static ref JOIN_RULE_PATTERN: Pattern = {
        pattern(|op| matches!(op, Logical(LogicalJoin(_))))
        .finish()
    };
}

fn join_of<'a, O: Optimizer>(
    input: &'a OptExpression<O>,
    optimizer: &'a O,
    rule: RuleId,
) -> OptResult<&'a Join> {
    match input.get_operator(optimizer)? {
        Logical(LogicalJoin(join)) => Ok(join),
        _ => bail!(OptimizerError::PatternMismatch(rule.as_ref().to_string())),
    }
}

/// Commutate inner join inputs.
#[derive(Clone)]
pub struct CommutateJoinRule {}

impl CommutateJoinRule {
    pub fn new() -> Self {
        Self {}
    }

    fn matches(op: &Operator) -> bool {
        match op {
            Logical(LogicalJoin(join)) => join.kind() == JoinKind::Inner,
            _ => false,
        }
    }
}

impl Rule for CommutateJoinRule {
    fn apply<O: Optimizer>(
        &self,
        input: OptExpression<O>,
        optimizer: &O,
        result: &mut RuleResult<O>,
    ) -> OptResult<()> {
        let op = Logical(LogicalJoin(join_of(&input, optimizer, self.rule_id())?.clone()));
        let outer = input.input(0, self.rule_id().as_ref())?.clone();
        let inner = input.input(1, self.rule_id().as_ref())?.clone();
        result.add(OptExpression::with_operator(op, vec![inner, outer]));
        Ok(())
    }

    fn pattern(&self) -> &Pattern {
        &COMMUTATE_JOIN_RULE_PATTERN
    }

    fn rule_id(&self) -> RuleId {
        RuleId::CommutateJoin
    }
}

/// Transforms equi join to hash join.
#[derive(Clone)]
pub struct Join2HashJoinRule {}

impl Join2HashJoinRule {
    pub fn new() -> Self {
        Self {}
    }
}

impl Rule for Join2HashJoinRule {
    fn apply<O: Optimizer>(
        &self,
        input: OptExpression<O>,
        optimizer: &O,
        result: &mut RuleResult<O>,
    ) -> OptResult<()> {
        let join = join_of(&input, optimizer, self.rule_id())?;
        result.add(input.clone_with_inputs(Physical(PhysicalHashJoin(join.clone()))));
        Ok(())
    }

    fn pattern(&self) -> &Pattern {
        &JOIN_RULE_PATTERN
    }

    fn rule_id(&self) -> RuleId {
        RuleId::Join2HashJoin
    }

    /// Hash join needs at least one equality between columns of both sides.
    fn promise<O: Optimizer>(&self, expr: O::ExprHandle, optimizer: &O) -> OptResult<RulePromise> {
        let expr = optimizer.expr_at(expr);
        if let Logical(LogicalJoin(join)) = expr.operator() {
            if expr.inputs_len() == 2 {
                let outer = optimizer.group_at(expr.input_at(0)).logical_prop();
                let inner = optimizer.group_at(expr.input_at(1)).logical_prop();
                if !join.equi_join_keys(outer, inner).is_empty() {
                    return Ok(High);
                }
            }
        }
        Ok(RulePromise::None)
    }
}

/// Transforms join to nested loop join, which accepts any predicate.
#[derive(Clone)]
pub struct Join2NLJoinRule {}

impl Join2NLJoinRule {
    pub fn new() -> Self {
        Self {}
    }
}

impl Rule for Join2NLJoinRule {
    fn apply<O: Optimizer>(
        &self,
        input: OptExpression<O>,
        optimizer: &O,
        result: &mut RuleResult<O>,
    ) -> OptResult<()> {
        let join = join_of(&input, optimizer, self.rule_id())?;
        result.add(input.clone_with_inputs(Physical(PhysicalNLJoin(join.clone()))));
        Ok(())
    }

    fn pattern(&self) -> &Pattern {
        &JOIN_RULE_PATTERN
    }

    fn rule_id(&self) -> RuleId {
        RuleId::Join2NLJoin
    }

    fn promise<O: Optimizer>(&self, _expr: O::ExprHandle, _optimizer: &O) -> OptResult<RulePromise> {
        Ok(Medium)
    }
}

#[cfg(test)]
mod tests {
    use datafusion::prelude::{col, lit};

    use crate::cascades::{GroupId, Memo};
    use crate::operator::LogicalOperator::LogicalJoin;
    use crate::operator::Operator::Logical;
    use crate::operator::{Join, JoinKind};
    use crate::plan::LogicalPlanBuilder;
    use crate::rules::{
        CommutateJoinRule, Join2HashJoinRule, OptExpression, Rule, RulePromise, RuleResult,
    };
    use crate::test_utils::{bind_root, memo_for_test};

    #[test]
    fn test_commutate_join() {
        let plan = {
            let inner = LogicalPlanBuilder::scan("t2").build();
            LogicalPlanBuilder::scan("t1")
                .join(JoinKind::Inner, col("t1.a").eq(col("t2.a")), inner)
                .build()
        };
        let memo = memo_for_test(plan);
        let rule = CommutateJoinRule::new();

        let mut result = RuleResult::new();
        for input in bind_root(&memo, rule.pattern()) {
            rule.apply(input, &memo, &mut result).unwrap();
        }

        let expected = OptExpression::<Memo>::with_operator(
            Logical(LogicalJoin(Join::new(
                JoinKind::Inner,
                col("t1.a").eq(col("t2.a")),
            ))),
            vec![
                OptExpression::with_group_handle(GroupId(1)),
                OptExpression::with_group_handle(GroupId(0)),
            ],
        );
        assert_eq!(vec![expected], result.results().collect::<Vec<_>>());
    }

    #[test]
    fn test_commutate_only_inner_join() {
        let plan = {
            let inner = LogicalPlanBuilder::scan("t2").build();
            LogicalPlanBuilder::scan("t1")
                .join(JoinKind::LeftOuter, col("t1.a").eq(col("t2.a")), inner)
                .build()
        };
        let memo = memo_for_test(plan);
        assert!(bind_root(&memo, CommutateJoinRule::new().pattern()).is_empty());
    }

    #[test]
    fn test_hash_join_promise() {
        let build = |predicate| {
            let inner = LogicalPlanBuilder::scan("t2").build();
            memo_for_test(
                LogicalPlanBuilder::scan("t1")
                    .join(JoinKind::Inner, predicate, inner)
                    .build(),
            )
        };
        let rule = Join2HashJoinRule::new();

        let memo = build(col("t1.a").eq(col("t2.a")));
        assert_eq!(
            RulePromise::High,
            rule.promise(memo.root_expr_id(), &memo).unwrap()
        );

        let memo = build(col("t1.a").lt(col("t2.a")).or(lit(false)));
        assert_eq!(
            RulePromise::None,
            rule.promise(memo.root_expr_id(), &memo).unwrap()
        );
    }
}
