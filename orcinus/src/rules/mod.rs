//! Optimization rules.
//!
//! A rule defines equivalent transformation of query plan. There are two kinds of rules:
//!
//! 1. Exploration rule. It produces equivalent alternative logical plan, which is used in the
//! exploration phase of optimizer. For example, [`CommutateJoinRule`] just swaps the inputs of
//! inner join, and [`Apply2JoinRule`] decorrelates a subquery into a join.
//! 2. Implementation rule. It transforms logical operator to physical operator to provide
//! physical implementation. For example, [`Join2HashJoinRule`] transforms join to hash join.
//!
//! ## Pattern
//!
//! A patten defines what expression the rule should operate on. With pattern definition, the
//! rule can avoid manipulating memo directly, it only cares about defining equivalent
//! transformations.
//!
//! Let use the [`CommutateJoinRule`] to illustrate, its pattern is a single join node whose
//! children are bound as group handles:
//! ```no
//! static ref COMMUTATE_JOIN_RULE_PATTERN: Pattern = {
//!     pattern(CommutateJoinRule::matches)
//!     .finish()
//! };
//! ```
//!
//! When [`CommutateJoinRule`] is invoked by optimizer, its input/output is [`OptExpression`]
//! rather plan.
//!```no
//! [GroupExprId(2, 0) Join(t1.a = t2.a)]                  [Operator Join(t1.a = t2.a)]
//!              |                                                   |
//!      -----------------              CommutateJoinRule     -----------------
//!      |               |                 -------->          |               |
//! [GroupId(0)]    [GroupId(1)]                         [GroupId(1)]    [GroupId(0)]
//! ```
//!
//! The optimizer uses the generated transformation to manipulate memo.
//!
//! ## Promise
//!
//! Before binding a pattern, the optimizer asks the rule for its [`RulePromise`] on the
//! expression, computed from derived properties. Rules with [`RulePromise::None`] are skipped,
//! others are applied in descending order of promise.
mod pattern;
pub use pattern::*;
mod opt_expr;
pub use opt_expr::*;
mod join;
pub use join::*;
mod implementation;
pub use implementation::*;
mod apply;
pub use apply::*;

use std::fmt::{Debug, Formatter};

use enum_dispatch::enum_dispatch;
use enumset::EnumSetType;
use strum_macros::AsRefStr;

use crate::error::OptResult;
use crate::operator::ApplyKind;
use crate::optimizer::Optimizer;

pub struct RuleResult<O: Optimizer> {
    exprs: OptExprVec<O>,
}

impl<O: Optimizer> Default for RuleResult<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: Optimizer> RuleResult<O> {
    pub fn new() -> Self {
        Self { exprs: vec![] }
    }

    pub fn add(&mut self, new_expr: OptExpression<O>) {
        self.exprs.push(new_expr);
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn results(self) -> impl Iterator<Item = OptExpression<O>> {
        self.exprs.into_iter()
    }
}

#[enum_dispatch(RuleImpl)]
pub trait Rule {
    /// Apply a rule to match sub plan.
    ///
    /// Rules never modify their input, alternatives are appended to `result`.
    fn apply<O: Optimizer>(
        &self,
        input: OptExpression<O>,
        optimizer: &O,
        result: &mut RuleResult<O>,
    ) -> OptResult<()>;

    /// Pattern for rule.
    fn pattern(&self) -> &Pattern;

    /// Use to identify each rule.
    ///
    /// This is used to avoid applying same rule repeatedly to same group expression.
    fn rule_id(&self) -> RuleId;

    /// How promising applying this rule to `expr` is.
    fn promise<O: Optimizer>(&self, _expr: O::ExprHandle, _optimizer: &O) -> OptResult<RulePromise> {
        Ok(RulePromise::Medium)
    }
}

#[enum_dispatch]
#[derive(Clone, AsRefStr)]
pub enum RuleImpl {
    // Exploring rules
    CommutateJoinRule,
    Apply2JoinRule,
    Apply2JoinNoCorrelationsRule,
    LeftSemiApplyWithExternalCorrs2InnerJoinRule,

    // Implementation rules
    Get2TableScanRule,
    Select2FilterRule,
    Project2ComputeScalarRule,
    Join2HashJoinRule,
    Join2NLJoinRule,
    GbAgg2HashAggRule,
    GbAgg2StreamAggRule,
    Limit2LimitRule,
    CorrelatedApply2CorrelatedNLJoinRule,
}

impl Debug for RuleImpl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.rule_id())
    }
}

#[derive(EnumSetType, Debug, Hash, AsRefStr)]
pub enum RuleId {
    // Exploring rules
    CommutateJoin,
    InnerApply2InnerJoin,
    LeftOuterApply2LeftOuterJoin,
    LeftSemiApply2LeftSemiJoin,
    LeftSemiApplyIn2LeftSemiJoin,
    LeftAntiSemiApply2LeftAntiSemiJoin,
    LeftAntiSemiApplyNotIn2LeftAntiSemiJoinNotIn,
    LeftSemiApply2LeftSemiJoinNoCorrelations,
    LeftSemiApplyIn2LeftSemiJoinNoCorrelations,
    LeftAntiSemiApply2LeftAntiSemiJoinNoCorrelations,
    LeftSemiApplyWithExternalCorrs2InnerJoin,

    // Implementation rules
    Get2TableScan,
    Select2Filter,
    Project2ComputeScalar,
    Join2HashJoin,
    Join2NLJoin,
    GbAgg2HashAgg,
    GbAgg2StreamAgg,
    Limit2Limit,
    CorrelatedApply2CorrelatedNLJoin,
}

impl RuleId {
    pub fn is_implementation(&self) -> bool {
        matches!(
            self,
            RuleId::Get2TableScan
                | RuleId::Select2Filter
                | RuleId::Project2ComputeScalar
                | RuleId::Join2HashJoin
                | RuleId::Join2NLJoin
                | RuleId::GbAgg2HashAgg
                | RuleId::GbAgg2StreamAgg
                | RuleId::Limit2Limit
                | RuleId::CorrelatedApply2CorrelatedNLJoin
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RulePromise {
    None = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

/// All rules known to the optimizer.
pub fn default_rules() -> Vec<RuleImpl> {
    let mut rules: Vec<RuleImpl> = vec![CommutateJoinRule::new().into()];
    rules.extend(
        [
            ApplyKind::Inner,
            ApplyKind::LeftOuter,
            ApplyKind::LeftSemi,
            ApplyKind::LeftSemiIn,
            ApplyKind::LeftAntiSemi,
            ApplyKind::LeftAntiSemiNotIn,
        ]
        .into_iter()
        .map(|kind| Apply2JoinRule::new(kind).into()),
    );
    rules.extend(
        [
            ApplyKind::LeftSemi,
            ApplyKind::LeftSemiIn,
            ApplyKind::LeftAntiSemi,
        ]
        .into_iter()
        .filter_map(Apply2JoinNoCorrelationsRule::new)
        .map(RuleImpl::from),
    );
    rules.push(LeftSemiApplyWithExternalCorrs2InnerJoinRule::new().into());

    rules.extend([
        RuleImpl::from(Get2TableScanRule::new()),
        Select2FilterRule::new().into(),
        Project2ComputeScalarRule::new().into(),
        Join2HashJoinRule::new().into(),
        Join2NLJoinRule::new().into(),
        GbAgg2HashAggRule::new().into(),
        GbAgg2StreamAggRule::new().into(),
        Limit2LimitRule::new().into(),
        CorrelatedApply2CorrelatedNLJoinRule::new().into(),
    ]);
    rules
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use enumset::EnumSet;

    use crate::rules::{default_rules, CommutateJoinRule, Rule, RuleId, RuleImpl, RulePromise};

    #[test]
    fn test_default_rules_cover_all_ids() {
        let ids = default_rules()
            .iter()
            .map(|r| r.rule_id())
            .collect::<HashSet<_>>();
        assert_eq!(EnumSet::<RuleId>::all().len(), ids.len());
        assert_eq!(default_rules().len(), ids.len());
    }

    #[test]
    fn test_rule_debug() {
        assert_eq!(
            "CommutateJoin",
            format!("{:?}", RuleImpl::from(CommutateJoinRule::new()))
        );
    }

    #[test]
    fn test_promise_order() {
        let mut promises = vec![RulePromise::Low, RulePromise::High, RulePromise::None];
        promises.sort();
        assert_eq!(
            vec![RulePromise::None, RulePromise::Low, RulePromise::High],
            promises
        );
        assert!(RuleId::Join2HashJoin.is_implementation());
        assert!(!RuleId::CommutateJoin.is_implementation());
    }
}
