use std::fmt::Formatter;

use datafusion_common::Column;
use enumset::EnumSet;
use strum_macros::AsRefStr;

use crate::error::OptResult;
use crate::operator::join::derive_join_prop;
use crate::operator::{
    DeriveContext, DisplayFields, JoinKind, LogicalOperatorTrait, RequiredPropContext,
};
use crate::properties::{DistributionSpec, LogicalProperty, PhysicalPropertySet, RewindabilitySpec};
use crate::rules::RuleId;
use crate::stat::{JoinStatsProcessor, StatPromise, Statistics};
use crate::Expr;

/// Kind of apply, it decides the join kind it's decorrelated into.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, AsRefStr)]
pub enum ApplyKind {
    Inner,
    LeftOuter,
    LeftSemi,
    /// Semi apply created from an `IN` subquery.
    LeftSemiIn,
    LeftAntiSemi,
    /// Anti semi apply created from a `NOT IN` subquery.
    LeftAntiSemiNotIn,
}

impl ApplyKind {
    pub fn join_kind(&self) -> JoinKind {
        match self {
            ApplyKind::Inner => JoinKind::Inner,
            ApplyKind::LeftOuter => JoinKind::LeftOuter,
            ApplyKind::LeftSemi | ApplyKind::LeftSemiIn => JoinKind::LeftSemi,
            ApplyKind::LeftAntiSemi => JoinKind::LeftAntiSemi,
            ApplyKind::LeftAntiSemiNotIn => JoinKind::LeftAntiSemiNotIn,
        }
    }
}

/// Kind of subquery an apply was created from.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, AsRefStr)]
pub enum SubqueryOrigin {
    Scalar,
    Exists,
    NotExists,
    Any,
    All,
}

/// Evaluates the inner child for each row of the outer child.
///
/// The inner child may reference columns of the outer child. A correlated apply is executed
/// as is, e.g. by a correlated nested loop join, instead of being turned into a join.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Apply {
    kind: ApplyKind,
    origin: SubqueryOrigin,
    correlated: bool,
    /// Columns of inner child used by the subquery expression.
    inner_columns: Vec<Column>,
    predicate: Expr,
    /// Marker for executors and plan consumers. No rule in this crate pushes predicates through
    /// an apply, the flag is carried to the correlated nested loop join and shown in its output.
    allow_predicate_pushdown: bool,
}

impl Apply {
    pub fn new(
        kind: ApplyKind,
        origin: SubqueryOrigin,
        inner_columns: Vec<Column>,
        predicate: Expr,
    ) -> Self {
        Self {
            kind,
            origin,
            correlated: false,
            inner_columns,
            predicate,
            allow_predicate_pushdown: true,
        }
    }

    /// Correlated left outer apply. Predicates can't be pushed through one created from an
    /// `ALL` subquery.
    pub fn left_outer_correlated(
        origin: SubqueryOrigin,
        inner_columns: Vec<Column>,
        predicate: Expr,
    ) -> Self {
        Self::new(ApplyKind::LeftOuter, origin, inner_columns, predicate).into_correlated()
    }

    pub fn into_correlated(mut self) -> Self {
        self.correlated = true;
        if self.kind == ApplyKind::LeftOuter && self.origin == SubqueryOrigin::All {
            self.allow_predicate_pushdown = false;
        }
        self
    }

    pub fn kind(&self) -> ApplyKind {
        self.kind
    }

    pub fn origin(&self) -> SubqueryOrigin {
        self.origin
    }

    pub fn is_correlated(&self) -> bool {
        self.correlated
    }

    pub fn inner_columns(&self) -> &[Column] {
        &self.inner_columns
    }

    pub fn predicate(&self) -> &Expr {
        &self.predicate
    }

    pub fn allow_predicate_pushdown(&self) -> bool {
        self.allow_predicate_pushdown
    }

    /// `ALL` subqueries and `NOT IN` have null semantics a join can't express.
    pub fn allows_decorrelation(&self) -> bool {
        self.origin != SubqueryOrigin::All && self.kind != ApplyKind::LeftAntiSemiNotIn
    }

    /// Correlated joins make two requests, both with satisfy matching: singleton on both
    /// sides, or any outer with the inner matched to what outer delivers.
    pub(super) fn correlated_nl_join_required(
        &self,
        context: &RequiredPropContext,
    ) -> OptResult<Option<PhysicalPropertySet>> {
        let inner_has_outer_refs = context
            .input_props
            .get(1)
            .map(|p| p.has_outer_refs())
            .unwrap_or(false);
        let inner_rewindability = if inner_has_outer_refs {
            RewindabilitySpec::NotRewindable
        } else {
            RewindabilitySpec::Rewindable
        };
        let base = PhysicalPropertySet::new().with_partition(context.required.partition());

        let required = match (context.request, context.child) {
            (0, 0) => base.with_distribution(DistributionSpec::Singleton),
            (0, _) => base
                .with_distribution(DistributionSpec::Singleton)
                .with_rewindability(inner_rewindability),
            (_, 0) => {
                if context
                    .required
                    .order()
                    .columns()
                    .is_subset(&context.input_output(0))
                {
                    base.with_order(context.required.order().clone())
                } else {
                    base
                }
            }
            _ => {
                let outer = match context.delivered_of(0) {
                    Some(outer) => outer,
                    None => return Ok(None),
                };
                let distribution = if outer.distribution().is_singleton_like() {
                    DistributionSpec::Singleton
                } else {
                    DistributionSpec::Replicated
                };
                base.with_distribution(distribution)
                    .with_rewindability(inner_rewindability)
            }
        };
        Ok(Some(required))
    }
}

impl LogicalOperatorTrait for Apply {
    fn derive_logical_prop(&self, context: &DeriveContext) -> OptResult<LogicalProperty> {
        derive_join_prop(self.kind.join_kind(), &self.predicate, context)
    }

    fn derive_statistics(
        &self,
        context: &DeriveContext,
        _logical_prop: &LogicalProperty,
    ) -> OptResult<Statistics> {
        Ok(JoinStatsProcessor::derive(
            self.kind.join_kind(),
            context.input_stat(0)?,
            context.input_stat(1)?,
            &self.predicate,
        ))
    }

    fn stat_promise(&self) -> StatPromise {
        if self.allows_decorrelation() {
            StatPromise::Low
        } else {
            StatPromise::Medium
        }
    }

    fn candidate_rules(&self) -> EnumSet<RuleId> {
        RuleId::InnerApply2InnerJoin
            | RuleId::LeftOuterApply2LeftOuterJoin
            | RuleId::LeftSemiApply2LeftSemiJoin
            | RuleId::LeftSemiApplyIn2LeftSemiJoin
            | RuleId::LeftAntiSemiApply2LeftAntiSemiJoin
            | RuleId::LeftAntiSemiApplyNotIn2LeftAntiSemiJoinNotIn
            | RuleId::LeftSemiApply2LeftSemiJoinNoCorrelations
            | RuleId::LeftSemiApplyIn2LeftSemiJoinNoCorrelations
            | RuleId::LeftAntiSemiApply2LeftAntiSemiJoinNoCorrelations
            | RuleId::LeftSemiApplyWithExternalCorrs2InnerJoin
            | RuleId::CorrelatedApply2CorrelatedNLJoin
    }
}

impl DisplayFields for Apply {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("");
        s.field("kind", &self.kind)
            .field("origin", &self.origin)
            .field("predicate", &self.predicate);
        if self.correlated {
            s.field("correlated", &self.correlated);
        }
        if !self.allow_predicate_pushdown {
            s.field("allow_predicate_pushdown", &self.allow_predicate_pushdown);
        }
        if !self.inner_columns.is_empty() {
            s.field(
                "inner_columns",
                &self
                    .inner_columns
                    .iter()
                    .map(|c| c.flat_name())
                    .collect::<Vec<_>>(),
            );
        }
        s.finish()
    }
}
