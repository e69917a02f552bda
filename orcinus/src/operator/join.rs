use std::fmt::Formatter;

use datafusion_common::Column;
use enumset::EnumSet;
use strum_macros::AsRefStr;

use crate::error::OptResult;
use crate::operator::{
    DeriveContext, DerivePropContext, DisplayFields, LogicalOperatorTrait, RequiredPropContext,
};
use crate::properties::{
    column_equalities, derive_equivalences, derive_outer_refs, equivalent_columns,
    null_rejecting_columns, ColRefSet, DeliveredPropertySet, DistributionMatching,
    DistributionSpec, LogicalProperty, MaxCard, PhysicalPropertySet,
    RewindabilitySpec,
};
use crate::rules::RuleId;
use crate::stat::{JoinStatsProcessor, StatPromise, Statistics};
use crate::Expr;

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, AsRefStr)]
pub enum JoinKind {
    Inner,
    LeftOuter,
    LeftSemi,
    LeftAntiSemi,
    /// Anti semi join with `NOT IN` null semantics.
    LeftAntiSemiNotIn,
}

impl JoinKind {
    /// Whether columns of the inner child appear in join output.
    pub fn outputs_inner(&self) -> bool {
        matches!(self, JoinKind::Inner | JoinKind::LeftOuter)
    }

    pub fn is_semi_or_anti(&self) -> bool {
        !self.outputs_inner()
    }
}

/// Logical join operator.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Join {
    kind: JoinKind,
    predicate: Expr,
}

impl Join {
    pub fn new(kind: JoinKind, predicate: Expr) -> Self {
        Self { kind, predicate }
    }

    pub fn kind(&self) -> JoinKind {
        self.kind
    }

    pub fn predicate(&self) -> &Expr {
        &self.predicate
    }

    /// Equality conjuncts between columns of outer and inner, as `(outer, inner)` pairs.
    pub fn equi_join_keys(
        &self,
        outer: &LogicalProperty,
        inner: &LogicalProperty,
    ) -> Vec<(Column, Column)> {
        column_equalities(&self.predicate)
            .into_iter()
            .filter_map(|(left, right)| {
                let (outer_columns, inner_columns) =
                    (outer.output_columns(), inner.output_columns());
                if outer_columns.contains(&left) && inner_columns.contains(&right) {
                    Some((left, right))
                } else if outer_columns.contains(&right) && inner_columns.contains(&left) {
                    Some((right, left))
                } else {
                    None
                }
            })
            .collect()
    }

    pub(super) fn hash_join_required(
        &self,
        context: &RequiredPropContext,
    ) -> OptResult<Option<PhysicalPropertySet>> {
        let (outer, inner) = match context.input_props {
            [outer, inner] => (*outer, *inner),
            _ => return Ok(None),
        };
        let keys = self.equi_join_keys(outer, inner);
        if keys.is_empty() {
            return Ok(None);
        }

        let base = PhysicalPropertySet::new().with_partition(context.required.partition());
        let required = match (context.request, context.child) {
            // Co-located hash join
            (0, 0) => base.with_distribution(DistributionSpec::Hashed(
                keys.iter().map(|(o, _)| o.clone()).collect(),
            )),
            (0, _) => {
                let outer_delivered = match context.delivered_of(0) {
                    Some(delivered) => delivered,
                    None => return Ok(None),
                };
                match outer_delivered.distribution() {
                    DistributionSpec::Hashed(columns) => {
                        let mut inner_columns = Vec::with_capacity(columns.len());
                        for column in columns {
                            match keys.iter().find(|(o, _)| {
                                equivalent_columns(o, column, outer.equivalences())
                            }) {
                                Some((_, i)) => inner_columns.push(i.clone()),
                                None => return Ok(None),
                            }
                        }
                        base.with_distribution(DistributionSpec::Hashed(inner_columns))
                            .with_matching(DistributionMatching::Exact)
                    }
                    d if d.is_singleton_like() => {
                        base.with_distribution(DistributionSpec::Singleton)
                    }
                    _ => return Ok(None),
                }
            }
            // Broadcast inner
            (1, 0) => base,
            (1, _) => base.with_distribution(DistributionSpec::Replicated),
            _ => base.with_distribution(DistributionSpec::Singleton),
        };
        Ok(Some(required))
    }

    pub(super) fn nl_join_required(
        &self,
        context: &RequiredPropContext,
    ) -> OptResult<Option<PhysicalPropertySet>> {
        let base = PhysicalPropertySet::new().with_partition(context.required.partition());
        let outer_required = |base: PhysicalPropertySet| {
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
        };

        let required = match (context.request, context.child) {
            (0, 0) => outer_required(base),
            (0, _) => base
                .with_distribution(DistributionSpec::Replicated)
                .with_rewindability(RewindabilitySpec::Rewindable),
            (_, 0) => outer_required(base.with_distribution(DistributionSpec::Singleton)),
            _ => base
                .with_distribution(DistributionSpec::Singleton)
                .with_rewindability(RewindabilitySpec::Rewindable),
        };
        Ok(Some(required))
    }

    pub(super) fn hash_join_delivered(context: &DerivePropContext) -> DeliveredPropertySet {
        DeliveredPropertySet::new(Self::joined_distribution(context))
            .with_partition_consumers(context.combined_consumers())
    }

    /// Nested loop joins keep order of outer child.
    pub(super) fn nl_join_delivered(context: &DerivePropContext) -> DeliveredPropertySet {
        DeliveredPropertySet::new(Self::joined_distribution(context))
            .with_order(context.input(0).order().clone())
            .with_partition_consumers(context.combined_consumers())
    }

    fn joined_distribution(context: &DerivePropContext) -> DistributionSpec {
        let outer = context.input(0);
        match outer.distribution() {
            DistributionSpec::Universal => context.input(1).distribution().clone(),
            d => d.clone(),
        }
    }
}

/// Whether equality conjuncts of `predicate` pin every column of some inner key to an outer
/// column, so each outer row matches at most one inner row.
fn matches_inner_key(predicate: &Expr, outer: &LogicalProperty, inner: &LogicalProperty) -> bool {
    let mut matched = ColRefSet::new();
    for (l, r) in column_equalities(predicate) {
        if inner.output_columns().contains(&l) && outer.output_columns().contains(&r) {
            matched.insert(l);
        } else if inner.output_columns().contains(&r) && outer.output_columns().contains(&l) {
            matched.insert(r);
        }
    }
    inner.keys().iter().any(|key| key.is_subset(&matched))
}

/// Logical property of join like operators.
pub(crate) fn derive_join_prop(
    kind: JoinKind,
    predicate: &Expr,
    context: &DeriveContext,
) -> OptResult<LogicalProperty> {
    let outer = context.input_prop(0)?;
    let inner = context.input_prop(1)?;
    let used = ColRefSet::from_expr(predicate)?;
    let outer_refs = derive_outer_refs(&used, &[outer, inner]);

    let prop = if kind.outputs_inner() {
        let schema = outer.schema().join(inner.schema())?;
        let keys = outer
            .keys()
            .iter()
            .flat_map(|o| inner.keys().iter().map(move |i| o.union(i)))
            .collect();
        let prop = LogicalProperty::new(schema).with_keys(keys);
        let inner_key_matched = matches_inner_key(predicate, outer, inner);

        if kind == JoinKind::Inner {
            prop.with_not_null_columns(
                outer
                    .not_null_columns()
                    .union(inner.not_null_columns())
                    .union(&null_rejecting_columns(predicate)),
            )
            .with_max_card(if inner_key_matched {
                outer.max_card().min(outer.max_card().multiply(inner.max_card()))
            } else {
                outer.max_card().multiply(inner.max_card())
            })
            .with_equivalences(derive_equivalences(&[outer, inner], predicate))
        } else {
            prop.with_not_null_columns(outer.not_null_columns().clone())
                .with_max_card(if inner_key_matched {
                    outer.max_card()
                } else {
                    outer
                        .max_card()
                        .multiply(inner.max_card().max(MaxCard::Bounded(1)))
                })
                .with_equivalences(outer.equivalences().to_vec())
        }
    } else {
        LogicalProperty::with_schema(outer.schema_ref().clone())
            .with_not_null_columns(outer.not_null_columns().clone())
            .with_max_card(outer.max_card())
            .with_keys(outer.keys().to_vec())
            .with_equivalences(outer.equivalences().to_vec())
    };

    Ok(prop.with_outer_refs(outer_refs))
}

impl LogicalOperatorTrait for Join {
    fn derive_logical_prop(&self, context: &DeriveContext) -> OptResult<LogicalProperty> {
        derive_join_prop(self.kind, &self.predicate, context)
    }

    fn derive_statistics(
        &self,
        context: &DeriveContext,
        _logical_prop: &LogicalProperty,
    ) -> OptResult<Statistics> {
        Ok(JoinStatsProcessor::derive(
            self.kind,
            context.input_stat(0)?,
            context.input_stat(1)?,
            &self.predicate,
        ))
    }

    fn stat_promise(&self) -> StatPromise {
        StatPromise::High
    }

    fn candidate_rules(&self) -> EnumSet<RuleId> {
        RuleId::CommutateJoin | RuleId::Join2HashJoin | RuleId::Join2NLJoin
    }
}

impl DisplayFields for Join {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("")
            .field("kind", &self.kind)
            .field("predicate", &self.predicate)
            .finish()
    }
}
