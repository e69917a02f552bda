use std::fmt::Formatter;

use datafusion_common::{Column, DFField, DFSchema};
use datafusion_expr::ExprSchemable;
use enumset::EnumSet;

use crate::error::{DFResult, OptResult};
use crate::operator::{
    DeriveContext, DerivePropContext, DisplayFields, LogicalOperatorTrait, RequiredPropContext,
};
use crate::properties::{
    derive_outer_refs, ColRefSet, DeliveredPropertySet, DistributionSpec, LogicalProperty,
    MaxCard, OrderSpec, PhysicalPropertySet, RewindabilitySpec,
};
use crate::rules::RuleId;
use crate::stat::Statistics;
use crate::Expr;

/// Group by aggregation. Without grouping columns it produces exactly one row.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct GbAgg {
    group_by: Vec<Column>,
    aggr_exprs: Vec<Expr>,
}

impl GbAgg {
    pub fn new(group_by: Vec<Column>, aggr_exprs: Vec<Expr>) -> Self {
        Self {
            group_by,
            aggr_exprs,
        }
    }

    pub fn group_by(&self) -> &[Column] {
        &self.group_by
    }

    pub fn aggr_exprs(&self) -> &[Expr] {
        &self.aggr_exprs
    }

    fn required_distribution(&self, request: usize) -> DistributionSpec {
        if request == 0 && !self.group_by.is_empty() {
            DistributionSpec::Hashed(self.group_by.clone())
        } else {
            DistributionSpec::Singleton
        }
    }

    pub(super) fn hash_agg_required(&self, context: &RequiredPropContext) -> PhysicalPropertySet {
        PhysicalPropertySet::new()
            .with_distribution(self.required_distribution(context.request))
            .with_partition(context.required.partition())
    }

    pub(super) fn stream_agg_required(&self, context: &RequiredPropContext) -> PhysicalPropertySet {
        self.hash_agg_required(context)
            .with_order(OrderSpec::ascending(self.group_by.iter().cloned()))
    }

    pub(super) fn hash_agg_delivered(context: &DerivePropContext) -> DeliveredPropertySet {
        let input = context.input(0);
        DeliveredPropertySet::new(input.distribution().clone())
            .with_rewindability(RewindabilitySpec::Rewindable)
            .with_partition_consumers(input.partition_consumers().clone())
    }

    pub(super) fn stream_agg_delivered(context: &DerivePropContext) -> DeliveredPropertySet {
        let input = context.input(0);
        DeliveredPropertySet::new(input.distribution().clone())
            .with_order(input.order().clone())
            .with_partition_consumers(input.partition_consumers().clone())
    }
}

impl LogicalOperatorTrait for GbAgg {
    fn derive_logical_prop(&self, context: &DeriveContext) -> OptResult<LogicalProperty> {
        let input = context.input_prop(0)?;
        let mut fields = Vec::with_capacity(self.group_by.len() + self.aggr_exprs.len());
        for column in &self.group_by {
            fields.push(input.schema().field_from_column(column)?.clone());
        }
        fields.extend(
            self.aggr_exprs
                .iter()
                .map(|e| e.to_field(input.schema()))
                .collect::<DFResult<Vec<DFField>>>()?,
        );
        let schema = DFSchema::new_with_metadata(fields, input.schema().metadata().clone())?;

        let group_by: ColRefSet = self.group_by.iter().cloned().collect();
        let mut used = ColRefSet::from_exprs(&self.aggr_exprs)?;
        used.extend(&group_by);

        let (max_card, keys) = if self.group_by.is_empty() {
            (MaxCard::Bounded(1), vec![])
        } else {
            (input.max_card(), vec![group_by.clone()])
        };

        Ok(LogicalProperty::new(schema)
            .with_not_null_columns(input.not_null_columns().intersection(&group_by))
            .with_outer_refs(derive_outer_refs(&used, &[input]))
            .with_max_card(max_card)
            .with_keys(keys)
            .with_equivalences(input.equivalences().to_vec()))
    }

    fn derive_statistics(
        &self,
        context: &DeriveContext,
        _logical_prop: &LogicalProperty,
    ) -> OptResult<Statistics> {
        let input = context.input_stat(0)?;
        let groups = self
            .group_by
            .iter()
            .map(|c| input.ndv(c))
            .product::<f64>()
            .min(input.row_count())
            .max(1.0);
        Ok(input.with_row_count(groups))
    }

    fn candidate_rules(&self) -> EnumSet<RuleId> {
        RuleId::GbAgg2HashAgg | RuleId::GbAgg2StreamAgg
    }
}

impl DisplayFields for GbAgg {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("")
            .field(
                "group_by",
                &self
                    .group_by
                    .iter()
                    .map(|c| c.flat_name())
                    .collect::<Vec<_>>(),
            )
            .field("aggr_exprs", &self.aggr_exprs)
            .finish()
    }
}
