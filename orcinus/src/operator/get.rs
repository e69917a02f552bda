use std::fmt::Formatter;

use enumset::EnumSet;

use crate::error::OptResult;
use crate::name::Name;
use crate::operator::{DeriveContext, DerivePropContext, DisplayFields, LogicalOperatorTrait};
use crate::properties::{
    DeliveredPropertySet, LogicalProperty, PartitionConsumers, RewindabilitySpec,
};
use crate::rules::RuleId;
use crate::stat::{StatPromise, Statistics};

/// Reads a base table.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Get {
    table_name: Name,
}

impl Get {
    pub fn new<N: Into<Name>>(table_name: N) -> Self {
        Self {
            table_name: table_name.into(),
        }
    }

    pub fn table_name(&self) -> &Name {
        &self.table_name
    }

    pub(super) fn table_scan_delivered(
        &self,
        context: &DerivePropContext,
    ) -> OptResult<DeliveredPropertySet> {
        let table = context
            .optimizer_context
            .table(self.table_name.as_str())?;
        let consumers = if table.is_partitioned() {
            PartitionConsumers::new(vec![self.table_name.clone()])
        } else {
            PartitionConsumers::default()
        };

        Ok(DeliveredPropertySet::new(table.distribution().clone())
            .with_rewindability(RewindabilitySpec::Rewindable)
            .with_partition_consumers(consumers))
    }
}

impl LogicalOperatorTrait for Get {
    fn derive_logical_prop(&self, context: &DeriveContext) -> OptResult<LogicalProperty> {
        let table = context
            .optimizer_context
            .table(self.table_name.as_str())?;

        Ok(LogicalProperty::with_schema(table.schema().clone())
            .with_keys(table.key().cloned().into_iter().collect()))
    }

    fn derive_statistics(
        &self,
        context: &DeriveContext,
        _logical_prop: &LogicalProperty,
    ) -> OptResult<Statistics> {
        let table = context
            .optimizer_context
            .table(self.table_name.as_str())?;
        context
            .optimizer_context
            .stats_provider
            .table_statistics(&table)
    }

    fn stat_promise(&self) -> StatPromise {
        StatPromise::High
    }

    fn candidate_rules(&self) -> EnumSet<RuleId> {
        RuleId::Get2TableScan.into()
    }
}

impl DisplayFields for Get {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("")
            .field("table_name", &self.table_name.as_str())
            .finish()
    }
}
