use std::collections::BTreeSet;

use crate::name::Name;

/// Requirement on partition selection of partitioned table scans below.
#[derive(Hash, Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum PartitionPropagationSpec {
    #[default]
    NotRequired,
    /// Every partitioned scan below must be resolved by a partition selector.
    ResolveAll,
}

/// Partitioned tables whose scans have not been resolved by a partition selector yet.
#[derive(Hash, Debug, Clone, Eq, PartialEq, Default)]
pub struct PartitionConsumers {
    tables: BTreeSet<Name>,
}

impl PartitionConsumers {
    pub fn new<I: IntoIterator<Item = Name>>(tables: I) -> Self {
        Self {
            tables: tables.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn tables(&self) -> impl Iterator<Item = &Name> {
        self.tables.iter()
    }

    pub fn combine(&self, other: &PartitionConsumers) -> PartitionConsumers {
        Self {
            tables: self.tables.union(&other.tables).cloned().collect(),
        }
    }

    pub fn resolve(&self, resolved: &PartitionConsumers) -> PartitionConsumers {
        Self {
            tables: self.tables.difference(&resolved.tables).cloned().collect(),
        }
    }
}

impl PartitionPropagationSpec {
    pub fn is_satisfied_by(&self, consumers: &PartitionConsumers) -> bool {
        match self {
            PartitionPropagationSpec::NotRequired => true,
            PartitionPropagationSpec::ResolveAll => consumers.is_empty(),
        }
    }
}
