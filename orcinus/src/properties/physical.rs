use std::fmt::{Display, Formatter};

use crate::properties::{
    ColRefSet, DistributionMatching, DistributionSpec, OrderSpec, PartitionConsumers,
    PartitionPropagationSpec, PhysicalProp, RewindabilitySpec,
};

/// Physical properties required from a plan. It's the key of optimization contexts.
#[derive(Hash, Debug, Clone, Eq, PartialEq, Default)]
pub struct PhysicalPropertySet {
    distribution: DistributionSpec,
    matching: DistributionMatching,
    order: OrderSpec,
    rewindability: RewindabilitySpec,
    partition: PartitionPropagationSpec,
}

/// Physical properties delivered by a plan.
#[derive(Hash, Debug, Clone, Eq, PartialEq, Default)]
pub struct DeliveredPropertySet {
    distribution: DistributionSpec,
    order: OrderSpec,
    rewindability: RewindabilitySpec,
    partition_consumers: PartitionConsumers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Partition,
    Distribution,
    Rewindability,
    Order,
}

pub const ALL_PROPERTY_KINDS: [PropertyKind; 4] = [
    PropertyKind::Partition,
    PropertyKind::Distribution,
    PropertyKind::Rewindability,
    PropertyKind::Order,
];

/// Decision of comparing a delivered property with the required one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcingType {
    /// Delivered property already satisfies requirement.
    Unnecessary,
    /// An enforcer must be added on top of the plan.
    Required,
    /// The plan can't be used for this requirement.
    Prohibited,
}

impl PhysicalPropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn singleton() -> Self {
        Self::default().with_distribution(DistributionSpec::Singleton)
    }

    pub fn with_distribution(mut self, distribution: DistributionSpec) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn with_matching(mut self, matching: DistributionMatching) -> Self {
        self.matching = matching;
        self
    }

    pub fn with_order(mut self, order: OrderSpec) -> Self {
        self.order = order;
        self
    }

    pub fn with_rewindability(mut self, rewindability: RewindabilitySpec) -> Self {
        self.rewindability = rewindability;
        self
    }

    pub fn with_partition(mut self, partition: PartitionPropagationSpec) -> Self {
        self.partition = partition;
        self
    }

    pub fn distribution(&self) -> &DistributionSpec {
        &self.distribution
    }

    pub fn matching(&self) -> DistributionMatching {
        self.matching
    }

    pub fn order(&self) -> &OrderSpec {
        &self.order
    }

    pub fn rewindability(&self) -> RewindabilitySpec {
        self.rewindability
    }

    pub fn partition(&self) -> PartitionPropagationSpec {
        self.partition
    }

    pub fn without_order(&self) -> Self {
        self.clone().with_order(OrderSpec::default())
    }

    pub fn without_distribution(&self) -> Self {
        self.clone()
            .with_distribution(DistributionSpec::Any)
            .with_matching(DistributionMatching::Satisfy)
    }

    pub fn without_rewindability(&self) -> Self {
        self.clone()
            .with_rewindability(RewindabilitySpec::NotRewindable)
    }

    pub fn without_partition(&self) -> Self {
        self.clone()
            .with_partition(PartitionPropagationSpec::NotRequired)
    }

    /// Keeps only order and partition requirement, the parts a unary operator usually passes
    /// through to its child.
    pub fn pass_thru(&self) -> Self {
        Self::default()
            .with_order(self.order.clone())
            .with_partition(self.partition)
    }

    pub fn enforcing_type(
        &self,
        kind: PropertyKind,
        delivered: &DeliveredPropertySet,
        equivalences: &[ColRefSet],
    ) -> EnforcingType {
        let satisfied = match kind {
            PropertyKind::Order => delivered.order.satisfies(&self.order),
            PropertyKind::Distribution => delivered.distribution.satisfies_with(
                &self.distribution,
                self.matching,
                equivalences,
            ),
            PropertyKind::Rewindability => delivered.rewindability.satisfies(&self.rewindability),
            PropertyKind::Partition => self.partition.is_satisfied_by(&delivered.partition_consumers),
        };

        if satisfied {
            EnforcingType::Unnecessary
        } else if kind == PropertyKind::Distribution && !self.distribution.is_enforceable() {
            EnforcingType::Prohibited
        } else {
            EnforcingType::Required
        }
    }

    pub fn is_satisfied_by(
        &self,
        delivered: &DeliveredPropertySet,
        equivalences: &[ColRefSet],
    ) -> bool {
        ALL_PROPERTY_KINDS
            .iter()
            .all(|kind| self.enforcing_type(*kind, delivered, equivalences) == EnforcingType::Unnecessary)
    }
}

impl Display for PhysicalPropertySet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{dist: {} {:?}, order: {}, rewind: {:?}, partition: {:?}}}",
            self.distribution, self.matching, self.order, self.rewindability, self.partition
        )
    }
}

impl DeliveredPropertySet {
    pub fn new(distribution: DistributionSpec) -> Self {
        Self {
            distribution,
            ..Default::default()
        }
    }

    pub fn with_distribution(mut self, distribution: DistributionSpec) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn with_order(mut self, order: OrderSpec) -> Self {
        self.order = order;
        self
    }

    pub fn with_rewindability(mut self, rewindability: RewindabilitySpec) -> Self {
        self.rewindability = rewindability;
        self
    }

    pub fn with_partition_consumers(mut self, consumers: PartitionConsumers) -> Self {
        self.partition_consumers = consumers;
        self
    }

    pub fn distribution(&self) -> &DistributionSpec {
        &self.distribution
    }

    pub fn order(&self) -> &OrderSpec {
        &self.order
    }

    pub fn rewindability(&self) -> RewindabilitySpec {
        self.rewindability
    }

    pub fn partition_consumers(&self) -> &PartitionConsumers {
        &self.partition_consumers
    }
}

impl Display for DeliveredPropertySet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{dist: {}, order: {}, rewind: {:?}}}",
            self.distribution, self.order, self.rewindability
        )
    }
}
