use std::fmt::Formatter;

use datafusion_common::Column;

use crate::operator::{DerivePropContext, DisplayFields, PhysicalOperator};
use crate::properties::{
    DeliveredPropertySet, DistributionSpec, OrderSpec, PartitionConsumers,
    PartitionPropagationSpec, PhysicalPropertySet, PropertyKind, RewindabilitySpec,
};

/// Sorts its input.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Sort {
    order: OrderSpec,
}

impl Sort {
    pub fn new(order: OrderSpec) -> Self {
        Self { order }
    }

    pub fn order(&self) -> &OrderSpec {
        &self.order
    }

    pub(super) fn delivered(&self, context: &DerivePropContext) -> DeliveredPropertySet {
        let input = context.input(0);
        DeliveredPropertySet::new(input.distribution().clone())
            .with_order(self.order.clone())
            .with_rewindability(RewindabilitySpec::Rewindable)
            .with_partition_consumers(input.partition_consumers().clone())
    }
}

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum MotionKind {
    /// Sends all rows to one segment.
    Gather,
    /// Sends every row to all segments.
    Broadcast,
    /// Sends rows to segments by hash of columns.
    Redistribute(Vec<Column>),
    /// Sends rows to random segments.
    Random,
}

/// Moves rows between segments.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Motion {
    kind: MotionKind,
}

impl Motion {
    pub fn new(kind: MotionKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> &MotionKind {
        &self.kind
    }

    pub fn distribution(&self) -> DistributionSpec {
        match &self.kind {
            MotionKind::Gather => DistributionSpec::Singleton,
            MotionKind::Broadcast => DistributionSpec::Replicated,
            MotionKind::Redistribute(columns) => DistributionSpec::Hashed(columns.clone()),
            MotionKind::Random => DistributionSpec::Random,
        }
    }

    /// Motions destroy order and can't be rewound, and partition selection can't happen on
    /// the other side of a motion.
    pub(super) fn required_of_child(required: &PhysicalPropertySet) -> PhysicalPropertySet {
        required
            .without_distribution()
            .without_order()
            .without_rewindability()
            .with_partition(PartitionPropagationSpec::ResolveAll)
    }

    pub(super) fn delivered(&self, context: &DerivePropContext) -> DeliveredPropertySet {
        DeliveredPropertySet::new(self.distribution())
            .with_rewindability(RewindabilitySpec::NotRewindable)
            .with_partition_consumers(context.input(0).partition_consumers().clone())
    }
}

/// Materializes its input so that it can be rescanned.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Default)]
pub struct Spool;

impl Spool {
    pub(super) fn delivered(&self, context: &DerivePropContext) -> DeliveredPropertySet {
        context
            .input(0)
            .with_rewindability(RewindabilitySpec::Rewindable)
    }
}

/// Resolves partitions to scan of partitioned tables below it.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct PartitionSelector {
    consumers: PartitionConsumers,
}

impl PartitionSelector {
    pub fn new(consumers: PartitionConsumers) -> Self {
        Self { consumers }
    }

    pub fn consumers(&self) -> &PartitionConsumers {
        &self.consumers
    }

    pub(super) fn delivered(&self, context: &DerivePropContext) -> DeliveredPropertySet {
        let input = context.input(0);
        let remaining = input.partition_consumers().resolve(&self.consumers);
        input.with_partition_consumers(remaining)
    }
}

/// Enforcer making a plan delivering `delivered` satisfy `kind` of `required`.
pub(crate) fn enforcer_for(
    kind: PropertyKind,
    required: &PhysicalPropertySet,
    delivered: &DeliveredPropertySet,
) -> Option<PhysicalOperator> {
    match kind {
        PropertyKind::Order => Some(PhysicalOperator::PhysicalSort(Sort::new(
            required.order().clone(),
        ))),
        PropertyKind::Rewindability => Some(PhysicalOperator::PhysicalSpool(Spool)),
        PropertyKind::Partition => Some(PhysicalOperator::PhysicalPartitionSelector(
            PartitionSelector::new(delivered.partition_consumers().clone()),
        )),
        PropertyKind::Distribution => {
            let kind = match required.distribution() {
                DistributionSpec::Singleton => MotionKind::Gather,
                DistributionSpec::Replicated => MotionKind::Broadcast,
                DistributionSpec::Hashed(columns) => MotionKind::Redistribute(columns.clone()),
                DistributionSpec::Random => MotionKind::Random,
                DistributionSpec::Any | DistributionSpec::Universal => return None,
            };
            Some(PhysicalOperator::PhysicalMotion(Motion::new(kind)))
        }
    }
}

impl DisplayFields for Sort {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("")
            .field("order", &format!("{}", self.order))
            .finish()
    }
}

impl DisplayFields for Motion {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("")
            .field("distribution", &format!("{}", self.distribution()))
            .finish()
    }
}

impl DisplayFields for Spool {
    fn display(&self, _f: &mut Formatter<'_>) -> std::fmt::Result {
        Ok(())
    }
}

impl DisplayFields for PartitionSelector {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("")
            .field(
                "tables",
                &self.consumers.tables().map(|t| t.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::operator::PhysicalOperator::{PhysicalMotion, PhysicalPartitionSelector};
    use crate::operator::{enforcer_for, Motion, MotionKind};
    use crate::properties::PropertyKind::{Distribution, Partition};
    use crate::properties::{
        DeliveredPropertySet, DistributionSpec, PartitionConsumers, PartitionPropagationSpec,
        PhysicalPropertySet,
    };
    use crate::name::Name;
    use datafusion_common::Column;

    #[test]
    fn test_enforcer_for_distribution() {
        let a = Column::from_qualified_name("t1.a");
        let delivered = DeliveredPropertySet::new(DistributionSpec::Random);
        let required =
            PhysicalPropertySet::new().with_distribution(DistributionSpec::Hashed(vec![a.clone()]));

        assert_eq!(
            Some(PhysicalMotion(Motion::new(MotionKind::Redistribute(vec![a])))),
            enforcer_for(Distribution, &required, &delivered)
        );
        assert_eq!(
            Some(PhysicalMotion(Motion::new(MotionKind::Gather))),
            enforcer_for(Distribution, &PhysicalPropertySet::singleton(), &delivered)
        );
        assert_eq!(
            None,
            enforcer_for(
                Distribution,
                &PhysicalPropertySet::new().with_distribution(DistributionSpec::Universal),
                &delivered
            )
        );
    }

    #[test]
    fn test_partition_selector_resolves_consumers() {
        let delivered = DeliveredPropertySet::new(DistributionSpec::Random)
            .with_partition_consumers(PartitionConsumers::new(vec![Name::new("t3")]));
        let required =
            PhysicalPropertySet::new().with_partition(PartitionPropagationSpec::ResolveAll);

        let selector = enforcer_for(Partition, &required, &delivered)
            .and_then(|op| op.into_physical_partition_selector().ok());
        assert_eq!(
            vec!["t3"],
            selector
                .unwrap()
                .consumers()
                .tables()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_motion_child_requirement() {
        let required = PhysicalPropertySet::singleton();
        let child = Motion::required_of_child(&required);
        assert_eq!(&DistributionSpec::Any, child.distribution());
        assert_eq!(PartitionPropagationSpec::ResolveAll, child.partition());
    }
}
