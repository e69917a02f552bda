use std::fmt::{Display, Formatter};

use enum_as_inner::EnumAsInner;
use strum_macros::AsRefStr;

use crate::error::OptResult;
use crate::operator::{
    Apply, DisplayFields, GbAgg, Get, Join, Limit, Motion, PartitionSelector, Project, Select,
    Sort, Spool,
};
use crate::optimizer::OptimizerContext;
use crate::operator::PhysicalOperator::*;
use crate::properties::{
    ColRefSet, DeliveredPropertySet, DistributionMatching, DistributionSpec, EnforcingType,
    LogicalProperty, PartitionConsumers, PhysicalPropertySet, PropertyKind,
};

/// Physical relational operator.
///
/// Several physical operators share the payload of their logical counterpart, e.g. both hash
/// join and nested loop join carry a [`Join`].
#[derive(Clone, Debug, Hash, Eq, PartialEq, EnumAsInner, AsRefStr)]
pub enum PhysicalOperator {
    PhysicalTableScan(Get),
    PhysicalFilter(Select),
    PhysicalComputeScalar(Project),
    PhysicalHashJoin(Join),
    PhysicalNLJoin(Join),
    PhysicalCorrelatedNLJoin(Apply),
    PhysicalHashAgg(GbAgg),
    PhysicalStreamAgg(GbAgg),
    PhysicalLimit(Limit),
    PhysicalSort(Sort),
    PhysicalMotion(Motion),
    PhysicalSpool(Spool),
    PhysicalPartitionSelector(PartitionSelector),
}

/// Inputs for computing required property of one child.
pub struct RequiredPropContext<'a> {
    pub required: &'a PhysicalPropertySet,
    /// Index of optimization request, less than [`PhysicalOperatorTrait::request_count`].
    pub request: usize,
    pub child: usize,
    /// Delivered properties of children optimized before `child`, indexed by child.
    pub delivered: &'a [Option<DeliveredPropertySet>],
    pub input_props: &'a [&'a LogicalProperty],
}

impl<'a> RequiredPropContext<'a> {
    pub fn delivered_of(&self, child: usize) -> Option<&DeliveredPropertySet> {
        self.delivered.get(child).and_then(|d| d.as_ref())
    }

    pub fn input_output(&self, child: usize) -> ColRefSet {
        self.input_props
            .get(child)
            .map(|p| p.output_columns().clone())
            .unwrap_or_default()
    }
}

pub struct DerivePropContext<'a> {
    pub optimizer_context: &'a OptimizerContext,
    pub input_delivered: &'a [DeliveredPropertySet],
}

impl<'a> DerivePropContext<'a> {
    pub fn input(&self, idx: usize) -> DeliveredPropertySet {
        self.input_delivered.get(idx).cloned().unwrap_or_default()
    }

    /// Partition consumers of all inputs.
    pub fn combined_consumers(&self) -> PartitionConsumers {
        self.input_delivered
            .iter()
            .fold(PartitionConsumers::default(), |acc, d| {
                acc.combine(d.partition_consumers())
            })
    }
}

pub trait PhysicalOperatorTrait {
    /// Number of alternative ways of requesting properties from children.
    fn request_count(&self) -> usize {
        1
    }

    /// Order in which children are optimized.
    fn child_order(&self, arity: usize) -> Vec<usize> {
        (0..arity).collect()
    }

    /// Required property of one child, `None` if the request can't be satisfied by the
    /// children optimized so far.
    fn required_prop(&self, context: &RequiredPropContext) -> OptResult<Option<PhysicalPropertySet>>;

    /// Properties delivered given properties delivered by children.
    fn derive_delivered(&self, context: &DerivePropContext) -> OptResult<DeliveredPropertySet>;

    fn enforcing_type(
        &self,
        kind: PropertyKind,
        required: &PhysicalPropertySet,
        delivered: &DeliveredPropertySet,
        equivalences: &[ColRefSet],
    ) -> EnforcingType;
}

impl PhysicalOperator {
    pub fn is_enforcer(&self) -> bool {
        matches!(
            self,
            PhysicalSort(_) | PhysicalMotion(_) | PhysicalSpool(_) | PhysicalPartitionSelector(_)
        )
    }

    /// Property kind enforced by this operator.
    pub fn enforced_kind(&self) -> Option<PropertyKind> {
        match self {
            PhysicalSort(_) => Some(PropertyKind::Order),
            PhysicalMotion(_) => Some(PropertyKind::Distribution),
            PhysicalSpool(_) => Some(PropertyKind::Rewindability),
            PhysicalPartitionSelector(_) => Some(PropertyKind::Partition),
            _ => None,
        }
    }
}

impl PhysicalOperatorTrait for PhysicalOperator {
    fn request_count(&self) -> usize {
        match self {
            PhysicalHashJoin(_) => 3,
            PhysicalNLJoin(_) | PhysicalCorrelatedNLJoin(_) => 2,
            PhysicalHashAgg(_) | PhysicalStreamAgg(_) => 2,
            _ => 1,
        }
    }

    fn required_prop(&self, context: &RequiredPropContext) -> OptResult<Option<PhysicalPropertySet>> {
        match self {
            PhysicalTableScan(_) => Ok(None),
            PhysicalFilter(_) => Ok(Some(context.required.clone())),
            PhysicalComputeScalar(_) => Ok(Some(required_by_projection(context))),
            PhysicalHashJoin(join) => join.hash_join_required(context),
            PhysicalNLJoin(join) => join.nl_join_required(context),
            PhysicalCorrelatedNLJoin(apply) => apply.correlated_nl_join_required(context),
            PhysicalHashAgg(agg) => Ok(Some(agg.hash_agg_required(context))),
            PhysicalStreamAgg(agg) => Ok(Some(agg.stream_agg_required(context))),
            PhysicalLimit(_) => Ok(Some(
                context
                    .required
                    .clone()
                    .with_distribution(DistributionSpec::Singleton)
                    .with_matching(DistributionMatching::Satisfy),
            )),
            PhysicalSort(_) => Ok(Some(context.required.without_order())),
            PhysicalMotion(_) => Ok(Some(Motion::required_of_child(context.required))),
            PhysicalSpool(_) => Ok(Some(context.required.without_rewindability())),
            PhysicalPartitionSelector(_) => Ok(Some(context.required.without_partition())),
        }
    }

    fn derive_delivered(&self, context: &DerivePropContext) -> OptResult<DeliveredPropertySet> {
        match self {
            PhysicalTableScan(get) => get.table_scan_delivered(context),
            PhysicalFilter(_) | PhysicalComputeScalar(_) | PhysicalLimit(_) => Ok(context.input(0)),
            PhysicalHashJoin(_) => Ok(Join::hash_join_delivered(context)),
            PhysicalNLJoin(_) | PhysicalCorrelatedNLJoin(_) => Ok(Join::nl_join_delivered(context)),
            PhysicalHashAgg(_) => Ok(GbAgg::hash_agg_delivered(context)),
            PhysicalStreamAgg(_) => Ok(GbAgg::stream_agg_delivered(context)),
            PhysicalSort(sort) => Ok(sort.delivered(context)),
            PhysicalMotion(motion) => Ok(motion.delivered(context)),
            PhysicalSpool(spool) => Ok(spool.delivered(context)),
            PhysicalPartitionSelector(selector) => Ok(selector.delivered(context)),
        }
    }

    fn enforcing_type(
        &self,
        kind: PropertyKind,
        required: &PhysicalPropertySet,
        delivered: &DeliveredPropertySet,
        equivalences: &[ColRefSet],
    ) -> EnforcingType {
        if let PhysicalMotion(_) = self {
            if kind == PropertyKind::Partition && !delivered.partition_consumers().is_empty() {
                return EnforcingType::Prohibited;
            }
        }

        let enforcing_type = required.enforcing_type(kind, delivered, equivalences);
        // Stacking two enforcers of the same kind never helps.
        if enforcing_type == EnforcingType::Required && self.enforced_kind() == Some(kind) {
            EnforcingType::Prohibited
        } else {
            enforcing_type
        }
    }
}

/// Passes through requirements on columns produced by the projection's child.
fn required_by_projection(context: &RequiredPropContext) -> PhysicalPropertySet {
    let child_columns = context.input_output(0);
    let mut required = context.required.clone();
    if !required.order().columns().is_subset(&child_columns) {
        required = required.without_order();
    }
    if !required.distribution().columns().is_subset(&child_columns) {
        required = required.without_distribution();
    }
    required
}

impl Display for PhysicalOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())?;
        match self {
            PhysicalTableScan(op) => op.display(f),
            PhysicalFilter(op) => op.display(f),
            PhysicalComputeScalar(op) => op.display(f),
            PhysicalHashJoin(op) | PhysicalNLJoin(op) => op.display(f),
            PhysicalCorrelatedNLJoin(op) => op.display(f),
            PhysicalHashAgg(op) | PhysicalStreamAgg(op) => op.display(f),
            PhysicalLimit(op) => op.display(f),
            PhysicalSort(op) => op.display(f),
            PhysicalMotion(op) => op.display(f),
            PhysicalSpool(op) => op.display(f),
            PhysicalPartitionSelector(op) => op.display(f),
        }
    }
}
