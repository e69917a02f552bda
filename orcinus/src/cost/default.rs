use std::collections::HashMap;

use log::trace;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, EnumIter};

use crate::cost::{Cost, CostContext, CostModel};
use crate::error::{OptResult, OptimizerError};
use crate::operator::PhysicalOperator;
use crate::operator::PhysicalOperator::*;
use crate::properties::DistributionSpec;

/// Tunable unit costs of [`DefaultCostModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, EnumIter)]
pub enum CostParamId {
    ScanTupleCost,
    FilterTupleCost,
    ComputeScalarTupleCost,
    HashBuildTupleCost,
    HashProbeTupleCost,
    NLJoinTupleCost,
    HashAggTupleCost,
    StreamAggTupleCost,
    SortTupleCost,
    NetworkTupleCost,
    SpoolTupleCost,
    PartitionSelectorTupleCost,
    LimitTupleCost,
}

impl CostParamId {
    fn default_param(self) -> CostParam {
        let value = match self {
            CostParamId::ScanTupleCost => 1.0,
            CostParamId::FilterTupleCost => 0.2,
            CostParamId::ComputeScalarTupleCost => 0.1,
            CostParamId::HashBuildTupleCost => 1.5,
            CostParamId::HashProbeTupleCost => 0.5,
            CostParamId::NLJoinTupleCost => 0.05,
            CostParamId::HashAggTupleCost => 1.0,
            CostParamId::StreamAggTupleCost => 0.3,
            CostParamId::SortTupleCost => 0.5,
            CostParamId::NetworkTupleCost => 2.0,
            CostParamId::SpoolTupleCost => 0.2,
            CostParamId::PartitionSelectorTupleCost => 0.01,
            CostParamId::LimitTupleCost => 0.01,
        };
        CostParam::new(self, value, 0.0, 1000.0)
    }
}

/// One cost model parameter and its accepted range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostParam {
    pub id: CostParamId,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

impl CostParam {
    pub fn new(id: CostParamId, value: f64, lower: f64, upper: f64) -> Self {
        Self {
            id,
            value,
            lower,
            upper,
        }
    }

    fn validate(&self) -> OptResult<()> {
        if self.lower <= self.value && self.value <= self.upper {
            Ok(())
        } else {
            Err(OptimizerError::InvalidCostParam {
                name: self.id.as_ref().to_string(),
                value: self.value,
                lower: self.lower,
                upper: self.upper,
            }
            .into())
        }
    }
}

/// Cost model charging per-tuple unit costs, with distributed work divided by segments.
#[derive(Debug, Clone)]
pub struct DefaultCostModel {
    segments: usize,
    params: HashMap<CostParamId, CostParam>,
}

impl DefaultCostModel {
    pub fn new(segments: usize) -> Self {
        Self {
            segments: segments.max(1),
            params: CostParamId::iter()
                .map(|id| (id, id.default_param()))
                .collect(),
        }
    }

    /// Overrides parameters, nothing is changed if any of them is invalid.
    pub fn set_params(&mut self, params: &[CostParam]) -> OptResult<()> {
        for param in params {
            param.validate()?;
        }
        for param in params {
            self.params.insert(param.id, *param);
        }
        Ok(())
    }

    pub fn param(&self, id: CostParamId) -> f64 {
        self.params
            .get(&id)
            .map(|p| p.value)
            .unwrap_or_else(|| id.default_param().value)
    }

    pub fn segments(&self) -> usize {
        self.segments
    }

    /// Per segment share of `rows` for an operator delivering `distribution`.
    fn per_segment(&self, rows: f64, distribution: &DistributionSpec) -> f64 {
        match distribution {
            DistributionSpec::Hashed(_) | DistributionSpec::Random => rows / self.segments as f64,
            _ => rows,
        }
    }

    fn local_cost(&self, context: &CostContext) -> f64 {
        let output_rows = context.stats.row_count();
        let outer_rows = context.input_rows(0);
        let inner_rows = context.input_rows(1);
        let distribution = context.delivered.distribution();

        let work = match context.operator {
            PhysicalTableScan(_) => output_rows * self.param(CostParamId::ScanTupleCost),
            PhysicalFilter(_) => outer_rows * self.param(CostParamId::FilterTupleCost),
            PhysicalComputeScalar(_) => {
                outer_rows * self.param(CostParamId::ComputeScalarTupleCost)
            }
            PhysicalHashJoin(_) => {
                inner_rows * self.param(CostParamId::HashBuildTupleCost)
                    + outer_rows * self.param(CostParamId::HashProbeTupleCost)
            }
            PhysicalNLJoin(_) | PhysicalCorrelatedNLJoin(_) => {
                outer_rows * inner_rows.max(1.0) * self.param(CostParamId::NLJoinTupleCost)
            }
            PhysicalHashAgg(_) => outer_rows * self.param(CostParamId::HashAggTupleCost),
            PhysicalStreamAgg(_) => outer_rows * self.param(CostParamId::StreamAggTupleCost),
            PhysicalLimit(_) => output_rows * self.param(CostParamId::LimitTupleCost),
            PhysicalSort(_) => {
                outer_rows * outer_rows.max(2.0).log2() * self.param(CostParamId::SortTupleCost)
            }
            PhysicalMotion(_) => {
                // Broadcast sends every row to every segment.
                let copies = match distribution {
                    DistributionSpec::Replicated => self.segments as f64,
                    _ => 1.0,
                };
                return outer_rows * copies * self.param(CostParamId::NetworkTupleCost);
            }
            PhysicalSpool(_) => outer_rows * self.param(CostParamId::SpoolTupleCost),
            PhysicalPartitionSelector(_) => {
                outer_rows * self.param(CostParamId::PartitionSelectorTupleCost)
            }
        };

        self.per_segment(work, distribution)
    }

    fn operator_name(operator: &PhysicalOperator) -> &str {
        operator.as_ref()
    }
}

impl CostModel for DefaultCostModel {
    fn cost(&self, context: &CostContext) -> OptResult<Cost> {
        let local = self.local_cost(context);
        trace!(
            "Local cost of {} is {}",
            Self::operator_name(context.operator),
            local
        );
        Ok(Cost::from(local) + context.input_costs_sum())
    }
}

#[cfg(test)]
mod tests {
    use crate::cost::{CostContext, CostModel, CostParam, CostParamId, DefaultCostModel};
    use crate::error::OptimizerError;
    use crate::name::Name;
    use crate::operator::PhysicalOperator::{PhysicalMotion, PhysicalTableScan};
    use crate::operator::{Get, Motion, MotionKind};
    use crate::properties::{DeliveredPropertySet, DistributionSpec};
    use crate::stat::Statistics;

    #[test]
    fn test_reject_out_of_range_param() {
        let mut model = DefaultCostModel::new(3);
        let result = model.set_params(&[
            CostParam::new(CostParamId::SortTupleCost, 0.7, 0.0, 1.0),
            CostParam::new(CostParamId::NetworkTupleCost, 5.0, 0.0, 1.0),
        ]);

        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OptimizerError>(),
            Some(OptimizerError::InvalidCostParam { name, .. }) if name == "NetworkTupleCost"
        ));
        // Nothing applied
        assert_eq!(0.5, model.param(CostParamId::SortTupleCost));

        model
            .set_params(&[CostParam::new(CostParamId::SortTupleCost, 0.7, 0.0, 1.0)])
            .unwrap();
        assert_eq!(0.7, model.param(CostParamId::SortTupleCost));
    }

    #[test]
    fn test_scan_cost_divided_by_segments() {
        let model = DefaultCostModel::new(4);
        let stats = Statistics::new(1000.0);
        let scan = PhysicalTableScan(Get::new(Name::new("t1")));

        let distributed = DeliveredPropertySet::new(DistributionSpec::Random);
        let cost = model
            .cost(&CostContext {
                operator: &scan,
                stats: &stats,
                input_stats: vec![],
                input_costs: vec![],
                delivered: &distributed,
                input_delivered: &[],
            })
            .unwrap();
        assert_eq!(250.0, cost.value());

        let singleton = DeliveredPropertySet::new(DistributionSpec::Singleton);
        let cost = model
            .cost(&CostContext {
                operator: &scan,
                stats: &stats,
                input_stats: vec![],
                input_costs: vec![],
                delivered: &singleton,
                input_delivered: &[],
            })
            .unwrap();
        assert_eq!(1000.0, cost.value());
    }

    #[test]
    fn test_broadcast_more_expensive_than_gather() {
        let model = DefaultCostModel::new(3);
        let stats = Statistics::new(100.0);
        let input_stats = Statistics::new(100.0);
        let cost_of = |kind: MotionKind, delivered: DeliveredPropertySet| {
            let motion = PhysicalMotion(Motion::new(kind));
            model
                .cost(&CostContext {
                    operator: &motion,
                    stats: &stats,
                    input_stats: vec![&input_stats],
                    input_costs: vec![1.0.into()],
                    delivered: &delivered,
                    input_delivered: &[],
                })
                .unwrap()
        };

        let gather = cost_of(
            MotionKind::Gather,
            DeliveredPropertySet::new(DistributionSpec::Singleton),
        );
        let broadcast = cost_of(
            MotionKind::Broadcast,
            DeliveredPropertySet::new(DistributionSpec::Replicated),
        );
        assert_eq!(201.0, gather.value());
        assert!(broadcast > gather);
    }
}
