//! Defines cost model.
//!
//! The optimizer only relies on the [`CostModel`] trait, [`DefaultCostModel`] is the bundled
//! implementation.

mod default;
pub use default::*;

use std::fmt::{Display, Formatter};

use derive_more::{Add, AddAssign, Sub, SubAssign, Sum};

use crate::error::{OptResult, OptimizerError};
use crate::operator::PhysicalOperator;
use crate::properties::DeliveredPropertySet;
use crate::stat::Statistics;

pub const INF: Cost = Cost(f64::INFINITY);

#[derive(Copy, Clone, Debug, Default, PartialOrd, PartialEq, Add, Sub, Sum, AddAssign, SubAssign)]
pub struct Cost(f64);

impl From<f64> for Cost {
    fn from(c: f64) -> Self {
        Cost(c)
    }
}

impl Cost {
    pub fn value(&self) -> f64 {
        self.0
    }

    /// A cost is valid when it's finite and not negative.
    pub fn validate(self, operator: &PhysicalOperator) -> OptResult<Cost> {
        if self.0.is_finite() && self.0 >= 0.0 {
            Ok(self)
        } else {
            Err(OptimizerError::InvalidCost {
                operator: operator.as_ref().to_string(),
                cost: self.0,
            }
            .into())
        }
    }
}

impl Display for Cost {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Everything a cost model may look at when costing one plan alternative.
pub struct CostContext<'a> {
    pub operator: &'a PhysicalOperator,
    /// Statistics of the operator's output.
    pub stats: &'a Statistics,
    pub input_stats: Vec<&'a Statistics>,
    /// Total costs of the chosen input plans.
    pub input_costs: Vec<Cost>,
    pub delivered: &'a DeliveredPropertySet,
    pub input_delivered: &'a [DeliveredPropertySet],
}

impl<'a> CostContext<'a> {
    pub fn input_costs_sum(&self) -> Cost {
        self.input_costs.iter().copied().sum()
    }

    pub fn input_rows(&self, idx: usize) -> f64 {
        self.input_stats
            .get(idx)
            .map(|s| s.row_count())
            .unwrap_or(0.0)
    }
}

pub trait CostModel: Send + Sync {
    /// Total cost of the plan rooted at `context.operator`, inputs included.
    fn cost(&self, context: &CostContext) -> OptResult<Cost>;
}
