use thiserror::Error;

pub type OptResult<T> = anyhow::Result<T>;
pub type DFResult<T> = datafusion_common::Result<T>;

/// Failures callers of the optimizer need to tell apart.
///
/// Errors travel as [`anyhow::Error`], use `downcast_ref::<OptimizerError>()` to inspect them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizerError {
    #[error("No plan found for group {group} with required properties {required}")]
    NoPlanFound { group: String, required: String },
    #[error("Optimization cancelled: {reason}")]
    Cancelled { reason: String },
    #[error("Cost model returned invalid cost {cost} for {operator}")]
    InvalidCost { operator: String, cost: f64 },
    #[error("Cost parameter {name} value {value} is out of range [{lower}, {upper}]")]
    InvalidCostParam {
        name: String,
        value: f64,
        lower: f64,
        upper: f64,
    },
    #[error("Table {0} not found in catalog")]
    TableNotFound(String),
    #[error("Pattern mismatch in rule {0}")]
    PatternMismatch(String),
}

impl OptimizerError {
    pub fn is_cancelled(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<OptimizerError>(),
            Some(OptimizerError::Cancelled { .. })
        )
    }

    pub fn is_no_plan_found(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<OptimizerError>(),
            Some(OptimizerError::NoPlanFound { .. })
        )
    }
}
