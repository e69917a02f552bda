use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use datafusion::catalog::schema::{MemorySchemaProvider, SchemaProvider};
use futures::executor::block_on;
use parking_lot::Mutex;

use crate::catalog::TableDescriptor;
use crate::config::OptimizerConfig;
use crate::cost::{CostModel, DefaultCostModel};
use crate::error::{OptResult, OptimizerError};
use crate::operator::Operator;
use crate::properties::LogicalProperty;
use crate::stat::{DefaultStatisticsProvider, StatisticsProvider, Statistics};

/// Shared flag used to abort a running optimization from another thread.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Context for optimization. Includes access to catalog, configuration, cost model and
/// statistics.
#[derive(Clone)]
pub struct OptimizerContext {
    pub catalog: Arc<dyn SchemaProvider>,
    pub config: OptimizerConfig,
    pub cost_model: Arc<dyn CostModel>,
    pub stats_provider: Arc<dyn StatisticsProvider>,
    pub cancellation: CancellationToken,
    tables: Arc<Mutex<HashMap<String, Arc<TableDescriptor>>>>,
}

impl Default for OptimizerContext {
    fn default() -> Self {
        let config = OptimizerConfig::default();
        Self {
            catalog: Arc::new(MemorySchemaProvider::default()),
            cost_model: Arc::new(DefaultCostModel::new(config.segments)),
            stats_provider: Arc::new(DefaultStatisticsProvider::default()),
            config,
            cancellation: CancellationToken::default(),
            tables: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl OptimizerContext {
    /// Creates a context with the default cost model configured by `config`.
    ///
    /// Fails when one of `config.cost_params` is out of its range.
    pub fn new(catalog: Arc<dyn SchemaProvider>, config: OptimizerConfig) -> OptResult<Self> {
        let mut cost_model = DefaultCostModel::new(config.segments);
        cost_model.set_params(&config.cost_params)?;

        Ok(Self {
            catalog,
            config,
            cost_model: Arc::new(cost_model),
            ..Default::default()
        })
    }

    pub fn with_cost_model(mut self, cost_model: Arc<dyn CostModel>) -> Self {
        self.cost_model = cost_model;
        self
    }

    pub fn with_stats_provider(mut self, stats_provider: Arc<dyn StatisticsProvider>) -> Self {
        self.stats_provider = stats_provider;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Resolves a table from catalog, descriptors are cached for the lifetime of the context.
    pub fn table(&self, name: &str) -> OptResult<Arc<TableDescriptor>> {
        if let Some(table) = self.tables.lock().get(name) {
            return Ok(table.clone());
        }

        let provider = block_on(self.catalog.table(name))
            .ok_or_else(|| OptimizerError::TableNotFound(name.to_string()))?;
        let table = Arc::new(TableDescriptor::try_new(name, provider.schema().as_ref())?);
        self.tables
            .lock()
            .insert(name.to_string(), table.clone());
        Ok(table)
    }
}

/// Optimizer interface, as seen by rules.
///
/// The concepts of `group` and `group expression` are borrowed from cascades optimizer. Each
/// `group` consists of several `group expressions`, and all group expressions represents
/// logically same plan, e.g. return same result set.
pub trait Optimizer {
    type GroupHandle: OptGroupHandle;
    type ExprHandle: OptExprHandle;
    type Group: OptGroup;
    type Expr: OptExpr<InputHandle = Self::GroupHandle>;

    fn context(&self) -> &OptimizerContext;
    fn group_at(&self, group_handle: Self::GroupHandle) -> &Self::Group;
    fn expr_at(&self, expr_handle: Self::ExprHandle) -> &Self::Expr;
    /// Group an expression currently belongs to.
    fn expr_group(&self, expr_handle: Self::ExprHandle) -> Self::GroupHandle;
}

pub trait OptExpr {
    type InputHandle: OptGroupHandle;

    fn operator(&self) -> &Operator;
    fn inputs_len(&self) -> usize;
    fn input_at(&self, idx: usize) -> Self::InputHandle;
}

pub trait OptGroup {
    fn logical_prop(&self) -> &LogicalProperty;
    fn statistics(&self) -> &Statistics;
}

pub trait OptExprHandle: Copy + Debug + PartialEq + Eq {}

pub trait OptGroupHandle: Copy + Debug + PartialEq + Eq {}

#[cfg(test)]
mod tests {
    use crate::config::OptimizerConfig;
    use crate::cost::{CostParam, CostParamId};
    use crate::error::OptimizerError;
    use crate::optimizer::{CancellationToken, OptimizerContext};
    use crate::test_utils::catalog_for_test;

    #[test]
    fn test_table_lookup_is_cached() {
        let context = OptimizerContext::new(catalog_for_test(), OptimizerConfig::default()).unwrap();
        let first = context.table("t1").unwrap();
        let second = context.table("t1").unwrap();
        assert!(std::sync::Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_unknown_table() {
        let context = OptimizerContext::new(catalog_for_test(), OptimizerConfig::default()).unwrap();
        let err = context.table("not_exists").unwrap_err();
        assert_eq!(
            Some(&OptimizerError::TableNotFound("not_exists".to_string())),
            err.downcast_ref::<OptimizerError>()
        );
    }

    #[test]
    fn test_reject_out_of_range_cost_param() {
        let config = OptimizerConfig::default().with_cost_params(vec![CostParam::new(
            CostParamId::ScanTupleCost,
            -1.0,
            0.0,
            f64::MAX,
        )]);
        let err = OptimizerContext::new(catalog_for_test(), config).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<OptimizerError>(),
            Some(OptimizerError::InvalidCostParam { .. })
        ));
    }

    #[test]
    fn test_cancellation_token_shared() {
        let token = CancellationToken::default();
        let context = OptimizerContext::default().with_cancellation(token.clone());
        assert!(!context.cancellation.is_cancelled());
        token.cancel();
        assert!(context.cancellation.is_cancelled());
    }
}
