use std::sync::Arc;

use arrow_schema::Schema;
use datafusion::catalog::schema::{MemorySchemaProvider, SchemaProvider};
use datafusion::datasource::empty::EmptyTable;
use datafusion::datasource::TableProvider;

use crate::cascades::{Binding, Memo};
use crate::config::OptimizerConfig;
use crate::optimizer::OptimizerContext;
use crate::plan::Plan;
use crate::rules::{OptExpression, Pattern};

/// t1 is hashed on its key `a`.
const T1_SCHEMA_JSON: &str = r#"{
    "fields": [
        {"name": "a", "nullable": false, "data_type": "Int64", "dict_id": 0, "dict_is_ordered": false, "metadata": {}},
        {"name": "b", "nullable": true, "data_type": "Int64", "dict_id": 0, "dict_is_ordered": false, "metadata": {}},
        {"name": "c", "nullable": true, "data_type": "Int64", "dict_id": 0, "dict_is_ordered": false, "metadata": {}}
    ],
    "metadata": {"distributed_by": "a", "primary_key": "a"}
}"#;

/// t2 has no distribution policy.
const T2_SCHEMA_JSON: &str = r#"{
    "fields": [
        {"name": "a", "nullable": true, "data_type": "Int64", "dict_id": 0, "dict_is_ordered": false, "metadata": {}},
        {"name": "b", "nullable": true, "data_type": "Int64", "dict_id": 0, "dict_is_ordered": false, "metadata": {}},
        {"name": "c", "nullable": true, "data_type": "Int64", "dict_id": 0, "dict_is_ordered": false, "metadata": {}}
    ],
    "metadata": {}
}"#;

const T3_SCHEMA_JSON: &str = r#"{
    "fields": [
        {"name": "a", "nullable": true, "data_type": "Int64", "dict_id": 0, "dict_is_ordered": false, "metadata": {}},
        {"name": "b", "nullable": true, "data_type": "Int64", "dict_id": 0, "dict_is_ordered": false, "metadata": {}},
        {"name": "c", "nullable": true, "data_type": "Int64", "dict_id": 0, "dict_is_ordered": false, "metadata": {}}
    ],
    "metadata": {"distributed_by": "b"}
}"#;

pub fn table_provider_from_schema(json: &str) -> Arc<dyn TableProvider> {
    let schema: Schema = serde_json::from_str(json).unwrap();
    Arc::new(EmptyTable::new(Arc::new(schema)))
}

pub fn catalog_for_test() -> Arc<dyn SchemaProvider> {
    let catalog = MemorySchemaProvider::new();
    for (name, json) in [
        ("t1", T1_SCHEMA_JSON),
        ("t2", T2_SCHEMA_JSON),
        ("t3", T3_SCHEMA_JSON),
    ] {
        catalog
            .register_table(name.to_string(), table_provider_from_schema(json))
            .unwrap();
    }
    Arc::new(catalog)
}

pub fn context_for_test() -> OptimizerContext {
    OptimizerContext::new(catalog_for_test(), OptimizerConfig::default()).unwrap()
}

pub fn memo_for_test(plan: Plan) -> Memo {
    Memo::try_new(plan, context_for_test()).unwrap()
}

/// Binds `pattern` against root expression of memo.
pub fn bind_root(memo: &Memo, pattern: &Pattern) -> Vec<OptExpression<Memo>> {
    Binding::new(memo, pattern).bind(memo.root_expr_id())
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
