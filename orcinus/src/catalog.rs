//! Table descriptors resolved from the catalog.
//!
//! Storage policies are read from arrow schema metadata:
//!
//! * `distributed_by`: comma separated hash distribution columns.
//! * `distributed_replicated`: `"true"` when every segment holds a full copy.
//! * `partitioned`: `"true"` when scans must be preceded by partition selection.
//! * `primary_key`: comma separated key columns.
//!
//! Tables without a distribution policy are randomly distributed.
use std::sync::Arc;

use anyhow::bail;
use arrow_schema::Schema;
use datafusion_common::{Column, DFField, DFSchema};

use crate::error::OptResult;
use crate::name::Name;
use crate::properties::{ColRefSet, DistributionSpec};

pub const DISTRIBUTED_BY_KEY: &str = "distributed_by";
pub const DISTRIBUTED_REPLICATED_KEY: &str = "distributed_replicated";
pub const PARTITIONED_KEY: &str = "partitioned";
pub const PRIMARY_KEY_KEY: &str = "primary_key";

#[derive(Debug, Clone, PartialEq)]
pub struct TableDescriptor {
    name: Name,
    schema: Arc<DFSchema>,
    distribution: DistributionSpec,
    partitioned: bool,
    key: Option<ColRefSet>,
}

impl TableDescriptor {
    pub fn try_new(name: &str, schema: &Schema) -> OptResult<Self> {
        let fields = schema
            .fields()
            .iter()
            .map(|f| DFField::from_qualified(name, f.clone()))
            .collect::<Vec<DFField>>();
        let df_schema = DFSchema::new_with_metadata(fields, schema.metadata().clone())?;

        let metadata = schema.metadata();
        let distribution = if let Some(columns) = metadata.get(DISTRIBUTED_BY_KEY) {
            DistributionSpec::Hashed(Self::parse_columns(name, columns, &df_schema)?)
        } else if is_true(metadata.get(DISTRIBUTED_REPLICATED_KEY)) {
            DistributionSpec::Replicated
        } else {
            DistributionSpec::Random
        };

        let key = match metadata.get(PRIMARY_KEY_KEY) {
            Some(columns) => Some(
                Self::parse_columns(name, columns, &df_schema)?
                    .into_iter()
                    .collect(),
            ),
            None => None,
        };

        Ok(Self {
            name: Name::new(name),
            schema: Arc::new(df_schema),
            distribution,
            partitioned: is_true(metadata.get(PARTITIONED_KEY)),
            key,
        })
    }

    fn parse_columns(table: &str, columns: &str, schema: &DFSchema) -> OptResult<Vec<Column>> {
        let mut result = vec![];
        for column in columns.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let column = Column::from_qualified_name(format!("{table}.{column}"));
            if !schema.has_column(&column) {
                bail!("Column {} of table {} not found in schema", column, table);
            }
            result.push(column);
        }
        Ok(result)
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn schema(&self) -> &Arc<DFSchema> {
        &self.schema
    }

    pub fn distribution(&self) -> &DistributionSpec {
        &self.distribution
    }

    pub fn is_partitioned(&self) -> bool {
        self.partitioned
    }

    pub fn key(&self) -> Option<&ColRefSet> {
        self.key.as_ref()
    }

    pub fn columns(&self) -> Vec<Column> {
        self.schema
            .fields()
            .iter()
            .map(|f| f.qualified_column())
            .collect()
    }
}

fn is_true(value: Option<&String>) -> bool {
    value
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use crate::catalog::{TableDescriptor, DISTRIBUTED_BY_KEY, PRIMARY_KEY_KEY};
    use crate::properties::DistributionSpec;
    use arrow_schema::{DataType, Field, Schema};
    use datafusion::prelude::col;
    use datafusion_common::Column;
    use maplit::hashmap;

    #[test]
    fn test_descriptor_from_metadata() {
        let schema = Schema::new_with_metadata(
            vec![
                Field::new("a", DataType::Int32, false),
                Field::new("b", DataType::Int32, true),
            ],
            hashmap! {
                DISTRIBUTED_BY_KEY.to_string() => "a, b".to_string(),
                PRIMARY_KEY_KEY.to_string() => "a".to_string(),
            },
        );

        let desc = TableDescriptor::try_new("t1", &schema).unwrap();
        assert_eq!(
            &DistributionSpec::Hashed(vec![
                Column::from_qualified_name("t1.a"),
                Column::from_qualified_name("t1.b")
            ]),
            desc.distribution()
        );
        assert!(desc
            .key()
            .unwrap()
            .contains(&Column::from_qualified_name("t1.a")));
        assert!(!desc.is_partitioned());
        assert_eq!(
            vec![col("t1.a"), col("t1.b")],
            desc.columns()
                .into_iter()
                .map(datafusion_expr::Expr::Column)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_unknown_distribution_column() {
        let schema = Schema::new_with_metadata(
            vec![Field::new("a", DataType::Int32, false)],
            hashmap! { DISTRIBUTED_BY_KEY.to_string() => "z".to_string() },
        );

        assert!(TableDescriptor::try_new("t1", &schema).is_err());
    }

    #[test]
    fn test_default_random_distribution() {
        let schema = Schema::new(vec![Field::new("a", DataType::Int32, false)]);
        let desc = TableDescriptor::try_new("t1", &schema).unwrap();
        assert_eq!(&DistributionSpec::Random, desc.distribution());
        assert!(desc.key().is_none());
    }
}
