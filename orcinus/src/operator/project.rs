use std::fmt::Formatter;

use datafusion_common::{DFField, DFSchema};
use datafusion_expr::ExprSchemable;
use enumset::EnumSet;

use crate::error::{DFResult, OptResult};
use crate::operator::{DeriveContext, DisplayFields, LogicalOperatorTrait};
use crate::properties::{derive_outer_refs, ColRefSet, LogicalProperty};
use crate::rules::RuleId;
use crate::stat::Statistics;
use crate::Expr;

/// Computes a list of scalar expressions over rows of its child.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Project {
    exprs: Vec<Expr>,
}

impl Project {
    pub fn new<I: IntoIterator<Item = Expr>>(exprs: I) -> Self {
        Self {
            exprs: exprs.into_iter().collect(),
        }
    }

    pub fn exprs(&self) -> &[Expr] {
        &self.exprs
    }

    /// Columns passed through without computation.
    fn bare_columns(&self) -> ColRefSet {
        self.exprs
            .iter()
            .filter_map(|e| match e {
                Expr::Column(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }
}

impl LogicalOperatorTrait for Project {
    fn derive_logical_prop(&self, context: &DeriveContext) -> OptResult<LogicalProperty> {
        let input = context.input_prop(0)?;
        let fields = self
            .exprs
            .iter()
            .map(|e| e.to_field(input.schema()))
            .collect::<DFResult<Vec<DFField>>>()?;
        let schema = DFSchema::new_with_metadata(fields, input.schema().metadata().clone())?;

        let passed = self.bare_columns();
        let used = ColRefSet::from_exprs(&self.exprs)?;
        Ok(LogicalProperty::new(schema)
            .with_not_null_columns(input.not_null_columns().intersection(&passed))
            .with_outer_refs(derive_outer_refs(&used, &[input]))
            .with_max_card(input.max_card())
            .with_keys(input.keys().to_vec())
            .with_equivalences(input.equivalences().to_vec()))
    }

    fn derive_statistics(
        &self,
        context: &DeriveContext,
        _logical_prop: &LogicalProperty,
    ) -> OptResult<Statistics> {
        Ok(context.input_stat(0)?.clone())
    }

    fn candidate_rules(&self) -> EnumSet<RuleId> {
        RuleId::Project2ComputeScalar.into()
    }
}

impl DisplayFields for Project {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("").field("exprs", &self.exprs).finish()
    }
}
