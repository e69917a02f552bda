use std::fmt::Formatter;

use datafusion_common::ScalarValue;
use enumset::EnumSet;

use crate::error::OptResult;
use crate::operator::{DeriveContext, DisplayFields, LogicalOperatorTrait};
use crate::properties::{
    derive_equivalences, derive_outer_refs, null_rejecting_columns, ColRefSet, LogicalProperty,
    MaxCard,
};
use crate::rules::RuleId;
use crate::stat::{filter_statistics, Statistics};
use crate::Expr;

/// Filters rows of its child.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Select {
    predicate: Expr,
}

impl Select {
    pub fn new(predicate: Expr) -> Self {
        Self { predicate }
    }

    pub fn predicate(&self) -> &Expr {
        &self.predicate
    }
}

impl LogicalOperatorTrait for Select {
    fn derive_logical_prop(&self, context: &DeriveContext) -> OptResult<LogicalProperty> {
        let input = context.input_prop(0)?;
        let used = ColRefSet::from_expr(&self.predicate)?;
        let max_card = match &self.predicate {
            Expr::Literal(ScalarValue::Boolean(Some(false))) => MaxCard::Bounded(0),
            _ => input.max_card(),
        };

        Ok(LogicalProperty::with_schema(input.schema_ref().clone())
            .with_not_null_columns(
                input
                    .not_null_columns()
                    .union(&null_rejecting_columns(&self.predicate)),
            )
            .with_outer_refs(derive_outer_refs(&used, &[input]))
            .with_max_card(max_card)
            .with_keys(input.keys().to_vec())
            .with_equivalences(derive_equivalences(&[input], &self.predicate)))
    }

    fn derive_statistics(
        &self,
        context: &DeriveContext,
        _logical_prop: &LogicalProperty,
    ) -> OptResult<Statistics> {
        Ok(filter_statistics(context.input_stat(0)?, &self.predicate))
    }

    fn candidate_rules(&self) -> EnumSet<RuleId> {
        RuleId::Select2Filter.into()
    }
}

impl DisplayFields for Select {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("")
            .field("predicate", &self.predicate)
            .finish()
    }
}
