use std::fmt::Formatter;

use enumset::EnumSet;

use crate::error::OptResult;
use crate::operator::{DeriveContext, DisplayFields, LogicalOperatorTrait};
use crate::properties::{LogicalProperty, MaxCard};
use crate::rules::RuleId;
use crate::stat::Statistics;

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Limit {
    limit: usize,
}

impl Limit {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl LogicalOperatorTrait for Limit {
    fn derive_logical_prop(&self, context: &DeriveContext) -> OptResult<LogicalProperty> {
        let input = context.input_prop(0)?;
        let max_card = input.max_card().min(MaxCard::Bounded(self.limit as u64));
        Ok(input.clone().with_max_card(max_card))
    }

    fn derive_statistics(
        &self,
        context: &DeriveContext,
        _logical_prop: &LogicalProperty,
    ) -> OptResult<Statistics> {
        let input = context.input_stat(0)?;
        Ok(input.with_row_count(input.row_count().min(self.limit as f64)))
    }

    fn candidate_rules(&self) -> EnumSet<RuleId> {
        RuleId::Limit2Limit.into()
    }
}

impl DisplayFields for Limit {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("").field("limit", &self.limit).finish()
    }
}
