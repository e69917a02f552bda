use std::collections::HashSet;
use std::fmt::{Display, Formatter};

use datafusion_common::Column;
use datafusion_expr::utils::expr_to_columns;

use crate::error::OptResult;
use crate::Expr;

/// A set of column references.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ColRefSet {
    columns: HashSet<Column>,
}

impl ColRefSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Columns referenced by a scalar expression.
    pub fn from_expr(expr: &Expr) -> OptResult<Self> {
        let mut columns = HashSet::new();
        expr_to_columns(expr, &mut columns)?;
        Ok(Self { columns })
    }

    pub fn from_exprs<'a, I: IntoIterator<Item = &'a Expr>>(exprs: I) -> OptResult<Self> {
        let mut columns = HashSet::new();
        for expr in exprs {
            expr_to_columns(expr, &mut columns)?;
        }
        Ok(Self { columns })
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn contains(&self, column: &Column) -> bool {
        self.columns.contains(column)
    }

    pub fn insert(&mut self, column: Column) -> bool {
        self.columns.insert(column)
    }

    pub fn extend(&mut self, other: &ColRefSet) {
        self.columns.extend(other.columns.iter().cloned());
    }

    pub fn iter(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    pub fn union(&self, other: &ColRefSet) -> ColRefSet {
        self.columns.union(&other.columns).cloned().collect()
    }

    pub fn intersection(&self, other: &ColRefSet) -> ColRefSet {
        self.columns.intersection(&other.columns).cloned().collect()
    }

    pub fn difference(&self, other: &ColRefSet) -> ColRefSet {
        self.columns.difference(&other.columns).cloned().collect()
    }

    /// Whether every column of `self` is in `other`.
    pub fn is_subset(&self, other: &ColRefSet) -> bool {
        self.columns.is_subset(&other.columns)
    }

    pub fn is_disjoint(&self, other: &ColRefSet) -> bool {
        self.columns.is_disjoint(&other.columns)
    }

    /// Columns in a stable order.
    pub fn sorted(&self) -> Vec<Column> {
        let mut columns: Vec<Column> = self.columns.iter().cloned().collect();
        columns.sort_by_key(|c| c.flat_name());
        columns
    }
}

impl FromIterator<Column> for ColRefSet {
    fn from_iter<T: IntoIterator<Item = Column>>(iter: T) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ColRefSet {
    type Item = &'a Column;
    type IntoIter = std::collections::hash_set::Iter<'a, Column>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.iter()
    }
}

impl Display for ColRefSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let names = self
            .sorted()
            .iter()
            .map(|c| c.flat_name())
            .collect::<Vec<_>>();
        write!(f, "[{}]", names.join(", "))
    }
}
