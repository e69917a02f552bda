use std::fmt::{Display, Formatter};

use datafusion_common::Column;

use crate::properties::{ColRefSet, PhysicalProp};

/// Ordering of one column.
#[derive(Hash, Debug, Clone, Eq, PartialEq)]
pub struct Ordering {
    column: Column,
    /// Ascending or descending.
    asc: bool,
    /// Should null be treated first.
    null_first: bool,
}

impl Ordering {
    pub fn new(column: Column, asc: bool, null_first: bool) -> Self {
        Self {
            column,
            asc,
            null_first,
        }
    }

    pub fn asc(column: Column) -> Self {
        Self::new(column, true, false)
    }

    pub fn column(&self) -> &Column {
        &self.column
    }
}

/// Ordering property specification.
#[derive(Hash, Debug, Clone, Eq, PartialEq, Default)]
pub struct OrderSpec {
    orders: Vec<Ordering>,
}

impl OrderSpec {
    pub fn new(orders: Vec<Ordering>) -> Self {
        Self { orders }
    }

    /// Ascending order on each column.
    pub fn ascending<I: IntoIterator<Item = Column>>(columns: I) -> Self {
        Self::new(columns.into_iter().map(Ordering::asc).collect())
    }

    pub fn orders(&self) -> &[Ordering] {
        &self.orders
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn columns(&self) -> ColRefSet {
        self.orders.iter().map(|o| o.column.clone()).collect()
    }
}

impl PhysicalProp for OrderSpec {
    /// A delivered order satisfies every required order which is a prefix of it.
    fn satisfies(&self, required: &Self) -> bool {
        required.orders.len() <= self.orders.len()
            && required
                .orders
                .iter()
                .zip(self.orders.iter())
                .all(|(r, d)| r == d)
    }
}

impl Display for OrderSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let orders = self
            .orders
            .iter()
            .map(|o| {
                format!(
                    "{} {}",
                    o.column.flat_name(),
                    if o.asc { "ASC" } else { "DESC" }
                )
            })
            .collect::<Vec<_>>();
        write!(f, "[{}]", orders.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use crate::properties::{OrderSpec, PhysicalProp};
    use datafusion_common::Column;

    #[test]
    fn test_prefix_satisfies() {
        let delivered = OrderSpec::ascending(vec![
            Column::from_qualified_name("t1.a"),
            Column::from_qualified_name("t1.b"),
        ]);
        let required = OrderSpec::ascending(vec![Column::from_qualified_name("t1.a")]);

        assert!(delivered.satisfies(&required));
        assert!(!required.satisfies(&delivered));
        assert!(required.satisfies(&OrderSpec::default()));
    }
}
