use std::fmt::{Display, Formatter};
use std::sync::Arc;

use datafusion_common::{Column, DFSchema};
use datafusion::optimizer::utils::split_conjunction;
use datafusion_expr::{BinaryExpr, Operator as BinaryOperator};

use crate::properties::ColRefSet;
use crate::Expr;

/// Upper bound of number of rows produced by an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MaxCard {
    Bounded(u64),
    Unbounded,
}

impl MaxCard {
    pub fn multiply(self, other: MaxCard) -> MaxCard {
        match (self, other) {
            (MaxCard::Bounded(0), _) | (_, MaxCard::Bounded(0)) => MaxCard::Bounded(0),
            (MaxCard::Bounded(l), MaxCard::Bounded(r)) => {
                l.checked_mul(r).map_or(MaxCard::Unbounded, MaxCard::Bounded)
            }
            _ => MaxCard::Unbounded,
        }
    }
}

impl Display for MaxCard {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MaxCard::Bounded(n) => write!(f, "{n}"),
            MaxCard::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// Properties shared by all logically equivalent expressions of a group.
#[derive(Clone, PartialEq, Debug)]
pub struct LogicalProperty {
    schema: Arc<DFSchema>,
    output_columns: ColRefSet,
    not_null_columns: ColRefSet,
    /// Columns referenced but not produced by the expression, supplied by an enclosing apply.
    outer_refs: ColRefSet,
    max_card: MaxCard,
    keys: Vec<ColRefSet>,
    /// Sets of columns known to hold equal values.
    equivalences: Vec<ColRefSet>,
}

impl LogicalProperty {
    pub fn new(schema: DFSchema) -> Self {
        Self::with_schema(Arc::new(schema))
    }

    pub fn with_schema(schema: Arc<DFSchema>) -> Self {
        let output_columns = schema
            .fields()
            .iter()
            .map(|f| f.qualified_column())
            .collect();
        let not_null_columns = schema
            .fields()
            .iter()
            .filter(|f| !f.is_nullable())
            .map(|f| f.qualified_column())
            .collect();
        Self {
            schema,
            output_columns,
            not_null_columns,
            outer_refs: ColRefSet::new(),
            max_card: MaxCard::Unbounded,
            keys: vec![],
            equivalences: vec![],
        }
    }

    pub fn with_not_null_columns(mut self, columns: ColRefSet) -> Self {
        self.not_null_columns = columns.intersection(&self.output_columns);
        self
    }

    pub fn with_outer_refs(mut self, outer_refs: ColRefSet) -> Self {
        self.outer_refs = outer_refs;
        self
    }

    pub fn with_max_card(mut self, max_card: MaxCard) -> Self {
        self.max_card = max_card;
        self
    }

    /// Keys not fully covered by output columns are dropped.
    pub fn with_keys(mut self, keys: Vec<ColRefSet>) -> Self {
        let mut result: Vec<ColRefSet> = vec![];
        for key in keys {
            if key.is_subset(&self.output_columns) && !result.contains(&key) {
                result.push(key);
            }
        }
        self.keys = result;
        self
    }

    /// Equivalence classes restricted to output columns.
    pub fn with_equivalences(mut self, equivalences: Vec<ColRefSet>) -> Self {
        self.equivalences = equivalences
            .into_iter()
            .map(|class| class.intersection(&self.output_columns))
            .filter(|class| class.len() > 1)
            .collect();
        self
    }

    pub fn schema(&self) -> &DFSchema {
        &self.schema
    }

    pub fn schema_ref(&self) -> &Arc<DFSchema> {
        &self.schema
    }

    pub fn output_columns(&self) -> &ColRefSet {
        &self.output_columns
    }

    pub fn not_null_columns(&self) -> &ColRefSet {
        &self.not_null_columns
    }

    pub fn outer_refs(&self) -> &ColRefSet {
        &self.outer_refs
    }

    pub fn has_outer_refs(&self) -> bool {
        !self.outer_refs.is_empty()
    }

    pub fn max_card(&self) -> MaxCard {
        self.max_card
    }

    pub fn keys(&self) -> &[ColRefSet] {
        &self.keys
    }

    pub fn equivalences(&self) -> &[ColRefSet] {
        &self.equivalences
    }
}

/// Outer references of an expression: columns used by its own scalars or by its children's
/// outer references, which no child produces.
pub fn derive_outer_refs(used: &ColRefSet, inputs: &[&LogicalProperty]) -> ColRefSet {
    let mut referenced = used.clone();
    let mut produced = ColRefSet::new();
    for input in inputs {
        referenced.extend(input.outer_refs());
        produced.extend(input.output_columns());
    }
    referenced.difference(&produced)
}

/// Column pairs equated by conjuncts of `predicate`.
pub fn column_equalities(predicate: &Expr) -> Vec<(Column, Column)> {
    split_conjunction(predicate)
        .into_iter()
        .filter_map(|conjunct| match conjunct {
            Expr::BinaryExpr(BinaryExpr {
                left,
                op: BinaryOperator::Eq,
                right,
            }) => match (left.as_ref(), right.as_ref()) {
                (Expr::Column(l), Expr::Column(r)) => Some((l.clone(), r.clone())),
                _ => None,
            },
            _ => None,
        })
        .collect()
}

/// Merges column equalities into equivalence classes.
pub fn merge_equivalences(
    mut classes: Vec<ColRefSet>,
    equalities: Vec<(Column, Column)>,
) -> Vec<ColRefSet> {
    for (left, right) in equalities {
        let mut merged: ColRefSet = vec![left, right].into_iter().collect();
        let mut rest = Vec::with_capacity(classes.len());
        for class in classes {
            if class.is_disjoint(&merged) {
                rest.push(class);
            } else {
                merged.extend(&class);
            }
        }
        rest.push(merged);
        classes = rest;
    }
    classes
}

/// Equivalence classes of `inputs` combined with equalities from `predicate`.
pub fn derive_equivalences(inputs: &[&LogicalProperty], predicate: &Expr) -> Vec<ColRefSet> {
    let classes = inputs
        .iter()
        .flat_map(|input| input.equivalences().iter().cloned())
        .collect();
    merge_equivalences(classes, column_equalities(predicate))
}

/// Columns referenced by `predicate` which can't be null when it's true.
pub fn null_rejecting_columns(predicate: &Expr) -> ColRefSet {
    let mut columns = ColRefSet::new();
    for (left, right) in column_equalities(predicate) {
        columns.insert(left);
        columns.insert(right);
    }
    columns
}

#[cfg(test)]
mod tests {
    use crate::properties::{
        column_equalities, derive_outer_refs, merge_equivalences, ColRefSet, LogicalProperty,
        MaxCard,
    };
    use arrow_schema::{DataType, Field, Schema};
    use datafusion::common::ToDFSchema;
    use datafusion::prelude::{col, lit};
    use datafusion_common::Column;

    fn column(name: &str) -> Column {
        Column::from_qualified_name(name)
    }

    #[test]
    fn test_merge_equivalences_transitive() {
        let classes = merge_equivalences(
            vec![],
            vec![
                (column("t1.a"), column("t2.b")),
                (column("t3.c"), column("t3.d")),
                (column("t2.b"), column("t3.c")),
            ],
        );
        assert_eq!(1, classes.len());
        assert_eq!(4, classes[0].len());
    }

    #[test]
    fn test_column_equalities() {
        let predicate = col("t1.a")
            .eq(col("t2.b"))
            .and(col("t1.c").gt(lit(3)))
            .and(col("t1.d").eq(lit(1)));
        assert_eq!(
            vec![(column("t1.a"), column("t2.b"))],
            column_equalities(&predicate)
        );
    }

    #[test]
    fn test_outer_refs() {
        let schema = Schema::new(vec![Field::new("b", DataType::Int32, false)])
            .to_dfschema()
            .unwrap();
        let prop = LogicalProperty::new(schema);
        let used = ColRefSet::from_expr(&col("b").eq(col("t1.a"))).unwrap();

        let outer_refs = derive_outer_refs(&used, &[&prop]);
        assert_eq!(vec![column("t1.a")], outer_refs.sorted());
    }

    #[test]
    fn test_max_card() {
        assert_eq!(
            MaxCard::Bounded(6),
            MaxCard::Bounded(2).multiply(MaxCard::Bounded(3))
        );
        assert_eq!(
            MaxCard::Bounded(0),
            MaxCard::Unbounded.multiply(MaxCard::Bounded(0))
        );
        assert!(MaxCard::Bounded(10) < MaxCard::Unbounded);
    }
}
