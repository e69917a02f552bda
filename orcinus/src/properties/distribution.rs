use std::fmt::{Display, Formatter};

use datafusion_common::Column;

use crate::properties::{ColRefSet, PhysicalProp};

#[derive(Hash, Debug, Clone, Eq, PartialEq, Default)]
pub enum DistributionSpec {
    /// No requirement, only meaningful as a required property.
    #[default]
    Any,
    /// The data set is not partitioned and has only one partition.
    Singleton,
    /// The data set is partitioned according to hash values of columns.
    Hashed(Vec<Column>),
    /// Every segment holds a full copy of the data set.
    Replicated,
    /// The data set has several partitions, but the partitioning doesn't following any rule.
    Random,
    /// Every segment can produce the data set on its own, e.g. a constant.
    Universal,
}

/// How strictly a required distribution must be matched.
#[derive(Hash, Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum DistributionMatching {
    /// Any compatible distribution is accepted, e.g. hashing on a subset of required columns.
    #[default]
    Satisfy,
    /// The delivered distribution must be the required one.
    Exact,
}

impl DistributionSpec {
    /// Tests whether delivered distribution `self` meets `required` under `matching`. Columns
    /// in the same equivalence class are interchangeable.
    pub fn satisfies_with(
        &self,
        required: &DistributionSpec,
        matching: DistributionMatching,
        equivalences: &[ColRefSet],
    ) -> bool {
        use DistributionSpec::*;
        match matching {
            DistributionMatching::Satisfy => match (required, self) {
                (Any, _) => true,
                (Singleton, Singleton | Universal) => true,
                (Replicated, Replicated | Universal) => true,
                (Random, Random | Hashed(_)) => true,
                (Hashed(required), Hashed(delivered)) => {
                    !delivered.is_empty()
                        && delivered.iter().all(|d| {
                            required
                                .iter()
                                .any(|r| equivalent_columns(d, r, equivalences))
                        })
                }
                (Universal, Universal) => true,
                _ => false,
            },
            DistributionMatching::Exact => match (required, self) {
                (Any, _) => true,
                (Hashed(required), Hashed(delivered)) => {
                    required.len() == delivered.len()
                        && required
                            .iter()
                            .zip(delivered.iter())
                            .all(|(r, d)| equivalent_columns(d, r, equivalences))
                }
                (required, delivered) => required == delivered,
            },
        }
    }

    /// Whether a motion can produce this distribution when it is required.
    pub fn is_enforceable(&self) -> bool {
        !matches!(self, DistributionSpec::Any | DistributionSpec::Universal)
    }

    pub fn is_singleton_like(&self) -> bool {
        matches!(self, DistributionSpec::Singleton | DistributionSpec::Universal)
    }

    pub fn columns(&self) -> ColRefSet {
        match self {
            DistributionSpec::Hashed(columns) => columns.iter().cloned().collect(),
            _ => ColRefSet::new(),
        }
    }
}

pub(crate) fn equivalent_columns(left: &Column, right: &Column, equivalences: &[ColRefSet]) -> bool {
    left == right
        || equivalences
            .iter()
            .any(|class| class.contains(left) && class.contains(right))
}

impl PhysicalProp for DistributionSpec {
    fn satisfies(&self, required: &Self) -> bool {
        self.satisfies_with(required, DistributionMatching::Satisfy, &[])
    }
}

impl Display for DistributionSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DistributionSpec::Hashed(columns) => {
                let names = columns.iter().map(|c| c.flat_name()).collect::<Vec<_>>();
                write!(f, "Hashed({})", names.join(", "))
            }
            other => write!(f, "{:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::properties::DistributionMatching::{Exact, Satisfy};
    use crate::properties::{ColRefSet, DistributionSpec, PhysicalProp};
    use datafusion_common::Column;

    fn hashed(names: &[&str]) -> DistributionSpec {
        DistributionSpec::Hashed(
            names
                .iter()
                .map(|n| Column::from_qualified_name(*n))
                .collect(),
        )
    }

    #[test]
    fn test_satisfy_accepts_hashed_subset() {
        let delivered = hashed(&["t1.a"]);
        let required = hashed(&["t1.a", "t1.b"]);

        assert!(delivered.satisfies_with(&required, Satisfy, &[]));
        assert!(!delivered.satisfies_with(&required, Exact, &[]));
        assert!(!hashed(&["t1.c"]).satisfies_with(&required, Satisfy, &[]));
    }

    #[test]
    fn test_exact_with_equivalences() {
        let delivered = hashed(&["t1.a"]);
        let required = hashed(&["t2.b"]);
        let equivalences = vec![vec![
            Column::from_qualified_name("t1.a"),
            Column::from_qualified_name("t2.b"),
        ]
        .into_iter()
        .collect::<ColRefSet>()];

        assert!(!delivered.satisfies_with(&required, Exact, &[]));
        assert!(delivered.satisfies_with(&required, Exact, &equivalences));
    }

    #[test]
    fn test_duplicated_distributions() {
        assert!(DistributionSpec::Universal.satisfies(&DistributionSpec::Singleton));
        assert!(DistributionSpec::Universal.satisfies(&DistributionSpec::Replicated));
        assert!(!DistributionSpec::Universal.satisfies_with(&DistributionSpec::Singleton, Exact, &[]));
        assert!(!DistributionSpec::Replicated.satisfies(&DistributionSpec::Singleton));
        assert!(hashed(&["t1.a"]).satisfies(&DistributionSpec::Random));
        assert!(DistributionSpec::Singleton.satisfies(&DistributionSpec::Any));
    }
}
