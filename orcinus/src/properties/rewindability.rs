use crate::properties::PhysicalProp;

/// Whether a plan can be rescanned cheaply, e.g. as the inner side of a nested loop join.
#[derive(Hash, Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum RewindabilitySpec {
    /// As a requirement, means no requirement.
    #[default]
    NotRewindable,
    Rewindable,
}

impl PhysicalProp for RewindabilitySpec {
    fn satisfies(&self, required: &Self) -> bool {
        match required {
            RewindabilitySpec::NotRewindable => true,
            RewindabilitySpec::Rewindable => *self == RewindabilitySpec::Rewindable,
        }
    }
}
