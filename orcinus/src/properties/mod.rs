//! Properties of relation operators.
//!
//! We have three kinds of properties: [`LogicalProperty`], the required [`PhysicalPropertySet`]
//! and the [`DeliveredPropertySet`] of a physical plan. Logical property are things shared by
//! logically equivalent plans, such as schema, key. Physical properties are concerned with
//! sorting, distribution, rewindability and partition selection.

mod col_ref_set;
pub use col_ref_set::*;
mod distribution;
pub use distribution::*;
mod order;
pub use order::*;
mod rewindability;
pub use rewindability::*;
mod partition;
pub use partition::*;
mod logical;
pub use logical::*;
mod physical;
pub use physical::*;

use std::fmt::Debug;
use std::hash::Hash;

pub trait PhysicalProp: Debug + Hash {
    /// Tests whether `self`, as delivered by a plan, satisfies the `required` one.
    fn satisfies(&self, required: &Self) -> bool;
}
