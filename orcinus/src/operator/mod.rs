//! Contains relational operators such as join, apply, aggregation, etc.
//!
//! They are classified into two categories: logical and physical. We separate logical
//! and physical operators in two enums since they need to implement different traits. Logical
//! operators derive logical properties and statistics, while physical operators compute
//! required properties of their children and properties they deliver.
//!
//! Enforcers, e.g. [`Sort`] and [`Motion`], are physical operators without logical
//! counterparts, they are only added by the optimizer to satisfy required properties.
mod logical;
pub use logical::*;
mod physical;
pub use physical::*;
mod get;
pub use get::*;
mod select;
pub use select::*;
mod project;
pub use project::*;
mod join;
pub use join::*;
mod apply;
pub use apply::*;
mod gb_agg;
pub use gb_agg::*;
mod limit;
pub use limit::*;
mod enforcers;
pub use enforcers::*;

use std::fmt::{Display, Formatter};

use enum_as_inner::EnumAsInner;
use enum_dispatch::enum_dispatch;

#[derive(Clone, Debug, Hash, Eq, PartialEq, EnumAsInner)]
pub enum Operator {
    Logical(LogicalOperator),
    Physical(PhysicalOperator),
}

impl Operator {
    pub fn name(&self) -> &str {
        match self {
            Operator::Logical(op) => op.as_ref(),
            Operator::Physical(op) => op.as_ref(),
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Operator::Logical(op) => write!(f, "{}", op),
            Operator::Physical(op) => write!(f, "{}", op),
        }
    }
}

/// Formats operator specific fields.
#[enum_dispatch(LogicalOperator)]
pub trait DisplayFields {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result;
}
