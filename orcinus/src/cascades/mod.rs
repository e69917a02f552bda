//! Implementation of cascades style cost based optimizer.
//!
//! A [`Memo`] stores every explored alternative compactly: logically equivalent expressions
//! share a group, and expressions refer to their inputs by group. Search is split into small
//! tasks (exploring groups, implementing expressions, optimizing inputs for required physical
//! properties) which are scheduled on a bounded pool of worker threads. Tasks with the same goal
//! run only once, other tasks wait for their results.
//!
//! Best plans found for each required property set are remembered in groups, so extracting the
//! final plan is a walk from root group following winners.

mod binding;
pub(crate) use binding::Binding;
mod memo;
pub use memo::*;
mod optimizer;
pub use optimizer::*;
mod scheduler;
mod task;
