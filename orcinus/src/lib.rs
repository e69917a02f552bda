//! Orcinus is a cascades style cost based query optimizer for massively parallel databases,
//! built on top of [datafusion](https://github.com/apache/arrow-datafusion) expressions.
//!
//! ## Background
//!
//! The query optimizer accepts an unoptimized logical query plan, and outputs an optimized physical
//! plan ready to be executed. In a massively parallel database data is spread over segments, so
//! besides choosing join orders and algorithms, the optimizer must decide where data moves
//! between segments, and where sorting, spooling and partition selection happen. These are
//! modeled as physical properties: operators require properties from their inputs and derive
//! properties they deliver, and enforcers are added whenever a delivered property doesn't
//! satisfy a requirement.
//!
//! [2] proposed a top-down searching strategy to enumerate possible plans, and used dynamic
//! programming to reduce duplicated computation. [3] extended it with parallel search jobs and
//! property enforcement for distributed execution, which is the framework implemented in this
//! crate.
//!
//! ## Design
//!
//! * [`cascades`] Memo, search tasks, job scheduler and the optimizer driving them.
//! * [`operator`] Logical and physical relational operators.
//! * [`properties`] Logical and physical properties.
//! * [`rules`] Optimization rule definition, exploration, implementation and decorrelation rules.
//! * [`cost`] Cost model.
//! * [`stat`] Statistics derivation.
//! * [`plan`] Input and output plans.
//!
//! ## Reference
//!
//! 1. Selinger, P. Griffiths, et al. "Access path selection in a relational database management
//! system." Readings in Artificial Intelligence and Databases. Morgan Kaufmann, 1989. 511-522.
//! 2. Graefe, G., 1995. The cascades framework for query optimization. IEEE Data Eng. Bull., 18(3),
//! pp.19-29.
//! 3. Soliman, M.A., Antova, L., Raghavan, V., El-Helw, A., Gu, Z., Shen, E., Caragea, G.C.,
//! Garcia-Alvarado, C., Rahman, F., Petropoulos, M. and Waas, F., 2014, June.  Orca: a modular
//! query optimizer architecture for big data. In Proceedings of the 2014 ACM SIGMOD
//! international  conference on Management of data (pp. 337-348).

#[macro_use]
extern crate lazy_static;

pub use datafusion_expr::Expr;

pub mod cascades;
pub mod catalog;
pub mod config;
pub mod cost;
pub mod error;
pub mod name;
pub mod operator;
pub mod optimizer;
pub mod plan;
pub mod properties;
pub mod rules;
pub mod stat;

#[cfg(test)]
mod test_utils;
