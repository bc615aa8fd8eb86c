//! st-query - Query engine for Stratum
//!
//! Executes the constrained aggregate-query contract over the partitions of
//! one table: predicates are typed against the active schema, partitions are
//! pruned by their column statistics, and matching rows stream into bounded
//! grouped accumulators with exact fixed-point arithmetic.

mod aggregate;
pub mod engine;
pub mod error;
mod plan;
pub mod result;
mod scan;

pub use engine::{QueryEngine, ResultStream};
pub use error::{QueryError, QueryResult};
pub use result::{CancelToken, ResultRow, ResultTable};
