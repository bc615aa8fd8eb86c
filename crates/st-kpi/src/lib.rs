//! st-kpi - KPI registry and cache for Stratum
//!
//! [`KpiRegistry`] holds named KPI definitions. [`KpiCache`] serves their
//! results keyed by a fingerprint over the definition, its parameters and the
//! live dependency partitions, computing each fingerprint at most once at a
//! time and persisting results to a DuckDB [`KpiStore`].

pub mod cache;
pub mod error;
pub mod evaluator;
pub mod fingerprint;
pub mod registry;
pub mod store;
pub mod value;

pub use cache::KpiCache;
pub use error::{CacheResult, KpiError};
pub use evaluator::KpiEvaluator;
pub use fingerprint::{DependencyEntry, Fingerprint};
pub use registry::KpiRegistry;
pub use store::KpiStore;
pub use value::{KpiResult, KpiValue};
