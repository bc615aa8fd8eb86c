//! st-core - Core library for Stratum
//!
//! This crate provides the types shared by every Stratum component:
//! configuration, table schemas, typed values with exact fixed-point
//! decimals, the aggregate-query contract and KPI definitions.

pub mod checksum;
pub mod config;
pub mod error;
pub mod kpi;
pub mod names;
mod newtype_string;
pub mod query;
pub mod schema;
pub(crate) mod serde_helpers;
pub mod value;

pub use checksum::{compute_checksum, file_checksum};
pub use config::{CacheConfig, CatalogConfig, Config, IngestConfig, QueryConfig, WideningPolicy};
pub use error::{CoreError, CoreResult};
pub use kpi::{discover_kpis, KpiDefinition, Parameters, RefreshPolicy};
pub use names::{BatchId, KpiId, TableName};
pub use query::{
    AggregateFunction, AggregateQuery, AggregateSpec, CompareOp, Literal, Operand, OrderBy,
    Predicate,
};
pub use schema::{ColumnSchema, IntWidth, SemanticType, TableSchema};
pub use value::Value;
