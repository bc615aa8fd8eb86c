//! Error types for st-query

use thiserror::Error;

/// Query planning and execution errors
#[derive(Error, Debug)]
pub enum QueryError {
    /// Q001: Table has no committed schema
    #[error("[Q001] Unknown table '{table}'")]
    UnknownTable { table: String },

    /// Q002: Column not in the table's active schema
    #[error("[Q002] Unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// Q003: Filter literal cannot be compared with the column
    #[error("[Q003] Invalid literal '{literal}' for column '{column}': {message}")]
    InvalidLiteral {
        column: String,
        literal: String,
        message: String,
    },

    /// Q004: Aggregate not defined for the column type
    #[error("[Q004] {function} is not defined for column '{column}' of type {ty}")]
    InvalidAggregate {
        function: String,
        column: String,
        ty: String,
    },

    /// Q005: More distinct groups than the configured limit
    #[error("[Q005] Query produced more than {limit} groups")]
    GroupLimitExceeded { limit: usize },

    /// Q006: Execution cancelled by the caller
    #[error("[Q006] Query cancelled")]
    Cancelled,

    /// Q007: Exact accumulation left the representable range
    #[error("[Q007] Numeric overflow while aggregating '{column}'")]
    Overflow { column: String },

    /// Q008: Stored column type cannot be read as the active type
    #[error("[Q008] Partition {partition} stores column '{column}' as {found}")]
    IncompatibleColumn {
        partition: u64,
        column: String,
        found: String,
    },

    /// Q009: Catalog error
    #[error("[Q009] {0}")]
    Catalog(#[from] st_catalog::CatalogError),

    /// Q010: Core error
    #[error("[Q010] {0}")]
    Core(#[from] st_core::CoreError),

    /// Q011: Arrow error while decoding a partition
    #[error("[Q011] Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

/// Result type alias for QueryError
pub type QueryResult<T> = Result<T, QueryError>;
