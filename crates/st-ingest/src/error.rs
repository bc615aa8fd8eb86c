//! Error types for st-ingest

use thiserror::Error;

/// Ingestion errors
#[derive(Error, Debug)]
pub enum IngestError {
    /// I001: Input file cannot be ingested at all
    #[error("[I001] Malformed input {file}: {message}")]
    MalformedInput { file: String, message: String },

    /// I002: Inferred schema is incompatible with the committed one
    #[error("[I002] Schema drift detected for table '{table}': {}", .changes.join("; "))]
    SchemaDrift { table: String, changes: Vec<String> },

    /// I003: Too many rows failed validation
    #[error(
        "[I003] Table '{table}': {quarantined} quarantined rows exceed the threshold of {threshold}"
    )]
    QuarantineThresholdExceeded {
        table: String,
        quarantined: usize,
        threshold: usize,
    },

    /// I004: Reading the delimited input failed
    #[error("[I004] CSV error in {file}: {source}")]
    Csv {
        file: String,
        #[source]
        source: csv::Error,
    },

    /// I005: Staged partition file could not be written
    #[error("[I005] {0}")]
    Catalog(#[from] st_catalog::CatalogError),

    /// I006: Core error
    #[error("[I006] {0}")]
    Core(#[from] st_core::CoreError),

    /// I007: Arrow encoding error
    #[error("[I007] Arrow encoding error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

/// Result type alias for IngestError
pub type PipelineResult<T> = Result<T, IngestError>;
