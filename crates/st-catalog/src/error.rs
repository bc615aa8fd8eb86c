//! Error types for st-catalog

use thiserror::Error;

/// Partition catalog errors
#[derive(Error, Debug)]
pub enum CatalogError {
    /// K001: Manifest and files on disk disagree
    #[error("[K001] Catalog corruption: {message}")]
    Corruption { message: String },

    /// K002: Partition id not present (or not live) in the catalog
    #[error("[K002] Partition {id} is not a live partition")]
    UnknownPartition { id: u64 },

    /// K003: Two live partitions would share a batch identity
    #[error("[K003] Table '{table}' already has a live partition for batch '{batch}'")]
    DuplicateBatch { table: String, batch: String },

    /// K004: Proposed schema version does not follow the current one
    #[error("[K004] Schema conflict for table '{table}': {message}")]
    SchemaConflict { table: String, message: String },

    /// K005: Referenced schema version does not exist
    #[error("[K005] Table '{table}' has no schema version {version}")]
    UnknownSchema { table: String, version: u32 },

    /// K006: Staged partition file disappeared before commit
    #[error("[K006] Staged partition file missing: {path}")]
    StagedFileMissing { path: String },

    /// K007: Arrow encode/decode failure
    #[error("[K007] Arrow IPC error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// K008: IO error
    #[error("[K008] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// K009: IO error with file path context
    #[error("[K009] IO error at {path}: {source}")]
    IoWithPath {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// K010: Manifest JSON could not be read or written
    #[error("[K010] Manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// K011: Core error
    #[error("[K011] {0}")]
    Core(#[from] st_core::CoreError),

    /// K012: Catalog state mutex poisoned
    #[error("[K012] Catalog state mutex poisoned: {0}")]
    MutexPoisoned(String),
}

/// Result type alias for CatalogError
pub type CatalogResult<T> = Result<T, CatalogError>;

impl CatalogError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        CatalogError::IoWithPath {
            path: path.display().to_string(),
            source,
        }
    }
}
