//! Error types for st-engine

use thiserror::Error;

/// Orchestration and facade errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// E001: Another ingestion is running; retry once it finishes
    #[error("[E001] Ingestion already in progress (run {run_id})")]
    IngestionInProgress { run_id: String },

    /// E002: Batch location has nothing to ingest
    #[error("[E002] Invalid batch at {path}: {message}")]
    InvalidBatch { path: String, message: String },

    /// E003: Ingestion pipeline or profiler error
    #[error("[E003] {0}")]
    Ingest(#[from] st_ingest::IngestError),

    /// E004: Catalog error
    #[error("[E004] {0}")]
    Catalog(#[from] st_catalog::CatalogError),

    /// E005: Query error
    #[error("[E005] {0}")]
    Query(#[from] st_query::QueryError),

    /// E006: KPI registry or cache error
    #[error("[E006] {0}")]
    Kpi(#[from] st_kpi::KpiError),

    /// E007: Core error
    #[error("[E007] {0}")]
    Core(#[from] st_core::CoreError),

    /// E008: IO error with file path context
    #[error("[E008] IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// E009: Report JSON could not be written
    #[error("[E009] JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// E010: Background ingestion task ended abnormally
    #[error("[E010] Ingestion task failed: {0}")]
    Task(String),
}

/// Result type alias for EngineError
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
