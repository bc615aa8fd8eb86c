//! st-engine - Orchestration for Stratum
//!
//! [`IngestionOrchestrator`] turns a batch of raw exports into one catalog
//! commit and warms the KPIs that depend on it; [`Stratum`] opens a project
//! and exposes ingestion, queries and KPIs as one handle.

pub mod batch;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod stratum;

pub use batch::{BatchRequest, ResolvedBatch};
pub use error::{EngineError, EngineResult};
pub use orchestrator::{
    IngestionHandle, IngestionOrchestrator, IngestionState, IngestionStatus, RunningIngestion,
};
pub use report::{CatalogSchemaDocument, IngestionReport, RunStatus, TableReport};
pub use stratum::Stratum;
