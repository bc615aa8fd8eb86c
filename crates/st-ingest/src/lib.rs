//! st-ingest - Ingestion for Stratum
//!
//! Turns raw delimited exports into staged, type-optimized Arrow partition
//! files: [`DelimitedSource`] reads records lazily, [`profiler::infer`]
//! derives the narrowest schema from a sample, and [`IngestionPipeline`]
//! validates, quarantines and encodes rows chunk by chunk.

mod chunk;
pub mod error;
pub mod pipeline;
pub mod profiler;
pub mod source;
pub mod validate;

pub use error::{IngestError, PipelineResult};
pub use pipeline::{IngestResult, IngestionPipeline, PipelineOptions};
pub use profiler::{infer, ProfileOptions};
pub use source::{DelimitedSource, Provenance, RawRecord};
pub use validate::{QuarantineReason, ValidationError};
