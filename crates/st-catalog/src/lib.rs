//! st-catalog - Partition catalog for Stratum
//!
//! The catalog is the source of truth for which immutable partition files a
//! reader may scan. It persists a JSON manifest, publishes staged partitions
//! atomically, and keeps superseded files alive until no reader holds them.

pub mod catalog;
pub mod error;
pub mod file;
pub mod layout;
pub mod manifest;
pub mod partition;

pub use catalog::{CatalogView, PartitionCatalog, PinnedView};
pub use error::{CatalogError, CatalogResult};
pub use file::{arrow_schema, arrow_type, PartitionBatches, PartitionFileWriter, WrittenFile};
pub use layout::StorageLayout;
pub use manifest::Manifest;
pub use partition::{ColumnStats, CommitRequest, PartitionId, PartitionRecord, StagedPartition};
