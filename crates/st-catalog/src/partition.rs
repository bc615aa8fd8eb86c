//! Partition records and commit proposals

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use st_core::{BatchId, TableName, TableSchema, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Catalog-assigned partition identifier, strictly increasing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(pub u64);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-column statistics used for partition pruning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnStats {
    /// Smallest non-null value, `Null` if the column has no values
    pub min: Value,
    /// Largest non-null value
    pub max: Value,
    pub null_count: u64,
}

impl ColumnStats {
    /// Statistics of a column with no observed values
    pub fn empty() -> Self {
        Self {
            min: Value::Null,
            max: Value::Null,
            null_count: 0,
        }
    }

    /// Fold one value into the statistics
    pub fn observe(&mut self, value: &Value) {
        if value.is_null() {
            self.null_count += 1;
            return;
        }
        if self.min.is_null() || value.sort_cmp(&self.min).is_lt() {
            self.min = value.clone();
        }
        if self.max.is_null() || value.sort_cmp(&self.max).is_gt() {
            self.max = value.clone();
        }
    }

    /// Combine statistics of two disjoint sets of rows
    pub fn merge(&mut self, other: &ColumnStats) {
        let nulls = self.null_count + other.null_count;
        self.observe(&other.min);
        self.observe(&other.max);
        self.null_count = nulls;
    }

    /// True when every value in the column was null
    pub fn all_null(&self) -> bool {
        self.min.is_null()
    }
}

/// A committed partition as recorded in the manifest
///
/// Records are never removed from the manifest: a replaced partition keeps its
/// record with `superseded_at` set, so historical views stay answerable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionRecord {
    pub id: PartitionId,
    pub table: TableName,
    /// Source batch identity (typically the month)
    pub batch: BatchId,
    /// Position of this partition among those written for the same batch
    #[serde(default)]
    pub part: u32,
    pub schema_version: u32,
    pub row_count: u64,
    /// Location relative to the data directory
    pub file: String,
    /// SHA-256 of the partition file
    pub checksum: String,
    pub size_bytes: u64,
    /// Time the first chunk of this partition was encoded
    pub ingested_from: DateTime<Utc>,
    /// Time the last chunk of this partition was encoded
    pub ingested_to: DateTime<Utc>,
    pub committed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_by: Option<PartitionId>,
    #[serde(default)]
    pub stats: BTreeMap<String, ColumnStats>,
}

impl PartitionRecord {
    pub fn is_live(&self) -> bool {
        self.superseded_at.is_none()
    }

    /// Whether the partition was part of the live set at `at`
    pub fn visible_at(&self, at: DateTime<Utc>) -> bool {
        self.committed_at <= at && !matches!(self.superseded_at, Some(s) if s <= at)
    }
}

/// A fully written partition file proposed for commit
///
/// Produced by the ingestion pipeline; only the catalog turns it into a
/// [`PartitionRecord`].
#[derive(Debug, Clone)]
pub struct StagedPartition {
    pub table: TableName,
    pub batch: BatchId,
    /// Position among the partitions written for the batch, from 0
    pub part: u32,
    pub schema_version: u32,
    /// Absolute path inside the staging directory
    pub staged_file: PathBuf,
    pub row_count: u64,
    pub checksum: String,
    pub size_bytes: u64,
    pub ingested_from: DateTime<Utc>,
    pub ingested_to: DateTime<Utc>,
    pub stats: BTreeMap<String, ColumnStats>,
}

impl StagedPartition {
    /// Delete the staged file; used when a batch is abandoned
    pub fn discard(&self) {
        if let Err(e) = std::fs::remove_file(&self.staged_file) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!(
                    "Failed to remove staged file {}: {}",
                    self.staged_file.display(),
                    e
                );
            }
        }
    }
}

/// One linearizable catalog mutation
#[derive(Debug, Clone, Default)]
pub struct CommitRequest {
    /// New schema versions introduced by this commit
    pub schemas: Vec<TableSchema>,
    /// Partitions to publish
    pub partitions: Vec<StagedPartition>,
    /// Live partitions to supersede
    pub replaces: Vec<PartitionId>,
}

impl CommitRequest {
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty() && self.partitions.is_empty() && self.replaces.is_empty()
    }

    /// Abandon every staged file in the request
    pub fn discard(&self) {
        for staged in &self.partitions {
            staged.discard();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_observe_and_merge() {
        let mut a = ColumnStats::empty();
        assert!(a.all_null());
        a.observe(&Value::Int(5));
        a.observe(&Value::Null);
        a.observe(&Value::Int(-2));

        let mut b = ColumnStats::empty();
        b.observe(&Value::Int(9));
        b.observe(&Value::Null);
        b.observe(&Value::Null);

        a.merge(&b);
        assert_eq!(a.min, Value::Int(-2));
        assert_eq!(a.max, Value::Int(9));
        assert_eq!(a.null_count, 3);

        let mut only_nulls = ColumnStats::empty();
        only_nulls.observe(&Value::Null);
        a.merge(&only_nulls);
        assert_eq!(a.min, Value::Int(-2));
        assert_eq!(a.null_count, 4);
    }

    #[test]
    fn test_partition_id_serializes_as_number() {
        assert_eq!(serde_json::to_string(&PartitionId(7)).unwrap(), "7");
        assert_eq!(PartitionId(7).to_string(), "7");
    }
}
