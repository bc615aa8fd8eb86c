//! Persisted catalog manifest (`catalog.json`)
//!
//! The manifest alone is enough to rebuild the catalog after a crash: it holds
//! every schema version of every table and every partition record ever
//! committed.

use crate::error::{CatalogError, CatalogResult};
use crate::partition::{PartitionId, PartitionRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use st_core::{TableName, TableSchema};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

/// Current manifest format
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Catalog manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    /// Id the next committed partition receives
    pub next_partition_id: u64,
    pub updated_at: DateTime<Utc>,
    /// Every schema version of every table, oldest first
    #[serde(default)]
    pub schemas: Vec<TableSchema>,
    /// Every partition ever committed, in id order
    #[serde(default)]
    pub partitions: Vec<PartitionRecord>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    /// Create an empty manifest
    pub fn new() -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            next_partition_id: 1,
            updated_at: Utc::now(),
            schemas: Vec::new(),
            partitions: Vec::new(),
        }
    }

    /// Load a manifest, returning an empty one if the file does not exist
    pub fn load(path: &Path) -> CatalogResult<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path).map_err(|e| CatalogError::io(path, e))?;
        let manifest: Manifest =
            serde_json::from_str(&content).map_err(|e| CatalogError::Corruption {
                message: format!("{} is not a valid manifest: {}", path.display(), e),
            })?;
        if manifest.format_version != MANIFEST_FORMAT_VERSION {
            return Err(CatalogError::Corruption {
                message: format!(
                    "unsupported manifest format version {}",
                    manifest.format_version
                ),
            });
        }
        Ok(manifest)
    }

    /// Save the manifest atomically
    ///
    /// Uses write-to-temp-then-rename so a crash never leaves a torn manifest.
    pub fn save(&self, path: &Path) -> CatalogResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CatalogError::io(parent, e))?;
        }

        let temp_path = path.with_extension(format!("json.{}.tmp", std::process::id()));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&temp_path, &json).map_err(|e| CatalogError::io(&temp_path, e))?;
        std::fs::rename(&temp_path, path).map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            CatalogError::io(path, e)
        })?;
        Ok(())
    }

    /// Live partitions of every table, in id order
    pub fn live(&self) -> impl Iterator<Item = &PartitionRecord> {
        self.partitions.iter().filter(|p| p.is_live())
    }

    /// Live partitions of one table, in id order
    pub fn live_for<'a>(
        &'a self,
        table: &TableName,
    ) -> impl Iterator<Item = &'a PartitionRecord> + 'a {
        let table = table.clone();
        self.live().filter(move |p| p.table == table)
    }

    pub fn partition(&self, id: PartitionId) -> Option<&PartitionRecord> {
        self.partitions
            .binary_search_by_key(&id, |p| p.id)
            .ok()
            .map(|idx| &self.partitions[idx])
    }

    /// Latest schema version of a table
    pub fn active_schema(&self, table: &TableName) -> Option<&TableSchema> {
        self.schemas
            .iter()
            .filter(|s| &s.table == table)
            .max_by_key(|s| s.version)
    }

    pub fn schema_at(&self, table: &TableName, version: u32) -> Option<&TableSchema> {
        self.schemas
            .iter()
            .find(|s| &s.table == table && s.version == version)
    }

    /// Every table with at least one schema version, sorted
    pub fn tables(&self) -> Vec<TableName> {
        self.schemas
            .iter()
            .map(|s| s.table.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Check the structural invariants of the manifest
    ///
    /// Partition ids strictly increase and stay below `next_partition_id`,
    /// schema versions of a table are contiguous from 1, every partition
    /// references an existing schema version, and the live partitions of a
    /// `(table, batch)` identity all come from a single commit.
    pub fn check_invariants(&self) -> CatalogResult<()> {
        let corrupt = |message: String| Err(CatalogError::Corruption { message });

        let mut previous: Option<PartitionId> = None;
        for p in &self.partitions {
            if previous.is_some_and(|prev| p.id <= prev) {
                return corrupt(format!("partition ids out of order at {}", p.id));
            }
            if p.id.0 >= self.next_partition_id {
                return corrupt(format!(
                    "partition {} is not below next_partition_id {}",
                    p.id, self.next_partition_id
                ));
            }
            if self.schema_at(&p.table, p.schema_version).is_none() {
                return corrupt(format!(
                    "partition {} references missing schema version {} of '{}'",
                    p.id, p.schema_version, p.table
                ));
            }
            previous = Some(p.id);
        }

        for table in self.tables() {
            let mut versions: Vec<u32> = self
                .schemas
                .iter()
                .filter(|s| s.table == table)
                .map(|s| s.version)
                .collect();
            versions.sort_unstable();
            if versions.iter().enumerate().any(|(i, v)| *v as usize != i + 1) {
                return corrupt(format!(
                    "schema versions of '{}' are not contiguous: {:?}",
                    table, versions
                ));
            }
        }

        // All live parts of a batch come from one commit and are distinct
        let mut batches: HashMap<(&TableName, &str), DateTime<Utc>> = HashMap::new();
        let mut parts = HashSet::new();
        for p in self.live() {
            let committed = *batches
                .entry((&p.table, p.batch.as_str()))
                .or_insert(p.committed_at);
            if committed != p.committed_at || !parts.insert((&p.table, &p.batch, p.part)) {
                return corrupt(format!(
                    "overlapping live partitions for table '{}' batch '{}'",
                    p.table, p.batch
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "manifest_test.rs"]
mod tests;
