//! On-disk layout of a Stratum data directory
//!
//! ```text
//! <data_dir>/
//!   catalog.json                 manifest
//!   partitions/<table>/<id>.arrow
//!   staging/<uuid>.arrow         files being written by ingestion
//!   metadata/                    ingestion reports
//!   kpi_cache.duckdb             persisted KPI results
//! ```

use crate::error::{CatalogError, CatalogResult};
use crate::partition::PartitionId;
use st_core::TableName;
use std::path::{Path, PathBuf};

/// Paths inside one data directory
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("catalog.json")
    }

    pub fn partitions_dir(&self) -> PathBuf {
        self.root.join("partitions")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join("metadata")
    }

    pub fn kpi_store_path(&self) -> PathBuf {
        self.root.join("kpi_cache.duckdb")
    }

    /// Manifest-relative location of a published partition
    pub fn partition_file(table: &TableName, id: PartitionId) -> String {
        format!("partitions/{}/{}.arrow", table, id)
    }

    /// Absolute path for a manifest-relative file
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// A fresh, unique path in the staging area
    pub fn new_staged_path(&self) -> PathBuf {
        self.staging_dir()
            .join(format!("{}.arrow", uuid::Uuid::new_v4().simple()))
    }

    /// Create every directory the catalog writes into
    pub fn ensure_dirs(&self) -> CatalogResult<()> {
        for dir in [
            self.root.clone(),
            self.partitions_dir(),
            self.staging_dir(),
            self.metadata_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| CatalogError::io(&dir, e))?;
        }
        Ok(())
    }

    /// Remove leftovers of interrupted ingestions
    pub fn clear_staging(&self) -> CatalogResult<usize> {
        let dir = self.staging_dir();
        if !dir.is_dir() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in std::fs::read_dir(&dir).map_err(|e| CatalogError::io(&dir, e))? {
            let path = entry.map_err(|e| CatalogError::io(&dir, e))?.path();
            if path.is_file() {
                std::fs::remove_file(&path).map_err(|e| CatalogError::io(&path, e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
