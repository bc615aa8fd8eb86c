//! The partition catalog
//!
//! Readers work against an immutable [`CatalogView`] shared through an `Arc`.
//! A commit builds the next view off to the side, publishes its files and
//! manifest, and then swaps the current-view pointer; readers therefore see
//! either the full prior state or the full new state.
//!
//! Superseded partition files stay on disk while any [`PinnedView`] holds a
//! lease on them and are removed when the last lease is released.

use crate::error::{CatalogError, CatalogResult};
use crate::layout::StorageLayout;
use crate::manifest::Manifest;
use crate::partition::{CommitRequest, PartitionId, PartitionRecord, StagedPartition};
use chrono::{DateTime, Utc};
use st_core::{file_checksum, CatalogConfig, TableName, TableSchema};
use std::collections::HashMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// An immutable state of the catalog
#[derive(Debug)]
pub struct CatalogView {
    generation: u64,
    manifest: Manifest,
}

impl CatalogView {
    /// Number of commits applied since the catalog was opened
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Live partitions of a table, in id order
    pub fn active_partitions(&self, table: &TableName) -> Vec<&PartitionRecord> {
        self.manifest.live_for(table).collect()
    }

    pub fn active_schema(&self, table: &TableName) -> Option<&TableSchema> {
        self.manifest.active_schema(table)
    }

    pub fn schema_at(&self, table: &TableName, version: u32) -> Option<&TableSchema> {
        self.manifest.schema_at(table, version)
    }

    /// Live partitions of a table for a batch identity
    pub fn live_batch(&self, table: &TableName, batch: &str) -> Vec<&PartitionRecord> {
        self.manifest
            .live_for(table)
            .filter(|p| p.batch.as_str() == batch)
            .collect()
    }
}

struct CatalogState {
    view: Arc<CatalogView>,
    /// Outstanding leases per partition
    leases: HashMap<PartitionId, usize>,
    /// Superseded partitions whose files wait for their last lease
    tombstones: HashMap<PartitionId, PathBuf>,
}

struct CatalogInner {
    layout: StorageLayout,
    /// Serializes commits; readers never take it
    writer: Mutex<()>,
    state: Mutex<CatalogState>,
}

impl CatalogInner {
    fn state(&self) -> CatalogResult<MutexGuard<'_, CatalogState>> {
        self.state
            .lock()
            .map_err(|e| CatalogError::MutexPoisoned(e.to_string()))
    }

    fn release(&self, ids: &[PartitionId]) {
        let mut removable = Vec::new();
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            for id in ids {
                let Some(count) = state.leases.get_mut(id) else {
                    continue;
                };
                *count = count.saturating_sub(1);
                if *count == 0 {
                    state.leases.remove(id);
                    if let Some(path) = state.tombstones.remove(id) {
                        removable.push((*id, path));
                    }
                }
            }
        }
        for (id, path) in removable {
            remove_partition_file(id, &path);
        }
    }
}

/// Process-wide partition catalog; cheap to clone
#[derive(Clone)]
pub struct PartitionCatalog {
    inner: Arc<CatalogInner>,
}

impl std::fmt::Debug for PartitionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionCatalog")
            .field("root", &self.inner.layout.root())
            .finish()
    }
}

impl PartitionCatalog {
    /// Open (or create) the catalog in a data directory
    ///
    /// Every live partition is checked against its file on disk; any mismatch
    /// is reported as corruption rather than repaired. Leftover staged files
    /// and files of superseded partitions are removed.
    pub fn open(layout: StorageLayout, config: &CatalogConfig) -> CatalogResult<Self> {
        layout.ensure_dirs()?;
        let cleared = layout.clear_staging()?;
        if cleared > 0 {
            log::info!("Removed {} leftover staged file(s)", cleared);
        }

        let manifest = Manifest::load(&layout.manifest_path())?;
        manifest.check_invariants()?;

        for record in manifest.live() {
            verify_partition(&layout, record, config.verify_checksums)?;
        }
        for record in manifest.partitions.iter().filter(|p| !p.is_live()) {
            let path = layout.resolve(&record.file);
            if path.exists() {
                remove_partition_file(record.id, &path);
            }
        }

        log::debug!(
            "Opened catalog at {} with {} live partition(s)",
            layout.root().display(),
            manifest.live().count()
        );

        Ok(Self {
            inner: Arc::new(CatalogInner {
                layout,
                writer: Mutex::new(()),
                state: Mutex::new(CatalogState {
                    view: Arc::new(CatalogView {
                        generation: 0,
                        manifest,
                    }),
                    leases: HashMap::new(),
                    tombstones: HashMap::new(),
                }),
            }),
        })
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.inner.layout
    }

    /// The current view
    pub fn snapshot(&self) -> CatalogResult<Arc<CatalogView>> {
        Ok(Arc::clone(&self.inner.state()?.view))
    }

    /// Take the current view and lease the live partitions of `tables`
    ///
    /// With an empty `tables` slice every live partition is leased. The view
    /// and the leases are taken atomically, so a concurrent commit cannot
    /// delete a file between the two.
    pub fn pin(&self, tables: &[TableName]) -> CatalogResult<PinnedView> {
        let mut state = self.inner.state()?;
        let view = Arc::clone(&state.view);
        let leased: Vec<PartitionId> = view
            .manifest
            .live()
            .filter(|p| tables.is_empty() || tables.contains(&p.table))
            .map(|p| p.id)
            .collect();
        for id in &leased {
            *state.leases.entry(*id).or_insert(0) += 1;
        }
        drop(state);

        Ok(PinnedView {
            view,
            leased,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Publish one partition, optionally superseding a live one
    pub fn commit(
        &self,
        partition: StagedPartition,
        replaces: Option<PartitionId>,
    ) -> CatalogResult<PartitionRecord> {
        let records = self.commit_batch(CommitRequest {
            schemas: Vec::new(),
            partitions: vec![partition],
            replaces: replaces.into_iter().collect(),
        })?;
        records.into_iter().next().ok_or_else(|| CatalogError::Corruption {
            message: "commit produced no partition record".to_string(),
        })
    }

    /// Apply a multi-partition commit as one view swap
    ///
    /// On error the catalog is unchanged and staged files that were not yet
    /// published are left where they are; the caller decides whether to
    /// discard them.
    pub fn commit_batch(&self, request: CommitRequest) -> CatalogResult<Vec<PartitionRecord>> {
        let _writer = self
            .inner
            .writer
            .lock()
            .map_err(|e| CatalogError::MutexPoisoned(e.to_string()))?;
        let current = self.snapshot()?;
        let now = Utc::now();
        let mut manifest = current.manifest.clone();

        for schema in &request.schemas {
            apply_schema(&mut manifest, schema)?;
        }

        let mut superseded = Vec::with_capacity(request.replaces.len());
        for id in &request.replaces {
            let record = manifest
                .partition(*id)
                .filter(|p| p.is_live())
                .ok_or(CatalogError::UnknownPartition { id: id.0 })?;
            superseded.push((record.id, record.table.clone(), record.batch.clone()));
        }

        let mut records = Vec::with_capacity(request.partitions.len());
        for staged in &request.partitions {
            if manifest
                .schema_at(&staged.table, staged.schema_version)
                .is_none()
            {
                return Err(CatalogError::UnknownSchema {
                    table: staged.table.to_string(),
                    version: staged.schema_version,
                });
            }
            if !staged.staged_file.is_file() {
                return Err(CatalogError::StagedFileMissing {
                    path: staged.staged_file.display().to_string(),
                });
            }
            let id = PartitionId(manifest.next_partition_id);
            manifest.next_partition_id += 1;
            records.push(PartitionRecord {
                id,
                table: staged.table.clone(),
                batch: staged.batch.clone(),
                part: staged.part,
                schema_version: staged.schema_version,
                row_count: staged.row_count,
                file: StorageLayout::partition_file(&staged.table, id),
                checksum: staged.checksum.clone(),
                size_bytes: staged.size_bytes,
                ingested_from: staged.ingested_from,
                ingested_to: staged.ingested_to,
                committed_at: now,
                superseded_at: None,
                replaced_by: None,
                stats: staged.stats.clone(),
            });
        }

        for (id, table, batch) in &superseded {
            let replacement = records
                .iter()
                .find(|r| &r.table == table && &r.batch == batch)
                .map(|r| r.id);
            if let Some(record) = manifest.partitions.iter_mut().find(|p| p.id == *id) {
                record.superseded_at = Some(now);
                record.replaced_by = replacement;
            }
        }

        for record in &records {
            let clash = manifest
                .live()
                .any(|p| p.table == record.table && p.batch == record.batch)
                || records.iter().any(|r| {
                    r.id < record.id
                        && r.table == record.table
                        && r.batch == record.batch
                        && r.part == record.part
                });
            if clash {
                return Err(CatalogError::DuplicateBatch {
                    table: record.table.to_string(),
                    batch: record.batch.to_string(),
                });
            }
        }

        manifest.partitions.extend(records.iter().cloned());
        manifest.updated_at = now;
        manifest.check_invariants()?;

        let mut moved = Vec::with_capacity(request.partitions.len());
        if let Err(e) = self.publish(&manifest, &request.partitions, &records, &mut moved) {
            for (from, to) in moved.iter().rev() {
                if let Err(undo) = std::fs::rename(to, from) {
                    log::warn!(
                        "Failed to return {} to staging: {}",
                        to.display(),
                        undo
                    );
                }
            }
            return Err(e);
        }

        let view = Arc::new(CatalogView {
            generation: current.generation + 1,
            manifest,
        });
        let mut removable = Vec::new();
        {
            let mut state = self.inner.state()?;
            for (id, _, _) in &superseded {
                let Some(record) = view.manifest.partition(*id) else {
                    continue;
                };
                let path = self.inner.layout.resolve(&record.file);
                if state.leases.contains_key(id) {
                    state.tombstones.insert(*id, path);
                } else {
                    removable.push((*id, path));
                }
            }
            state.view = view;
        }
        for (id, path) in removable {
            remove_partition_file(id, &path);
        }

        log::info!(
            "Committed {} partition(s), superseded {}",
            records.len(),
            superseded.len()
        );
        Ok(records)
    }

    fn publish(
        &self,
        manifest: &Manifest,
        staged: &[StagedPartition],
        records: &[PartitionRecord],
        moved: &mut Vec<(PathBuf, PathBuf)>,
    ) -> CatalogResult<()> {
        for (staged, record) in staged.iter().zip(records) {
            let target = self.inner.layout.resolve(&record.file);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| CatalogError::io(parent, e))?;
            }
            std::fs::rename(&staged.staged_file, &target)
                .map_err(|e| CatalogError::io(&staged.staged_file, e))?;
            moved.push((staged.staged_file.clone(), target));
        }
        manifest.save(&self.inner.layout.manifest_path())
    }

    /// Partitions live at `as_of` (now when `None`), in id order
    pub fn active_partitions(
        &self,
        as_of: Option<DateTime<Utc>>,
    ) -> CatalogResult<Vec<PartitionRecord>> {
        let view = self.snapshot()?;
        Ok(view
            .manifest
            .partitions
            .iter()
            .filter(|p| match as_of {
                None => p.is_live(),
                Some(at) => p.visible_at(at),
            })
            .cloned()
            .collect())
    }

    pub fn schema_at(&self, table: &TableName, version: u32) -> CatalogResult<TableSchema> {
        self.snapshot()?
            .schema_at(table, version)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownSchema {
                table: table.to_string(),
                version,
            })
    }

    pub fn active_schema(&self, table: &TableName) -> CatalogResult<Option<TableSchema>> {
        Ok(self.snapshot()?.active_schema(table).cloned())
    }

    pub fn tables(&self) -> CatalogResult<Vec<TableName>> {
        Ok(self.snapshot()?.manifest.tables())
    }

    /// Superseded partitions whose files are still held by a lease
    pub fn pending_tombstones(&self) -> CatalogResult<usize> {
        Ok(self.inner.state()?.tombstones.len())
    }
}

/// A catalog view whose live partitions cannot be deleted while it exists
pub struct PinnedView {
    view: Arc<CatalogView>,
    leased: Vec<PartitionId>,
    inner: Arc<CatalogInner>,
}

impl PinnedView {
    /// Leased partitions of a table, in id order
    pub fn partitions(&self, table: &TableName) -> Vec<&PartitionRecord> {
        self.view.active_partitions(table)
    }

    /// Absolute path of a partition file
    pub fn path_of(&self, record: &PartitionRecord) -> PathBuf {
        self.inner.layout.resolve(&record.file)
    }

    pub fn leased(&self) -> &[PartitionId] {
        &self.leased
    }
}

impl Deref for PinnedView {
    type Target = CatalogView;

    fn deref(&self) -> &CatalogView {
        &self.view
    }
}

impl Drop for PinnedView {
    fn drop(&mut self) {
        self.inner.release(&self.leased);
    }
}

fn apply_schema(manifest: &mut Manifest, schema: &TableSchema) -> CatalogResult<()> {
    if let Some(existing) = manifest.schema_at(&schema.table, schema.version) {
        if existing.same_columns(schema) {
            return Ok(());
        }
        return Err(CatalogError::SchemaConflict {
            table: schema.table.to_string(),
            message: format!("version {} already exists with other columns", schema.version),
        });
    }
    let latest = manifest
        .active_schema(&schema.table)
        .map_or(0, |s| s.version);
    if schema.version != latest + 1 {
        return Err(CatalogError::SchemaConflict {
            table: schema.table.to_string(),
            message: format!(
                "version {} does not follow current version {}",
                schema.version, latest
            ),
        });
    }
    manifest.schemas.push(schema.clone());
    Ok(())
}

fn verify_partition(
    layout: &StorageLayout,
    record: &PartitionRecord,
    verify_checksum: bool,
) -> CatalogResult<()> {
    let path = layout.resolve(&record.file);
    let corrupt = |detail: String| CatalogError::Corruption {
        message: format!("partition {} ({}): {}", record.id, path.display(), detail),
    };

    let metadata = std::fs::metadata(&path).map_err(|e| corrupt(format!("unreadable: {}", e)))?;
    if metadata.len() != record.size_bytes {
        return Err(corrupt(format!(
            "size {} does not match manifest size {}",
            metadata.len(),
            record.size_bytes
        )));
    }
    if verify_checksum {
        let actual = file_checksum(&path)?;
        if actual != record.checksum {
            return Err(corrupt("checksum mismatch".to_string()));
        }
    }
    Ok(())
}

fn remove_partition_file(id: PartitionId, path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("Removed superseded partition {} ({})", id, path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove superseded partition {}: {}", id, e),
    }
}

#[cfg(test)]
#[path = "catalog_test.rs"]
mod tests;
