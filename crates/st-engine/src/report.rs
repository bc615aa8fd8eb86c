//! Ingestion reports and the catalog schema document

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use st_catalog::CatalogView;
use st_core::{BatchId, TableName};
use st_ingest::{IngestResult, ValidationError};
use std::path::{Path, PathBuf};

/// Quarantined rows kept per table in a report
const QUARANTINE_SAMPLE: usize = 100;

/// Final status of an ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// What one table of a batch contributed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableReport {
    pub table: TableName,
    pub file: PathBuf,
    pub schema_version: u32,
    pub rows_accepted: u64,
    pub rows_quarantined: usize,
    pub partitions: usize,
    pub raw_bytes: u64,
    pub encoded_bytes: u64,
    /// Raw text bytes minus encoded bytes
    pub bytes_saved: i64,
    /// First quarantined rows, with reasons
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quarantine_sample: Vec<ValidationError>,
}

impl TableReport {
    pub fn new(file: &Path, result: &IngestResult) -> Self {
        Self {
            table: result.table.clone(),
            file: file.to_path_buf(),
            schema_version: result.schema_version,
            rows_accepted: result.rows_accepted,
            rows_quarantined: result.quarantined.len(),
            partitions: result.partitions.len(),
            raw_bytes: result.raw_bytes,
            encoded_bytes: result.encoded_bytes,
            bytes_saved: result.bytes_saved(),
            quarantine_sample: result
                .quarantined
                .iter()
                .take(QUARANTINE_SAMPLE)
                .cloned()
                .collect(),
        }
    }
}

/// Processing report of one ingestion run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub run_id: String,
    pub batch: Option<BatchId>,
    pub location: PathBuf,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tables: Vec<TableReport>,
    /// Live partitions superseded by this batch
    pub replaced_partitions: usize,
    /// `on_ingest` KPIs recomputed after the commit
    pub kpis_warmed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestionReport {
    pub fn new(run_id: &str, location: &Path, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.to_string(),
            batch: None,
            location: location.to_path_buf(),
            status: RunStatus::Failed,
            started_at,
            finished_at: started_at,
            tables: Vec::new(),
            replaced_partitions: 0,
            kpis_warmed: 0,
            error: None,
        }
    }

    pub fn rows_accepted(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_accepted).sum()
    }

    pub fn rows_quarantined(&self) -> usize {
        self.tables.iter().map(|t| t.rows_quarantined).sum()
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Save the report to a file path atomically
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        save_json(self, path)
    }
}

/// Column entry of the schema document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDoc {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub nullable: bool,
}

/// Table entry of the schema document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDoc {
    pub table: TableName,
    pub schema_version: u32,
    pub row_count: u64,
    pub partitions: usize,
    pub size_bytes: u64,
    pub columns: Vec<ColumnDoc>,
}

/// Tables, active columns and row counts of the live catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSchemaDocument {
    pub generated_at: DateTime<Utc>,
    pub tables: Vec<TableDoc>,
}

impl CatalogSchemaDocument {
    pub fn from_view(view: &CatalogView) -> Self {
        let tables = view
            .manifest()
            .tables()
            .into_iter()
            .filter_map(|table| {
                let schema = view.active_schema(&table)?;
                let live = view.active_partitions(&table);
                Some(TableDoc {
                    schema_version: schema.version,
                    row_count: live.iter().map(|p| p.row_count).sum(),
                    partitions: live.len(),
                    size_bytes: live.iter().map(|p| p.size_bytes).sum(),
                    columns: schema
                        .columns
                        .iter()
                        .map(|c| ColumnDoc {
                            name: c.name.clone(),
                            ty: c.ty.to_string(),
                            nullable: c.nullable,
                        })
                        .collect(),
                    table,
                })
            })
            .collect();
        Self {
            generated_at: Utc::now(),
            tables,
        }
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        save_json(self, path)
    }
}

/// Write-to-temp-then-rename so readers never see a partial document
fn save_json<T: Serialize>(value: &T, path: &Path) -> EngineResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
    }
    let temp_path = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(&temp_path, json).map_err(|e| EngineError::io(&temp_path, e))?;
    std::fs::rename(&temp_path, path).map_err(|e| EngineError::io(path, e))?;
    Ok(())
}
