//! Batch locations
//!
//! A batch is either a directory holding one delimited export per table or a
//! single export file. Table names come from file stems; the batch identity
//! defaults to the name of the directory the exports live in.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use st_core::{BatchId, TableName};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const EXPORT_EXTENSIONS: [&str; 3] = ["csv", "tsv", "txt"];

/// A request to ingest one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub location: PathBuf,
    /// Overrides the batch identity derived from the location
    #[serde(default)]
    pub batch_id: Option<BatchId>,
}

impl BatchRequest {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            batch_id: None,
        }
    }

    pub fn with_batch_id(mut self, batch: BatchId) -> Self {
        self.batch_id = Some(batch);
        self
    }

    /// List the export files of the batch, one per table
    pub fn resolve(&self) -> EngineResult<ResolvedBatch> {
        let invalid = |message: String| EngineError::InvalidBatch {
            path: self.location.display().to_string(),
            message,
        };
        let (dir, files) = if self.location.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(&self.location)
                .map_err(|e| EngineError::io(&self.location, e))?
                .flatten()
                .map(|entry| entry.path())
                .filter(|p| p.is_file() && is_export(p))
                .collect();
            files.sort();
            (self.location.as_path(), files)
        } else if self.location.is_file() {
            let dir = self.location.parent().unwrap_or(Path::new(""));
            (dir, vec![self.location.clone()])
        } else {
            return Err(invalid("no such file or directory".to_string()));
        };
        if files.is_empty() {
            return Err(invalid("no delimited export files".to_string()));
        }

        let batch = match &self.batch_id {
            Some(batch) => batch.clone(),
            None => {
                let name = dir
                    .canonicalize()
                    .ok()
                    .and_then(|d| d.file_name().map(|n| n.to_string_lossy().into_owned()))
                    .ok_or_else(|| invalid("cannot derive a batch id".to_string()))?;
                BatchId::parse(name).map_err(invalid)?
            }
        };

        let mut tables: BTreeMap<TableName, PathBuf> = BTreeMap::new();
        for file in files {
            let stem = file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let table = TableName::from_file_stem(&stem)
                .map_err(|e| invalid(format!("{}: {e}", file.display())))?;
            if let Some(previous) = tables.insert(table.clone(), file.clone()) {
                return Err(invalid(format!(
                    "{} and {} both map to table '{table}'",
                    previous.display(),
                    file.display()
                )));
            }
        }
        Ok(ResolvedBatch {
            batch,
            tables: tables.into_iter().collect(),
        })
    }
}

fn is_export(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| EXPORT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Export files of a batch, keyed by table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBatch {
    pub batch: BatchId,
    /// Sorted by table name
    pub tables: Vec<(TableName, PathBuf)>,
}
