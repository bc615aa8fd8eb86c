//! Ingestion orchestrator
//!
//! Drives one batch through profiling, ingestion and a single catalog commit,
//! then warms dependent KPIs. At most one ingestion runs at a time; a second
//! trigger while one is running fails fast.

use crate::batch::BatchRequest;
use crate::error::{EngineError, EngineResult};
use crate::report::{CatalogSchemaDocument, IngestionReport, RunStatus, TableReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use st_catalog::{CatalogView, CommitRequest, PartitionCatalog, StagedPartition};
use st_core::{BatchId, IngestConfig, TableName, TableSchema};
use st_ingest::{
    infer, DelimitedSource, IngestResult, IngestionPipeline, PipelineOptions, PipelineResult,
    ProfileOptions,
};
use st_kpi::KpiCache;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// The ingestion currently in progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningIngestion {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub location: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IngestionState {
    Idle,
    Running(RunningIngestion),
}

/// Snapshot returned by [`IngestionOrchestrator::ingestion_status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionStatus {
    pub state: IngestionState,
    /// Report of the most recently finished run, successful or not
    pub last_result: Option<IngestionReport>,
}

#[derive(Debug, Default)]
struct OrchestratorState {
    running: Option<RunningIngestion>,
    last_result: Option<IngestionReport>,
}

/// Clears the running slot when a run ends, including by panic
struct RunGuard {
    state: Arc<Mutex<OrchestratorState>>,
}

impl RunGuard {
    fn finish(&self, report: IngestionReport) {
        if let Ok(mut state) = self.state.lock() {
            state.last_result = Some(report);
            state.running = None;
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.running = None;
        }
    }
}

/// Handle to a triggered ingestion
#[derive(Debug)]
pub struct IngestionHandle {
    run_id: String,
    task: JoinHandle<EngineResult<IngestionReport>>,
}

impl IngestionHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Wait for the run to finish
    pub async fn wait(self) -> EngineResult<IngestionReport> {
        self.task
            .await
            .map_err(|e| EngineError::Task(e.to_string()))?
    }
}

/// Runs batches through profiler, pipeline and catalog commit
#[derive(Debug, Clone)]
pub struct IngestionOrchestrator {
    worker: BatchWorker,
    cache: Option<KpiCache>,
    state: Arc<Mutex<OrchestratorState>>,
}

impl IngestionOrchestrator {
    pub fn new(catalog: PartitionCatalog, config: IngestConfig, cache: Option<KpiCache>) -> Self {
        Self {
            worker: BatchWorker { catalog, config },
            cache,
            state: Arc::new(Mutex::new(OrchestratorState::default())),
        }
    }

    fn state(&self) -> EngineResult<MutexGuard<'_, OrchestratorState>> {
        self.state
            .lock()
            .map_err(|e| EngineError::Task(format!("orchestrator state poisoned: {e}")))
    }

    /// Start ingesting a batch in the background.
    ///
    /// Must be called from within a Tokio runtime. Fails with
    /// `IngestionInProgress` while another run is active.
    pub fn trigger_ingestion(&self, request: BatchRequest) -> EngineResult<IngestionHandle> {
        let run = RunningIngestion {
            run_id: Uuid::new_v4().simple().to_string()[..8].to_string(),
            started_at: Utc::now(),
            location: request.location.clone(),
        };
        {
            let mut state = self.state()?;
            if let Some(active) = &state.running {
                return Err(EngineError::IngestionInProgress {
                    run_id: active.run_id.clone(),
                });
            }
            state.running = Some(run.clone());
        }
        log::info!(
            "Ingestion {} started for {}",
            run.run_id,
            run.location.display()
        );

        let guard = RunGuard {
            state: Arc::clone(&self.state),
        };
        let worker = self.worker.clone();
        let cache = self.cache.clone();
        let run_id = run.run_id.clone();
        let task = tokio::spawn(async move {
            let report = IngestionReport::new(&run.run_id, &run.location, run.started_at);
            let job = tokio::task::spawn_blocking(move || {
                let mut report = report;
                let outcome = worker.run(&request, &mut report);
                (worker, report, outcome)
            })
            .await;
            let (worker, mut report, outcome) = match job {
                Ok(done) => done,
                Err(e) => {
                    let mut report =
                        IngestionReport::new(&run.run_id, &run.location, run.started_at);
                    report.error = Some(e.to_string());
                    report.finished_at = Utc::now();
                    guard.finish(report);
                    return Err(EngineError::Task(e.to_string()));
                }
            };

            let outcome = match outcome {
                Ok(touched) => {
                    if let Some(cache) = &cache {
                        match cache.warm_on_ingest(&touched).await {
                            Ok(n) => report.kpis_warmed = n,
                            Err(e) => log::warn!("KPI warm-up skipped: {e}"),
                        }
                    }
                    report.status = RunStatus::Completed;
                    Ok(())
                }
                Err(e) => {
                    log::warn!("Ingestion {} failed: {e}", run.run_id);
                    report.error = Some(e.to_string());
                    Err(e)
                }
            };
            report.finished_at = Utc::now();
            let path = worker.report_path(&run.run_id);
            if let Err(e) = report.save(&path) {
                log::warn!("Failed to write {}: {e}", path.display());
            }
            log::info!(
                "Ingestion {} {}: {} rows accepted, {} quarantined",
                run.run_id,
                if report.succeeded() { "completed" } else { "failed" },
                report.rows_accepted(),
                report.rows_quarantined()
            );
            guard.finish(report.clone());
            outcome.map(|()| report)
        });
        Ok(IngestionHandle { run_id, task })
    }

    pub fn ingestion_status(&self) -> EngineResult<IngestionStatus> {
        let state = self.state()?;
        Ok(IngestionStatus {
            state: match &state.running {
                Some(run) => IngestionState::Running(run.clone()),
                None => IngestionState::Idle,
            },
            last_result: state.last_result.clone(),
        })
    }
}

/// The synchronous part of a run, executed on the blocking pool
#[derive(Debug, Clone)]
struct BatchWorker {
    catalog: PartitionCatalog,
    config: IngestConfig,
}

impl BatchWorker {
    fn report_path(&self, run_id: &str) -> PathBuf {
        self.catalog
            .layout()
            .metadata_dir()
            .join(format!("ingestion_{run_id}.json"))
    }

    /// Stage every table of the batch and commit them together.
    ///
    /// Returns the touched tables. On any failure all staged files are
    /// removed and the catalog is left unchanged.
    fn run(
        &self,
        request: &BatchRequest,
        report: &mut IngestionReport,
    ) -> EngineResult<BTreeSet<TableName>> {
        let resolved = request.resolve()?;
        report.batch = Some(resolved.batch.clone());
        let view = self.catalog.snapshot()?;
        let pipeline = IngestionPipeline::new(
            self.catalog.layout().clone(),
            PipelineOptions::from_config(&self.config),
        );

        let mut staged: Vec<IngestResult> = Vec::new();
        for (table, path) in &resolved.tables {
            match self.stage_table(&pipeline, &view, table, path, &resolved.batch) {
                Ok(result) => {
                    report.tables.push(TableReport::new(path, &result));
                    staged.push(result);
                }
                Err(e) => {
                    staged.iter().for_each(IngestResult::discard);
                    return Err(e);
                }
            }
        }

        let replaces: Vec<_> = resolved
            .tables
            .iter()
            .flat_map(|(table, _)| view.live_batch(table, resolved.batch.as_str()))
            .map(|p| p.id)
            .collect();
        let touched: BTreeSet<TableName> = staged.iter().map(|r| r.table.clone()).collect();
        // A table widened during ingestion contributes one schema per version
        let mut schemas: Vec<TableSchema> = Vec::with_capacity(staged.len());
        let mut partitions: Vec<StagedPartition> = Vec::new();
        for result in staged {
            schemas.extend(result.schemas);
            partitions.extend(result.partitions);
        }
        let staged_files = partitions.clone();
        report.replaced_partitions = replaces.len();

        if let Err(e) = self.catalog.commit_batch(CommitRequest {
            schemas,
            partitions,
            replaces,
        }) {
            staged_files.iter().for_each(StagedPartition::discard);
            return Err(e.into());
        }

        let doc_path = self.catalog.layout().metadata_dir().join("catalog_schema.json");
        let written = self
            .catalog
            .snapshot()
            .map_err(EngineError::from)
            .and_then(|view| CatalogSchemaDocument::from_view(&view).save(&doc_path));
        if let Err(e) = written {
            log::warn!("Failed to write {}: {e}", doc_path.display());
        }
        Ok(touched)
    }

    /// Profile and ingest one export file into staged partitions
    fn stage_table(
        &self,
        pipeline: &IngestionPipeline,
        view: &CatalogView,
        table: &TableName,
        path: &Path,
        batch: &BatchId,
    ) -> EngineResult<IngestResult> {
        let mut source = DelimitedSource::open(path, self.config.delimiter as u8)?;
        let header = source.header().to_vec();
        let sample = source
            .by_ref()
            .take(self.config.sample_rows)
            .collect::<PipelineResult<Vec<_>>>()?;
        let prior = view.active_schema(table);
        let schema = infer(
            table,
            &header,
            &sample,
            prior,
            &ProfileOptions::from_config(&self.config),
        )?;
        if prior.is_some_and(|p| p.version != schema.version) {
            log::info!("Table '{table}' moves to schema version {}", schema.version);
        }

        let records = sample.into_iter().map(Ok).chain(source);
        let result = pipeline.ingest(table, batch, &schema, &header, records)?;
        log::info!(
            "Staged {} rows of '{table}' in {} partition(s), {} quarantined",
            result.rows_accepted,
            result.partitions.len(),
            result.quarantined.len()
        );
        if result.schema_version != schema.version {
            log::info!(
                "Table '{table}' widened to schema version {} during ingestion",
                result.schema_version
            );
        }
        Ok(result)
    }
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod tests;
