//! The `Stratum` facade
//!
//! Wires catalog, query engine, KPI cache and orchestrator together from a
//! project configuration. These are the only inbound calls the core offers.

use crate::batch::BatchRequest;
use crate::error::{EngineError, EngineResult};
use crate::orchestrator::{IngestionHandle, IngestionOrchestrator, IngestionStatus};
use st_catalog::{PartitionCatalog, StorageLayout};
use st_core::{AggregateQuery, Config, KpiDefinition, KpiId, Parameters};
use st_kpi::{KpiCache, KpiRegistry, KpiResult, KpiStore};
use st_query::{QueryEngine, ResultStream, ResultTable};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// An opened Stratum project
#[derive(Debug, Clone)]
pub struct Stratum {
    config: Config,
    catalog: PartitionCatalog,
    engine: QueryEngine,
    cache: KpiCache,
    orchestrator: IngestionOrchestrator,
}

impl Stratum {
    /// Open the project whose `stratum.yml` lives in `root`
    pub fn open(root: &Path) -> EngineResult<Self> {
        let config = Config::load_from_dir(root)?;
        Self::with_config(config, root)
    }

    /// Open with an explicit configuration; relative paths resolve against `root`
    pub fn with_config(config: Config, root: &Path) -> EngineResult<Self> {
        let layout = StorageLayout::new(config.data_dir_absolute(root));
        let catalog = PartitionCatalog::open(layout, &config.catalog)?;
        let registry = Arc::new(KpiRegistry::load(&config.kpi_paths_absolute(root))?);
        let engine = QueryEngine::new(catalog.clone(), &config.query);
        let store = if config.cache.persist {
            Some(Arc::new(KpiStore::open(&catalog.layout().kpi_store_path())?))
        } else {
            None
        };
        let cache = KpiCache::new(
            registry,
            catalog.clone(),
            Arc::new(engine.clone()),
            &config.cache,
            store,
        )?;
        let orchestrator =
            IngestionOrchestrator::new(catalog.clone(), config.ingest.clone(), Some(cache.clone()));
        log::info!(
            "Opened project '{}' with {} table(s) and {} KPI(s)",
            config.name,
            catalog.tables()?.len(),
            cache.registry().len()
        );
        Ok(Self {
            config,
            catalog,
            engine,
            cache,
            orchestrator,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &PartitionCatalog {
        &self.catalog
    }

    pub fn cache(&self) -> &KpiCache {
        &self.cache
    }

    /// Start ingesting a batch; see [`IngestionOrchestrator::trigger_ingestion`]
    pub fn trigger_ingestion(&self, request: BatchRequest) -> EngineResult<IngestionHandle> {
        self.orchestrator.trigger_ingestion(request)
    }

    pub fn ingestion_status(&self) -> EngineResult<IngestionStatus> {
        self.orchestrator.ingestion_status()
    }

    /// Plan a query; rows are produced lazily by the returned stream
    pub fn execute(&self, query: &AggregateQuery) -> EngineResult<ResultStream> {
        Ok(self.engine.execute(query)?)
    }

    /// Run a query to completion on the blocking pool
    pub async fn query(&self, query: &AggregateQuery) -> EngineResult<ResultTable> {
        let stream = self.engine.execute(query)?;
        let table = tokio::task::spawn_blocking(move || stream.try_collect())
            .await
            .map_err(|e| EngineError::Task(e.to_string()))??;
        Ok(table)
    }

    pub fn register_kpi(&self, def: KpiDefinition) -> EngineResult<()> {
        Ok(self.cache.registry().register(def)?)
    }

    /// Current value of a KPI
    pub async fn kpi(&self, id: &KpiId, params: &Parameters) -> EngineResult<Arc<KpiResult>> {
        Ok(self.cache.get(id, params).await?)
    }

    /// Like [`kpi`](Self::kpi), returning `Timeout` once `timeout` passes
    pub async fn kpi_with_timeout(
        &self,
        id: &KpiId,
        params: &Parameters,
        timeout: Duration,
    ) -> EngineResult<Arc<KpiResult>> {
        Ok(self.cache.get_with_timeout(id, params, timeout).await?)
    }
}
