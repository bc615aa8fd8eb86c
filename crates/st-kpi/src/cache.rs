//! Fingerprint-keyed KPI cache with single-flight computation
//!
//! Every `get` pins the KPI's dependency tables and fingerprints the pinned
//! partition set. A hit is served from memory; a miss starts exactly one
//! computation per fingerprint and every caller for that fingerprint waits
//! on the same `watch` channel. Stale entries are never looked up again once
//! a dependency changes and leave the cache through LRU eviction.

use crate::error::{CacheResult, KpiError};
use crate::evaluator::KpiEvaluator;
use crate::fingerprint::{fingerprint, snapshot_of, DependencyEntry, Fingerprint};
use crate::registry::KpiRegistry;
use crate::store::KpiStore;
use crate::value::{KpiResult, KpiValue};
use chrono::Utc;
use st_catalog::{PartitionCatalog, PinnedView};
use st_core::{AggregateQuery, CacheConfig, KpiDefinition, KpiId, Parameters, TableName};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

type Outcome = CacheResult<Arc<KpiResult>>;

struct CacheEntry {
    result: Arc<KpiResult>,
    bytes: usize,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<Fingerprint, CacheEntry>,
    in_flight: HashMap<Fingerprint, watch::Receiver<Option<Outcome>>>,
    used_bytes: usize,
    tick: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn insert(&mut self, fingerprint: Fingerprint, result: Arc<KpiResult>) {
        let bytes = result.estimated_bytes();
        let last_used = self.next_tick();
        if let Some(old) = self.entries.insert(
            fingerprint,
            CacheEntry {
                result,
                bytes,
                last_used,
            },
        ) {
            self.used_bytes -= old.bytes;
        }
        self.used_bytes += bytes;
    }

    fn remove(&mut self, fingerprint: &Fingerprint) {
        if let Some(entry) = self.entries.remove(fingerprint) {
            self.used_bytes -= entry.bytes;
        }
    }

    /// Drop least-recently-used entries until within `budget`.
    ///
    /// `keep` and in-flight fingerprints are never evicted.
    fn evict_over_budget(&mut self, budget: usize, keep: &Fingerprint) -> Vec<Fingerprint> {
        let mut evicted = Vec::new();
        while self.used_bytes > budget {
            let victim = self
                .entries
                .iter()
                .filter(|(fp, _)| *fp != keep && !self.in_flight.contains_key(*fp))
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(fp, _)| fp.clone());
            let Some(fp) = victim else {
                break;
            };
            self.remove(&fp);
            evicted.push(fp);
        }
        evicted
    }
}

enum Lookup {
    Hit(Arc<KpiResult>),
    Wait(watch::Receiver<Option<Outcome>>),
}

/// Work handed to the blocking pool on a miss
struct Computation {
    def: Arc<KpiDefinition>,
    parameters: Parameters,
    query: AggregateQuery,
    view: PinnedView,
    fingerprint: Fingerprint,
    dependencies: Vec<DependencyEntry>,
}

struct CacheInner {
    registry: Arc<KpiRegistry>,
    catalog: PartitionCatalog,
    evaluator: Arc<dyn KpiEvaluator>,
    store: Option<Arc<KpiStore>>,
    budget_bytes: usize,
    state: Mutex<CacheState>,
    computations: AtomicU64,
}

/// Shared handle to the KPI cache
#[derive(Clone)]
pub struct KpiCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for KpiCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KpiCache")
            .field("budget_bytes", &self.inner.budget_bytes)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl KpiCache {
    /// Create a cache, loading and revalidating persisted results from `store`
    pub fn new(
        registry: Arc<KpiRegistry>,
        catalog: PartitionCatalog,
        evaluator: Arc<dyn KpiEvaluator>,
        config: &CacheConfig,
        store: Option<Arc<KpiStore>>,
    ) -> CacheResult<Self> {
        let cache = Self {
            inner: Arc::new(CacheInner {
                registry,
                catalog,
                evaluator,
                store,
                budget_bytes: config.budget_bytes,
                state: Mutex::new(CacheState::default()),
                computations: AtomicU64::new(0),
            }),
        };
        cache.inner.restore()?;
        Ok(cache)
    }

    pub fn registry(&self) -> &Arc<KpiRegistry> {
        &self.inner.registry
    }

    /// Result of a KPI for `params` against the current catalog state.
    ///
    /// Waits without limit for an in-flight computation of the same
    /// fingerprint.
    pub async fn get(&self, id: &KpiId, params: &Parameters) -> Outcome {
        match self.inner.lookup(id, params)? {
            Lookup::Hit(result) => Ok(result),
            Lookup::Wait(rx) => wait(id, rx).await,
        }
    }

    /// Like [`get`](Self::get), giving up after `timeout`.
    ///
    /// Expiry only detaches this caller; the computation keeps running and
    /// its result is still cached for other callers.
    pub async fn get_with_timeout(
        &self,
        id: &KpiId,
        params: &Parameters,
        timeout: Duration,
    ) -> Outcome {
        tokio::time::timeout(timeout, self.get(id, params))
            .await
            .map_err(|_| KpiError::Timeout {
                kpi: id.to_string(),
                waited_ms: timeout.as_millis(),
            })?
    }

    /// Recompute `on_ingest` KPIs depending on `tables` with default parameters.
    ///
    /// Returns how many were warmed; failures are logged, not returned.
    pub async fn warm_on_ingest(&self, tables: &BTreeSet<TableName>) -> CacheResult<usize> {
        let mut warmed = 0;
        for def in self.inner.registry.dependents_of(tables)? {
            if !def.refresh.warms_on_ingest() {
                continue;
            }
            match self.get(&def.id, &Parameters::new()).await {
                Ok(_) => warmed += 1,
                Err(e) => log::warn!("Warm-up of KPI '{}' failed: {e}", def.id),
            }
        }
        Ok(warmed)
    }

    /// Number of computations started since creation
    pub fn computation_count(&self) -> u64 {
        self.inner.computations.load(Ordering::SeqCst)
    }

    /// Cached entries, including ones no longer reachable by a fingerprint
    pub fn len(&self) -> usize {
        self.inner.state().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated bytes held by cached entries
    pub fn used_bytes(&self) -> usize {
        self.inner.state().map(|s| s.used_bytes).unwrap_or(0)
    }
}

async fn wait(id: &KpiId, mut rx: watch::Receiver<Option<Outcome>>) -> Outcome {
    let abandoned = || KpiError::ComputationFailure {
        kpi: id.to_string(),
        message: "computation abandoned".to_string(),
    };
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome).clone().unwrap_or_else(|| Err(abandoned())),
        Err(_) => Err(abandoned()),
    }
}

impl CacheInner {
    fn state(&self) -> CacheResult<MutexGuard<'_, CacheState>> {
        self.state
            .lock()
            .map_err(|e| KpiError::poisoned("KPI cache state", e))
    }

    /// Serve a hit, join an in-flight computation, or start one
    fn lookup(self: &Arc<Self>, id: &KpiId, params: &Parameters) -> CacheResult<Lookup> {
        let def = self.registry.resolve(id)?;
        let parameters = def.effective_parameters(params);
        let query = def.bind(&parameters)?;
        let tables = def.dependencies();
        let view = self
            .catalog
            .pin(&tables.iter().cloned().collect::<Vec<_>>())?;
        let dependencies = snapshot_of(&view, &tables);
        let fp = fingerprint(&def, &parameters, &dependencies)?;

        let mut state = self.state()?;
        let cached = state.entries.get(&fp).map(|e| Arc::clone(&e.result));
        if let Some(result) = cached {
            if expired(&def, &result) {
                log::debug!("KPI '{id}' result {fp} expired");
                state.remove(&fp);
            } else {
                let tick = state.next_tick();
                if let Some(entry) = state.entries.get_mut(&fp) {
                    entry.last_used = tick;
                }
                log::debug!("KPI '{id}' cache hit {fp}");
                return Ok(Lookup::Hit(result));
            }
        }
        if let Some(rx) = state.in_flight.get(&fp) {
            log::debug!("KPI '{id}' joining in-flight computation {fp}");
            return Ok(Lookup::Wait(rx.clone()));
        }

        let (tx, rx) = watch::channel(None);
        state.in_flight.insert(fp.clone(), rx.clone());
        drop(state);
        self.computations.fetch_add(1, Ordering::SeqCst);
        log::debug!("KPI '{id}' cache miss {fp}, computing");

        let computation = Computation {
            def,
            parameters,
            query,
            view,
            fingerprint: fp,
            dependencies,
        };
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let fp = computation.fingerprint.clone();
            let kpi = computation.def.id.to_string();
            let worker = Arc::clone(&inner);
            let outcome = match tokio::task::spawn_blocking(move || worker.compute(computation))
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    inner.abandon(&fp);
                    Err(KpiError::ComputationFailure {
                        kpi,
                        message: e.to_string(),
                    })
                }
            };
            let _ = tx.send(Some(outcome));
        });
        Ok(Lookup::Wait(rx))
    }

    /// Evaluate, persist and publish one result; runs on the blocking pool
    fn compute(&self, job: Computation) -> Outcome {
        let Computation {
            def,
            parameters,
            query,
            view,
            fingerprint,
            dependencies,
        } = job;
        let outcome = self
            .evaluator
            .evaluate(view, &query)
            .map(|table| {
                Arc::new(KpiResult {
                    kpi: def.id.clone(),
                    fingerprint: fingerprint.clone(),
                    parameters,
                    value: KpiValue::from_table(table, !def.group_by.is_empty()),
                    computed_at: Utc::now(),
                    dependencies,
                })
            })
            .map_err(|e| match e {
                KpiError::ComputationFailure { message, .. } => KpiError::ComputationFailure {
                    kpi: def.id.to_string(),
                    message,
                },
                other => other,
            });

        match &outcome {
            Ok(result) => {
                if let Some(store) = &self.store {
                    if let Err(e) = store.save(result) {
                        log::warn!("Failed to persist KPI '{}': {e}", def.id);
                    }
                }
                log::info!("Computed KPI '{}' ({fingerprint})", def.id);
            }
            Err(e) => log::warn!("{e}"),
        }
        self.complete(&fingerprint, &outcome);
        outcome
    }

    /// Publish an outcome: successes become entries, failures leave nothing
    fn complete(&self, fingerprint: &Fingerprint, outcome: &Outcome) {
        let evicted = match self.state() {
            Ok(mut state) => {
                state.in_flight.remove(fingerprint);
                match outcome {
                    Ok(result) => {
                        state.insert(fingerprint.clone(), Arc::clone(result));
                        state.evict_over_budget(self.budget_bytes, fingerprint)
                    }
                    Err(_) => Vec::new(),
                }
            }
            Err(e) => {
                log::warn!("{e}");
                return;
            }
        };
        self.forget(&evicted);
    }

    fn abandon(&self, fingerprint: &Fingerprint) {
        if let Ok(mut state) = self.state() {
            state.in_flight.remove(fingerprint);
        }
    }

    fn forget(&self, evicted: &[Fingerprint]) {
        for fp in evicted {
            log::debug!("Evicted KPI result {fp}");
            if let Some(store) = &self.store {
                if let Err(e) = store.delete(fp) {
                    log::warn!("Failed to delete evicted KPI result {fp}: {e}");
                }
            }
        }
    }

    /// Load persisted results that still match the current catalog
    fn restore(&self) -> CacheResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let view = self.catalog.snapshot()?;
        let (mut kept, mut dropped) = (0usize, 0usize);
        let mut state = self.state()?;
        for result in store.load_all()? {
            let valid = match self.registry.resolve(&result.kpi) {
                Ok(def) => {
                    let current = snapshot_of(&view, &def.dependencies());
                    current == result.dependencies
                        && fingerprint(&def, &result.parameters, &current)? == result.fingerprint
                        && !expired(&def, &result)
                }
                Err(_) => false,
            };
            if valid {
                state.insert(result.fingerprint.clone(), Arc::new(result));
                kept += 1;
            } else {
                store.delete(&result.fingerprint)?;
                dropped += 1;
            }
        }
        let evicted = state.evict_over_budget(self.budget_bytes, &Fingerprint::default());
        drop(state);
        self.forget(&evicted);
        log::info!("Restored {kept} cached KPI results, dropped {dropped} stale");
        Ok(())
    }
}

fn expired(def: &KpiDefinition, result: &KpiResult) -> bool {
    let Some(max_age) = def.refresh.max_age() else {
        return false;
    };
    (Utc::now() - result.computed_at)
        .to_std()
        .is_ok_and(|age| age >= max_age)
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod tests;
