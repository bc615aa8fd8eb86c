//! KPI definition registry
//!
//! A pure metadata store. Definitions are shared as `Arc` so the cache can
//! hold one across a computation without copying it.

use crate::error::{CacheResult, KpiError};
use st_core::{discover_kpis, KpiDefinition, KpiId, TableName};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Registered KPI definitions by id
#[derive(Debug, Default)]
pub struct KpiRegistry {
    definitions: RwLock<BTreeMap<KpiId, Arc<KpiDefinition>>>,
}

impl KpiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from every KPI file under `paths`
    pub fn load(paths: &[PathBuf]) -> CacheResult<Self> {
        let registry = Self::new();
        for def in discover_kpis(paths)? {
            registry.register(def)?;
        }
        log::debug!("Loaded {} KPI definitions", registry.len());
        Ok(registry)
    }

    /// Add a definition.
    ///
    /// Re-registering an identical specification is a no-op; a different
    /// specification under an existing id is a `DuplicateDefinition`.
    pub fn register(&self, def: KpiDefinition) -> CacheResult<()> {
        def.validate()?;
        let mut definitions = self
            .definitions
            .write()
            .map_err(|e| KpiError::poisoned("KPI registry", e))?;
        if let Some(existing) = definitions.get(&def.id) {
            if existing.same_spec(&def) {
                return Ok(());
            }
            return Err(KpiError::DuplicateDefinition {
                id: def.id.to_string(),
            });
        }
        definitions.insert(def.id.clone(), Arc::new(def));
        Ok(())
    }

    pub fn resolve(&self, id: &KpiId) -> CacheResult<Arc<KpiDefinition>> {
        self.read()?
            .get(id)
            .cloned()
            .ok_or_else(|| KpiError::UnknownKpi { id: id.to_string() })
    }

    /// Tables whose partitions feed a KPI
    pub fn dependencies_of(&self, id: &KpiId) -> CacheResult<BTreeSet<TableName>> {
        Ok(self.resolve(id)?.dependencies())
    }

    /// Definitions depending on any of `tables`
    pub fn dependents_of(&self, tables: &BTreeSet<TableName>) -> CacheResult<Vec<Arc<KpiDefinition>>> {
        Ok(self
            .read()?
            .values()
            .filter(|def| !def.dependencies().is_disjoint(tables))
            .cloned()
            .collect())
    }

    pub fn ids(&self) -> CacheResult<Vec<KpiId>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(
        &self,
    ) -> CacheResult<std::sync::RwLockReadGuard<'_, BTreeMap<KpiId, Arc<KpiDefinition>>>> {
        self.definitions
            .read()
            .map_err(|e| KpiError::poisoned("KPI registry", e))
    }
}
