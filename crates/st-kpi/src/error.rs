//! Error types for st-kpi
//!
//! [`KpiError`] is `Clone`: one computation outcome is handed to every caller
//! waiting on it, so lower-level errors are carried as messages.

use thiserror::Error;

/// KPI registry and cache errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KpiError {
    /// P001: No KPI registered under this id
    #[error("[P001] Unknown KPI '{id}'")]
    UnknownKpi { id: String },

    /// P002: Id already registered with a different specification
    #[error("[P002] KPI '{id}' is already registered with a different definition")]
    DuplicateDefinition { id: String },

    /// P003: The underlying query failed; shared by every waiter, never cached
    #[error("[P003] Computation of KPI '{kpi}' failed: {message}")]
    ComputationFailure { kpi: String, message: String },

    /// P004: Caller-supplied wait limit expired; the computation continues
    #[error("[P004] Timed out after {waited_ms}ms waiting for KPI '{kpi}'")]
    Timeout { kpi: String, waited_ms: u128 },

    /// P005: Definition cannot be bound or loaded
    #[error("[P005] Invalid KPI definition: {0}")]
    InvalidDefinition(String),

    /// P006: Result store (DuckDB) failure
    #[error("[P006] KPI result store error: {0}")]
    Store(String),

    /// P007: Catalog could not be read
    #[error("[P007] {0}")]
    Catalog(String),

    /// P008: A lock was poisoned by a panicking holder
    #[error("[P008] {lock} lock poisoned: {message}")]
    LockPoisoned { lock: String, message: String },
}

impl KpiError {
    /// Poisoned `lock`, named for the state it guards
    pub(crate) fn poisoned(lock: &str, err: impl std::fmt::Display) -> Self {
        KpiError::LockPoisoned {
            lock: lock.to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for KpiError
pub type CacheResult<T> = Result<T, KpiError>;

impl From<st_core::CoreError> for KpiError {
    fn from(err: st_core::CoreError) -> Self {
        KpiError::InvalidDefinition(err.to_string())
    }
}

impl From<st_catalog::CatalogError> for KpiError {
    fn from(err: st_catalog::CatalogError) -> Self {
        KpiError::Catalog(err.to_string())
    }
}

impl From<duckdb::Error> for KpiError {
    fn from(err: duckdb::Error) -> Self {
        KpiError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for KpiError {
    fn from(err: serde_json::Error) -> Self {
        KpiError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_poisoned_lock_is_named() {
        let lock = Mutex::new(0u32);
        let _ = std::panic::catch_unwind(|| {
            let _guard = lock.lock().unwrap();
            panic!("holder failed");
        });
        let err = lock
            .lock()
            .map(|_| ())
            .map_err(|e| KpiError::poisoned("KPI result store", e))
            .unwrap_err();
        assert!(
            err.to_string()
                .starts_with("[P008] KPI result store lock poisoned: "),
            "{err}"
        );
    }
}
