//! Persistent KPI result store.
//!
//! [`KpiStore`] owns a DuckDB [`Connection`] holding one row per cached
//! result, keyed by fingerprint. Results are stored as JSON payloads; the
//! cache revalidates them against the catalog when it loads them.

use crate::error::{CacheResult, KpiError};
use crate::fingerprint::Fingerprint;
use crate::value::KpiResult;
use duckdb::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = "CREATE SCHEMA IF NOT EXISTS st_cache;
     CREATE TABLE IF NOT EXISTS st_cache.kpi_results (
         fingerprint VARCHAR PRIMARY KEY,
         kpi_id      VARCHAR NOT NULL,
         computed_at VARCHAR NOT NULL,
         payload     VARCHAR NOT NULL
     );";

/// DuckDB-backed store of computed KPI results
pub struct KpiStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for KpiStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KpiStore").finish_non_exhaustive()
    }
}

impl KpiStore {
    /// Open (or create) the store at `path`
    pub fn open(path: &Path) -> CacheResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| KpiError::Store(format!("{e}: {}", parent.display())))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| KpiError::Store(format!("{e}: {}", path.display())))?;
        Self::init(conn)
    }

    /// In-memory store, for tests
    pub fn open_memory() -> CacheResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> CacheResult<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| KpiError::Store(format!("failed to create kpi_results: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> CacheResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| KpiError::poisoned("KPI result store", e))
    }

    /// Insert or overwrite a result
    pub fn save(&self, result: &KpiResult) -> CacheResult<()> {
        let payload = serde_json::to_string(result)?;
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO st_cache.kpi_results (fingerprint, kpi_id, computed_at, payload)
                 VALUES (?, ?, ?, ?)",
                duckdb::params![
                    result.fingerprint.as_str(),
                    result.kpi.as_str(),
                    result.computed_at.to_rfc3339(),
                    payload
                ],
            )
            .map_err(|e| KpiError::Store(format!("save {}: {e}", result.kpi)))?;
        Ok(())
    }

    pub fn delete(&self, fingerprint: &Fingerprint) -> CacheResult<()> {
        self.conn()?
            .execute(
                "DELETE FROM st_cache.kpi_results WHERE fingerprint = ?",
                duckdb::params![fingerprint.as_str()],
            )
            .map_err(|e| KpiError::Store(format!("delete {fingerprint}: {e}")))?;
        Ok(())
    }

    /// Every stored result, oldest first.
    ///
    /// Rows whose payload no longer parses are dropped from the store.
    pub fn load_all(&self) -> CacheResult<Vec<KpiResult>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT fingerprint, payload FROM st_cache.kpi_results ORDER BY computed_at",
            )
            .map_err(|e| KpiError::Store(format!("prepare load_all: {e}")))?;
        let rows: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| KpiError::Store(format!("query load_all: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| KpiError::Store(format!("collect load_all: {e}")))?;

        let mut results = Vec::with_capacity(rows.len());
        for (fingerprint, payload) in rows {
            match serde_json::from_str::<KpiResult>(&payload) {
                Ok(result) => results.push(result),
                Err(e) => {
                    log::warn!("Dropping unreadable cached result {fingerprint}: {e}");
                    conn.execute(
                        "DELETE FROM st_cache.kpi_results WHERE fingerprint = ?",
                        duckdb::params![fingerprint],
                    )?;
                }
            }
        }
        Ok(results)
    }

    pub fn count(&self) -> CacheResult<usize> {
        let n: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM st_cache.kpi_results",
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}
