//! Configuration types and parsing for stratum.yml

use crate::error::{CoreError, CoreResult};
use crate::serde_helpers::default_true;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main project configuration from stratum.yml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Project name
    pub name: String,

    /// Root directory for partitions, the catalog manifest and the KPI cache
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Directories containing KPI definition files
    #[serde(default = "default_kpi_paths")]
    pub kpi_paths: Vec<String>,

    /// Ingestion pipeline settings
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Query engine settings
    #[serde(default)]
    pub query: QueryConfig,

    /// KPI cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Partition catalog settings
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Settings for profiling, validating and encoding batches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestConfig {
    /// Rows encoded per columnar chunk
    #[serde(default = "default_chunk_rows")]
    pub chunk_rows: usize,

    /// Rows after which a partition file is closed and a new one started
    #[serde(default = "default_max_partition_rows")]
    pub max_partition_rows: usize,

    /// Quarantined rows tolerated before the batch is aborted
    #[serde(default = "default_quarantine_threshold")]
    pub quarantine_threshold: usize,

    /// Rows read by the schema profiler
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,

    /// Field delimiter of the raw exports
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Distinct/non-null ratio below which text columns become categorical
    #[serde(default = "default_categorical_ratio")]
    pub categorical_ratio: f64,

    /// Which schema changes count as compatible widenings
    #[serde(default)]
    pub widening: WideningPolicy,
}

/// Schema changes accepted without operator intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WideningPolicy {
    /// Allow an integer column to move to a wider storage width
    #[serde(default = "default_true")]
    pub integers: bool,

    /// Allow decimal precision/scale growth, including integer -> decimal
    #[serde(default = "default_true")]
    pub decimals: bool,

    /// Allow columns that did not exist in the prior schema
    #[serde(default)]
    pub added_columns: bool,
}

/// Query engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryConfig {
    /// Upper bound on distinct group-by keys held in memory
    #[serde(default = "default_max_groups")]
    pub max_groups: usize,
}

/// KPI cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Approximate bytes of cached results kept before LRU eviction
    #[serde(default = "default_budget_bytes")]
    pub budget_bytes: usize,

    /// Persist results so a restart does not force recomputation
    #[serde(default = "default_true")]
    pub persist: bool,
}

/// Partition catalog settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    /// Re-hash every live partition file when the catalog is opened
    #[serde(default = "default_true")]
    pub verify_checksums: bool,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_kpi_paths() -> Vec<String> {
    vec!["kpis".to_string()]
}

fn default_chunk_rows() -> usize {
    65_536
}

fn default_max_partition_rows() -> usize {
    50_000_000
}

fn default_quarantine_threshold() -> usize {
    1_000
}

fn default_sample_rows() -> usize {
    10_000
}

fn default_delimiter() -> char {
    ','
}

fn default_categorical_ratio() -> f64 {
    0.5
}

fn default_max_groups() -> usize {
    1_000_000
}

fn default_budget_bytes() -> usize {
    256 * 1024 * 1024
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_rows: default_chunk_rows(),
            max_partition_rows: default_max_partition_rows(),
            quarantine_threshold: default_quarantine_threshold(),
            sample_rows: default_sample_rows(),
            delimiter: default_delimiter(),
            categorical_ratio: default_categorical_ratio(),
            widening: WideningPolicy::default(),
        }
    }
}

impl Default for WideningPolicy {
    fn default() -> Self {
        Self {
            integers: true,
            decimals: true,
            added_columns: false,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_groups: default_max_groups(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            budget_bytes: default_budget_bytes(),
            persist: true,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            verify_checksums: true,
        }
    }
}

impl Config {
    /// Configuration with every setting at its default
    pub fn default_for(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_dir: default_data_dir(),
            kpi_paths: default_kpi_paths(),
            ingest: IngestConfig::default(),
            query: QueryConfig::default(),
            cache: CacheConfig::default(),
            catalog: CatalogConfig::default(),
        }
    }

    /// Load configuration from a file path
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Err(CoreError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> CoreResult<Self> {
        let config: Config =
            serde_yaml::from_str(content).map_err(|e| CoreError::ConfigParseError {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a project directory
    /// Looks for stratum.yml or stratum.yaml
    pub fn load_from_dir(dir: &Path) -> CoreResult<Self> {
        let yml_path = dir.join("stratum.yml");
        let yaml_path = dir.join("stratum.yaml");

        if yml_path.exists() {
            Self::load(&yml_path)
        } else if yaml_path.exists() {
            Self::load(&yaml_path)
        } else {
            Err(CoreError::ConfigNotFound {
                path: yml_path.display().to_string(),
            })
        }
    }

    /// Validate the configuration
    fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::ConfigInvalid {
                message: "Project name cannot be empty".to_string(),
            });
        }
        if self.ingest.chunk_rows == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "ingest.chunk_rows must be greater than zero".to_string(),
            });
        }
        if self.ingest.max_partition_rows < self.ingest.chunk_rows {
            return Err(CoreError::ConfigInvalid {
                message: "ingest.max_partition_rows must be at least ingest.chunk_rows"
                    .to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.ingest.categorical_ratio) {
            return Err(CoreError::ConfigInvalid {
                message: "ingest.categorical_ratio must be between 0 and 1".to_string(),
            });
        }
        if !self.ingest.delimiter.is_ascii() {
            return Err(CoreError::ConfigInvalid {
                message: "ingest.delimiter must be a single ASCII character".to_string(),
            });
        }
        if self.query.max_groups == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "query.max_groups must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Data directory resolved against the project root
    pub fn data_dir_absolute(&self, root: &Path) -> PathBuf {
        resolve(root, &self.data_dir)
    }

    /// KPI definition directories resolved against the project root
    pub fn kpi_paths_absolute(&self, root: &Path) -> Vec<PathBuf> {
        self.kpi_paths.iter().map(|p| resolve(root, p)).collect()
    }
}

fn resolve(root: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
