//! Error types for st-core

use thiserror::Error;

/// Core error type for Stratum
#[derive(Error, Debug)]
pub enum CoreError {
    /// C001: Configuration file not found
    #[error("[C001] Config file not found: {path}")]
    ConfigNotFound { path: String },

    /// C002: Failed to parse configuration file
    #[error("[C002] Failed to parse config: {message}")]
    ConfigParseError { message: String },

    /// C003: Invalid configuration value
    #[error("[C003] Invalid config: {message}")]
    ConfigInvalid { message: String },

    /// C004: KPI definition file could not be parsed or is incomplete
    #[error("[C004] Invalid KPI definition in {path}: {message}")]
    KpiDefinitionInvalid { path: String, message: String },

    /// C005: Two KPI files declare the same id
    #[error("[C005] Duplicate KPI id '{id}' in {path1} and {path2}")]
    KpiDuplicateId {
        id: String,
        path1: String,
        path2: String,
    },

    /// C006: A `$parameter` in a filter has no binding
    #[error("[C006] KPI '{kpi}' references unbound parameter '{parameter}'")]
    UnboundParameter { kpi: String, parameter: String },

    /// C007: A literal cannot be read as the declared type
    #[error("[C007] Invalid {expected} literal '{literal}'")]
    InvalidLiteral { literal: String, expected: String },

    /// C008: A decimal exceeds the supported precision
    #[error("[C008] Decimal '{literal}' exceeds {max} digits of precision")]
    DecimalOverflow { literal: String, max: u32 },

    /// C009: Query shape is invalid before any data is read
    #[error("[C009] Invalid query: {message}")]
    InvalidQuery { message: String },

    /// C010: IO error
    #[error("[C010] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// C011: IO error with file path context
    #[error("[C011] Failed to read '{path}': {source}")]
    IoWithPath {
        path: String,
        source: std::io::Error,
    },

    /// C012: YAML parse error
    #[error("[C012] YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for CoreError
pub type CoreResult<T> = Result<T, CoreError>;
