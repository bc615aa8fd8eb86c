//! Computed KPI values

use crate::fingerprint::{DependencyEntry, Fingerprint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use st_core::{KpiId, Parameters, Value};
use st_query::ResultTable;

/// The value of a KPI: a single number or a grouped table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiValue {
    Scalar(Value),
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
}

impl KpiValue {
    /// Ungrouped single-aggregate results collapse to a scalar
    pub fn from_table(table: ResultTable, grouped: bool) -> Self {
        if !grouped && table.columns.len() == 1 {
            if let Some(value) = table.scalar() {
                return KpiValue::Scalar(value.clone());
            }
        }
        KpiValue::Table {
            columns: table.columns,
            rows: table.rows.into_iter().map(|r| r.into_values()).collect(),
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            KpiValue::Scalar(v) => Some(v),
            KpiValue::Table { .. } => None,
        }
    }
}

/// A KPI value with the inputs it was computed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KpiResult {
    pub kpi: KpiId,
    pub fingerprint: Fingerprint,
    /// Effective parameters, defaults included
    pub parameters: Parameters,
    pub value: KpiValue,
    pub computed_at: DateTime<Utc>,
    pub dependencies: Vec<DependencyEntry>,
}

impl KpiResult {
    /// Approximate in-memory footprint used for the cache budget
    pub fn estimated_bytes(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}
