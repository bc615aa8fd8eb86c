//! Shared serde helper functions used across multiple modules.

use serde::{Deserialize, Deserializer};

/// Serde default function that returns `true`.
pub fn default_true() -> bool {
    true
}

/// Accept a YAML/JSON scalar (string, number or bool) as its textual form.
///
/// Filter literals are written by hand in KPI files, where `value: 100` and
/// `value: "100"` must mean the same thing.
pub fn scalar_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Int(i64),
        Unsigned(u64),
        Float(f64),
        Bool(bool),
    }

    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Text(s) => s,
        Scalar::Int(i) => i.to_string(),
        Scalar::Unsigned(u) => u.to_string(),
        Scalar::Float(f) => f.to_string(),
        Scalar::Bool(b) => b.to_string(),
    })
}
