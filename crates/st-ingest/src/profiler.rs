//! Schema profiler
//!
//! Infers the narrowest typed schema that holds a bounded sample of raw
//! records, and reconciles it with the previously committed schema of the
//! table. Profiling is a pure function of its inputs.

use crate::error::{IngestError, PipelineResult};
use crate::source::RawRecord;
use crate::validate::Growth;
use st_core::value::{is_null_token, parse_date, parse_decimal, parse_int, DECIMAL_MAX_PRECISION};
use st_core::{
    ColumnSchema, IngestConfig, IntWidth, SemanticType, TableName, TableSchema, WideningPolicy,
};
use std::collections::HashSet;

/// Knobs for type inference and drift detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileOptions {
    /// Text columns with a distinct/non-null ratio below this are categorical
    pub categorical_ratio: f64,
    /// Schema changes accepted without operator intervention
    pub widening: WideningPolicy,
    /// Sampled values allowed to disagree with a column's inferred type;
    /// such values are quarantined at ingestion instead
    pub tolerance: usize,
}

impl ProfileOptions {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            categorical_ratio: config.categorical_ratio,
            widening: config.widening,
            tolerance: config.quarantine_threshold,
        }
    }
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

/// Running observations for one column of the sample
#[derive(Debug, Default)]
struct ColumnProfile {
    non_null: usize,
    nulls: usize,
    ints: usize,
    int_min: i64,
    int_max: i64,
    decimals: usize,
    integer_digits: u8,
    scale: u8,
    dates: usize,
    distinct: HashSet<String>,
}

impl ColumnProfile {
    fn observe(&mut self, raw: &str) {
        if is_null_token(raw) {
            self.nulls += 1;
            return;
        }
        self.non_null += 1;
        let value = raw.trim();

        if let Some(i) = parse_int(value) {
            if self.ints == 0 {
                self.int_min = i;
                self.int_max = i;
            } else {
                self.int_min = self.int_min.min(i);
                self.int_max = self.int_max.max(i);
            }
            self.ints += 1;
        }
        if let Ok(fp) = parse_decimal(value) {
            self.integer_digits = self.integer_digits.max(fp.integer_digits());
            self.scale = self.scale.max(fp.scale);
            self.decimals += 1;
        }
        if parse_date(value).is_some() {
            self.dates += 1;
        }
        self.distinct.insert(value.to_string());
    }

    /// A candidate type wins when it holds a majority of the sampled values
    /// and at most `tolerance` values disagree with it
    fn holds(&self, matches: usize, tolerance: usize) -> bool {
        matches > 0 && matches * 2 > self.non_null && self.non_null - matches <= tolerance
    }

    /// Inferred type, or `None` when the sample held no values
    fn decide(&self, options: &ProfileOptions) -> Option<SemanticType> {
        if self.non_null == 0 {
            return None;
        }
        if self.holds(self.ints, options.tolerance) {
            return Some(SemanticType::Int64 {
                width: IntWidth::for_range(self.int_min, self.int_max),
            });
        }
        let precision = self.integer_digits.max(1) + self.scale;
        if self.holds(self.decimals, options.tolerance)
            && u32::from(precision) <= DECIMAL_MAX_PRECISION
        {
            return Some(SemanticType::Decimal {
                precision,
                scale: self.scale,
            });
        }
        if self.holds(self.dates, options.tolerance) {
            return Some(SemanticType::Date);
        }
        let ratio = self.distinct.len() as f64 / self.non_null as f64;
        if ratio < options.categorical_ratio {
            Some(SemanticType::Categorical)
        } else {
            Some(SemanticType::String)
        }
    }
}

/// Infer the schema of `table` from a sample of its records
///
/// Without a prior schema the result is version 1. With one, the inferred
/// columns are merged into it: compatible changes widen the prior schema (and
/// bump its version only if something changed), incompatible ones are
/// reported together as [`IngestError::SchemaDrift`].
pub fn infer(
    table: &TableName,
    header: &[String],
    sample: &[RawRecord],
    prior: Option<&TableSchema>,
    options: &ProfileOptions,
) -> PipelineResult<TableSchema> {
    let mut profiles: Vec<ColumnProfile> =
        header.iter().map(|_| ColumnProfile::default()).collect();
    let mut skipped = 0usize;
    for record in sample {
        if record.fields.len() != header.len() {
            skipped += 1;
            continue;
        }
        for (profile, field) in profiles.iter_mut().zip(&record.fields) {
            profile.observe(field);
        }
    }
    if skipped > 0 {
        log::debug!(
            "Profiler skipped {} sampled row(s) of '{}' with a wrong field count",
            skipped,
            table
        );
    }

    let inferred: Vec<(&str, Option<SemanticType>, bool)> = header
        .iter()
        .zip(&profiles)
        .map(|(name, p)| (name.as_str(), p.decide(options), p.nulls > 0))
        .collect();

    let Some(prior) = prior else {
        let columns = inferred
            .into_iter()
            .map(|(name, ty, nullable)| match ty {
                Some(ty) => ColumnSchema::new(name, ty, nullable),
                None => ColumnSchema::new(name, SemanticType::String, true),
            })
            .collect();
        return Ok(TableSchema::new(table.clone(), 1, columns));
    };

    let mut changes = Vec::new();
    let mut columns = Vec::with_capacity(prior.columns.len());
    for column in &prior.columns {
        match inferred.iter().find(|(name, _, _)| *name == column.name) {
            None => changes.push(format!("column '{}' was removed", column.name)),
            Some((_, ty, nullable)) => {
                let ty = match ty {
                    None => Ok(column.ty),
                    Some(ty) => merge_type(column.ty, *ty, &options.widening),
                };
                match ty {
                    Ok(ty) => columns.push(ColumnSchema::new(
                        &column.name,
                        ty,
                        column.nullable || *nullable,
                    )),
                    Err(reason) => changes.push(format!("column '{}': {}", column.name, reason)),
                }
            }
        }
    }
    for (name, ty, _) in &inferred {
        if prior.column(name).is_some() {
            continue;
        }
        if options.widening.added_columns {
            // Earlier partitions have no values for an added column
            columns.push(ColumnSchema::new(*name, ty.unwrap_or(SemanticType::String), true));
        } else {
            changes.push(format!("column '{}' was added", name));
        }
    }

    if !changes.is_empty() {
        log::warn!("Schema drift for '{}': {}", table, changes.join("; "));
        return Err(IngestError::SchemaDrift {
            table: table.to_string(),
            changes,
        });
    }

    let version = if columns == prior.columns {
        prior.version
    } else {
        prior.version + 1
    };
    Ok(TableSchema::new(table.clone(), version, columns))
}

/// Widen `column` so it holds a value its storage rejected
///
/// Nullability always widens; storage types widen as `policy` allows.
pub(crate) fn widen_column(
    column: &ColumnSchema,
    growth: Growth,
    policy: &WideningPolicy,
) -> Result<ColumnSchema, String> {
    match growth {
        Growth::Nullable => Ok(ColumnSchema::new(&column.name, column.ty, true)),
        Growth::Type(ty) => merge_type(column.ty, ty, policy)
            .map(|ty| ColumnSchema::new(&column.name, ty, column.nullable))
            .map_err(|reason| format!("column '{}': {}", column.name, reason)),
    }
}

/// Integer digits and scale a numeric type can hold
fn numeric_digits(ty: SemanticType) -> (u8, u8) {
    match ty {
        SemanticType::Int64 { width } => (width.max_digits(), 0),
        SemanticType::Decimal { precision, scale } => (precision - scale, scale),
        _ => (0, 0),
    }
}

/// Reconcile a committed column type with a newly inferred one
fn merge_type(
    prior: SemanticType,
    new: SemanticType,
    policy: &WideningPolicy,
) -> Result<SemanticType, String> {
    use SemanticType::*;

    match (prior, new) {
        (a, b) if a == b => Ok(a),
        (Int64 { width: a }, Int64 { width: b }) => {
            if a.covers(b) {
                Ok(prior)
            } else if policy.integers {
                Ok(Int64 { width: a.union(b) })
            } else {
                Err(format!("integer widening {} -> {} is not allowed", a, b))
            }
        }
        (Int64 { .. } | Decimal { .. }, Int64 { .. } | Decimal { .. }) => {
            let (prior_int, prior_scale) = numeric_digits(prior);
            let (new_int, new_scale) = numeric_digits(new);
            let integer_digits = prior_int.max(new_int);
            let scale = prior_scale.max(new_scale);
            let merged = Decimal {
                precision: integer_digits + scale,
                scale,
            };
            if matches!(prior, Decimal { .. })
                && integer_digits == prior_int
                && scale == prior_scale
            {
                Ok(prior)
            } else if !policy.decimals {
                Err(format!("decimal widening {} -> {} is not allowed", prior, merged))
            } else if u32::from(integer_digits + scale) > DECIMAL_MAX_PRECISION {
                Err(format!(
                    "widening {} -> {} exceeds the maximum precision of {}",
                    prior, merged, DECIMAL_MAX_PRECISION
                ))
            } else {
                Ok(merged)
            }
        }
        (Int64 { .. } | Decimal { .. }, _) => {
            Err(format!("numeric column ({}) now holds {} values", prior, new))
        }
        (Date, _) => Err(format!("date column now holds {} values", new)),
        (Categorical, String) => Ok(String),
        (Categorical | String, _) => Ok(prior),
    }
}

#[cfg(test)]
#[path = "profiler_test.rs"]
mod tests;
