//! Typed cell values and exact fixed-point helpers.
//!
//! Numeric aggregation never goes through floating point: decimals are kept
//! as an `i128` mantissa at a known scale, and converted to
//! [`rust_decimal::Decimal`] only when a result is handed out.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{CoreError, CoreResult};

/// Largest precision accepted for decimal columns
pub const DECIMAL_MAX_PRECISION: u32 = 28;

/// Largest scale accepted for decimal columns
pub const DECIMAL_MAX_SCALE: u8 = 18;

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

/// Tokens read as null in addition to the empty string
const NULL_TOKENS: [&str; 4] = ["null", "na", "n/a", "none"];

/// A single typed value in a query or KPI result
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Int(i64),
    Decimal(Decimal),
    Text(String),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Total order used for `order_by`: nulls first, numbers compared exactly
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Int(a), Value::Decimal(b)) => Decimal::from(*a).cmp(b),
            (Value::Decimal(a), Value::Int(b)) => a.cmp(&Decimal::from(*b)),
            (Value::Decimal(a), Value::Decimal(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int(_) | Value::Decimal(_) => 1,
            Value::Date(_) => 2,
            Value::Text(_) => 3,
        }
    }

    /// Decimal view of a numeric value
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Int(i) => Some(Decimal::from(*i)),
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Text(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// A decimal literal split into mantissa and scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPoint {
    pub mantissa: i128,
    pub scale: u8,
}

impl FixedPoint {
    /// Digits needed left of the decimal point
    pub fn integer_digits(&self) -> u8 {
        let digits = digit_count(self.mantissa.unsigned_abs());
        digits.saturating_sub(self.scale)
    }

    /// Mantissa expressed at a larger scale
    pub fn at_scale(&self, scale: u8) -> Option<i128> {
        rescale(self.mantissa, self.scale, scale)
    }
}

/// Whether a raw field denotes a missing value
pub fn is_null_token(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty() || NULL_TOKENS.contains(&trimmed.to_ascii_lowercase().as_str())
}

/// Parse an integer field
pub fn parse_int(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}

/// Parse a plain decimal literal (`-12.050`) without loss
pub fn parse_decimal(raw: &str) -> CoreResult<FixedPoint> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+'))
    {
        return Err(CoreError::InvalidLiteral {
            literal: raw.to_string(),
            expected: "decimal".to_string(),
        });
    }
    let parsed = Decimal::from_str_exact(trimmed).map_err(|_| CoreError::InvalidLiteral {
        literal: raw.to_string(),
        expected: "decimal".to_string(),
    })?;
    let scale = parsed.scale();
    if scale > DECIMAL_MAX_SCALE as u32 {
        return Err(CoreError::DecimalOverflow {
            literal: raw.to_string(),
            max: DECIMAL_MAX_SCALE as u32,
        });
    }
    Ok(FixedPoint {
        mantissa: parsed.mantissa(),
        scale: scale as u8,
    })
}

/// Parse a calendar date in one of the accepted export formats
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

/// Days since 1970-01-01, the columnar date representation
pub fn date_to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - epoch_days_from_ce()
}

/// Inverse of [`date_to_days`]
pub fn days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(epoch_days_from_ce())?)
}

fn epoch_days_from_ce() -> i32 {
    // 1970-01-01 is day 719_163 counted from 0001-01-01
    719_163
}

/// Move a mantissa from one scale to a larger one; `None` on overflow or
/// when narrowing would lose digits
pub fn rescale(mantissa: i128, from: u8, to: u8) -> Option<i128> {
    match to.cmp(&from) {
        Ordering::Equal => Some(mantissa),
        Ordering::Greater => mantissa.checked_mul(pow10(to - from)?),
        Ordering::Less => {
            let factor = pow10(from - to)?;
            (mantissa % factor == 0).then(|| mantissa / factor)
        }
    }
}

/// 10^exp as i128, `None` past 10^38
pub fn pow10(exp: u8) -> Option<i128> {
    10i128.checked_pow(exp as u32)
}

/// Convert an exact mantissa into a [`Decimal`] result value
pub fn to_decimal(mantissa: i128, scale: u8) -> CoreResult<Decimal> {
    Decimal::try_from_i128_with_scale(mantissa, scale as u32).map_err(|_| {
        CoreError::DecimalOverflow {
            literal: format!("{mantissa}e-{scale}"),
            max: DECIMAL_MAX_PRECISION,
        }
    })
}

fn digit_count(mut n: u128) -> u8 {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

#[cfg(test)]
#[path = "value_test.rs"]
mod tests;
