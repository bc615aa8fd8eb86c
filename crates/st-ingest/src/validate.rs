//! Row-level validation against a table schema

use serde::{Deserialize, Serialize};
use st_core::value::{date_to_days, is_null_token, parse_date, parse_decimal, parse_int};
use st_core::{ColumnSchema, CoreError, IntWidth, SemanticType};
use std::fmt;

/// Why a row was quarantined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuarantineReason {
    /// Value does not parse as the column's type
    TypeMismatch,
    /// Empty value in a non-nullable column
    NullViolation,
    /// Value parses but does not fit the column's width, precision or scale
    OutOfRange,
    /// Row has a different number of fields than the header
    FieldCount,
}

impl fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QuarantineReason::TypeMismatch => "type-mismatch",
            QuarantineReason::NullViolation => "null-violation",
            QuarantineReason::OutOfRange => "out-of-range",
            QuarantineReason::FieldCount => "field-count",
        };
        f.write_str(s)
    }
}

/// A quarantined row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub file: String,
    pub line: u64,
    /// Offending column; `None` for row-shape problems
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub reason: QuarantineReason,
    /// Offending raw value, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.reason)?;
        if let Some(column) = &self.column {
            write!(f, " in column '{}'", column)?;
        }
        if let Some(value) = &self.value {
            write!(f, " (value {:?})", value)?;
        }
        Ok(())
    }
}

/// A raw field coerced to its column's storage representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cell<'a> {
    Null,
    Int(i64),
    /// Mantissa at the column's scale
    Decimal(i128),
    Text(&'a str),
    /// Days since the Unix epoch
    Date(i32),
}

/// Coerce one raw field, or say why the row must be quarantined
pub(crate) fn coerce<'a>(raw: &'a str, column: &ColumnSchema) -> Result<Cell<'a>, QuarantineReason> {
    if is_null_token(raw) {
        return if column.nullable {
            Ok(Cell::Null)
        } else {
            Err(QuarantineReason::NullViolation)
        };
    }

    match column.ty {
        SemanticType::Int64 { width } => {
            let value = parse_int(raw).ok_or_else(|| integer_failure(raw))?;
            if width.contains(value) {
                Ok(Cell::Int(value))
            } else {
                Err(QuarantineReason::OutOfRange)
            }
        }
        SemanticType::Decimal { precision, scale } => {
            let fp = parse_decimal(raw).map_err(|e| match e {
                CoreError::DecimalOverflow { .. } => QuarantineReason::OutOfRange,
                _ => QuarantineReason::TypeMismatch,
            })?;
            let mantissa = fp.at_scale(scale).ok_or(QuarantineReason::OutOfRange)?;
            if fp.integer_digits() > precision - scale {
                return Err(QuarantineReason::OutOfRange);
            }
            Ok(Cell::Decimal(mantissa))
        }
        SemanticType::Date => parse_date(raw)
            .map(|d| Cell::Date(date_to_days(d)))
            .ok_or(QuarantineReason::TypeMismatch),
        SemanticType::Categorical | SemanticType::String => Ok(Cell::Text(raw)),
    }
}

/// What a column must become to hold a value its storage rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Growth {
    /// A null in a non-nullable column
    Nullable,
    /// A value of the column's semantic type beyond its width, precision or scale;
    /// carries the narrowest type holding that value
    Type(SemanticType),
}

/// How the column must grow for `raw`, when `raw` is a valid value of the
/// column's semantic type that `coerce` rejected only for its storage
pub(crate) fn growth(raw: &str, column: &ColumnSchema) -> Option<Growth> {
    if is_null_token(raw) {
        return (!column.nullable).then_some(Growth::Nullable);
    }
    match column.ty {
        SemanticType::Int64 { width } => {
            let value = parse_int(raw)?;
            (!width.contains(value)).then_some(Growth::Type(SemanticType::Int64 {
                width: IntWidth::for_range(value, value),
            }))
        }
        SemanticType::Decimal { precision, scale } => {
            let fp = parse_decimal(raw).ok()?;
            let fits = fp.at_scale(scale).is_some() && fp.integer_digits() <= precision - scale;
            (!fits).then_some(Growth::Type(SemanticType::Decimal {
                precision: fp.integer_digits().max(1) + fp.scale,
                scale: fp.scale,
            }))
        }
        SemanticType::Date | SemanticType::Categorical | SemanticType::String => None,
    }
}

/// Integer digits beyond i64 are out of range; anything else is a type mismatch
fn integer_failure(raw: &str) -> QuarantineReason {
    let digits = raw.trim().trim_start_matches(['-', '+']);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        QuarantineReason::OutOfRange
    } else {
        QuarantineReason::TypeMismatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_core::IntWidth;

    fn column(ty: SemanticType, nullable: bool) -> ColumnSchema {
        ColumnSchema::new("c", ty, nullable)
    }

    #[test]
    fn test_integer_coercion() {
        let col = column(
            SemanticType::Int64 {
                width: IntWidth::U8,
            },
            false,
        );
        assert_eq!(coerce(" 42 ", &col), Ok(Cell::Int(42)));
        assert_eq!(coerce("256", &col), Err(QuarantineReason::OutOfRange));
        assert_eq!(coerce("-1", &col), Err(QuarantineReason::OutOfRange));
        assert_eq!(
            coerce("99999999999999999999", &col),
            Err(QuarantineReason::OutOfRange)
        );
        assert_eq!(coerce("abc", &col), Err(QuarantineReason::TypeMismatch));
        assert_eq!(coerce("1.5", &col), Err(QuarantineReason::TypeMismatch));
        assert_eq!(coerce("", &col), Err(QuarantineReason::NullViolation));
    }

    #[test]
    fn test_decimal_coercion_normalizes_scale() {
        let col = column(
            SemanticType::Decimal {
                precision: 6,
                scale: 3,
            },
            true,
        );
        assert_eq!(coerce("10.005", &col), Ok(Cell::Decimal(10_005)));
        assert_eq!(coerce("7", &col), Ok(Cell::Decimal(7_000)));
        assert_eq!(coerce("0.5", &col), Ok(Cell::Decimal(500)));
        assert_eq!(coerce("1.2500", &col), Ok(Cell::Decimal(1_250)));
        assert_eq!(coerce("1.0001", &col), Err(QuarantineReason::OutOfRange));
        assert_eq!(coerce("1234.5", &col), Err(QuarantineReason::OutOfRange));
        assert_eq!(coerce("12,5", &col), Err(QuarantineReason::TypeMismatch));
        assert_eq!(coerce("NULL", &col), Ok(Cell::Null));
    }

    #[test]
    fn test_growth_for_valid_values_beyond_storage() {
        let id = column(
            SemanticType::Int64 {
                width: IntWidth::U8,
            },
            false,
        );
        assert_eq!(
            growth("256", &id),
            Some(Growth::Type(SemanticType::Int64 {
                width: IntWidth::U16
            }))
        );
        assert_eq!(
            growth("-1", &id),
            Some(Growth::Type(SemanticType::Int64 {
                width: IntWidth::I8
            }))
        );
        assert_eq!(growth("", &id), Some(Growth::Nullable));
        assert_eq!(growth("abc", &id), None);
        assert_eq!(growth("99999999999999999999", &id), None);

        let amount = column(
            SemanticType::Decimal {
                precision: 2,
                scale: 1,
            },
            true,
        );
        assert_eq!(
            growth("1.25", &amount),
            Some(Growth::Type(SemanticType::Decimal {
                precision: 3,
                scale: 2
            }))
        );
        assert_eq!(
            growth("123.5", &amount),
            Some(Growth::Type(SemanticType::Decimal {
                precision: 4,
                scale: 1
            }))
        );
        assert_eq!(growth("NULL", &amount), None);
        assert_eq!(growth("12,5", &amount), None);
    }

    #[test]
    fn test_date_and_text_coercion() {
        let date = column(SemanticType::Date, false);
        assert_eq!(coerce("1970-01-02", &date), Ok(Cell::Date(1)));
        assert_eq!(coerce("1970/01/01", &date), Ok(Cell::Date(0)));
        assert_eq!(coerce("yesterday", &date), Err(QuarantineReason::TypeMismatch));

        let text = column(SemanticType::Categorical, false);
        assert_eq!(coerce("north", &text), Ok(Cell::Text("north")));
    }

    #[test]
    fn test_reason_display_and_serde() {
        assert_eq!(QuarantineReason::TypeMismatch.to_string(), "type-mismatch");
        assert_eq!(
            serde_json::to_string(&QuarantineReason::FieldCount).unwrap(),
            "\"field-count\""
        );
        let err = ValidationError {
            file: "sales.csv".to_string(),
            line: 502,
            column: Some("units".to_string()),
            reason: QuarantineReason::TypeMismatch,
            value: Some("n/a?".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "sales.csv:502: type-mismatch in column 'units' (value \"n/a?\")"
        );
    }
}
