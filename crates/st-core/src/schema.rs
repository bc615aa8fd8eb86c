//! Typed, versioned table schemas produced by the profiler.
//!
//! A column's semantic type is one of a fixed set of variants; integer
//! columns additionally carry the narrowest storage width that held every
//! profiled value.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::names::TableName;

/// Storage width of an integer column.
///
/// Variants are ordered from narrowest to widest range; unsigned widths are
/// chosen when no negative value was seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntWidth {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    I64,
}

impl IntWidth {
    const ALL: [IntWidth; 7] = [
        IntWidth::U8,
        IntWidth::I8,
        IntWidth::U16,
        IntWidth::I16,
        IntWidth::U32,
        IntWidth::I32,
        IntWidth::I64,
    ];

    /// Inclusive value range representable at this width
    pub fn range(self) -> (i64, i64) {
        match self {
            IntWidth::U8 => (0, u8::MAX as i64),
            IntWidth::I8 => (i8::MIN as i64, i8::MAX as i64),
            IntWidth::U16 => (0, u16::MAX as i64),
            IntWidth::I16 => (i16::MIN as i64, i16::MAX as i64),
            IntWidth::U32 => (0, u32::MAX as i64),
            IntWidth::I32 => (i32::MIN as i64, i32::MAX as i64),
            IntWidth::I64 => (i64::MIN, i64::MAX),
        }
    }

    /// Narrowest width whose range contains `[min, max]`
    pub fn for_range(min: i64, max: i64) -> IntWidth {
        Self::ALL
            .into_iter()
            .find(|w| {
                let (lo, hi) = w.range();
                lo <= min && max <= hi
            })
            .unwrap_or(IntWidth::I64)
    }

    /// Whether `value` can be stored at this width
    pub fn contains(self, value: i64) -> bool {
        let (lo, hi) = self.range();
        lo <= value && value <= hi
    }

    /// Whether every value of `other` is representable at this width
    pub fn covers(self, other: IntWidth) -> bool {
        let (lo, hi) = self.range();
        let (olo, ohi) = other.range();
        lo <= olo && ohi <= hi
    }

    /// Narrowest width covering both `self` and `other`
    pub fn union(self, other: IntWidth) -> IntWidth {
        let (lo, hi) = self.range();
        let (olo, ohi) = other.range();
        Self::for_range(lo.min(olo), hi.max(ohi))
    }

    /// Number of decimal digits needed for the widest value at this width
    pub fn max_digits(self) -> u8 {
        let (lo, hi) = self.range();
        let widest = lo.unsigned_abs().max(hi.unsigned_abs());
        widest.to_string().len() as u8
    }

    /// Bytes per value in columnar storage
    pub fn byte_size(self) -> usize {
        match self {
            IntWidth::U8 | IntWidth::I8 => 1,
            IntWidth::U16 | IntWidth::I16 => 2,
            IntWidth::U32 | IntWidth::I32 => 4,
            IntWidth::I64 => 8,
        }
    }
}

impl fmt::Display for IntWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntWidth::U8 => "u8",
            IntWidth::I8 => "i8",
            IntWidth::U16 => "u16",
            IntWidth::I16 => "i16",
            IntWidth::U32 => "u32",
            IntWidth::I32 => "i32",
            IntWidth::I64 => "i64",
        };
        f.write_str(s)
    }
}

/// Semantic type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SemanticType {
    /// Signed 64-bit integer semantics, stored at `width`
    Int64 { width: IntWidth },
    /// Exact fixed-point number
    Decimal { precision: u8, scale: u8 },
    /// Low-cardinality text stored as dictionary ids
    Categorical,
    /// Free text
    String,
    /// Calendar date without time zone
    Date,
}

impl SemanticType {
    /// Whether values can be summed and averaged
    pub fn is_numeric(&self) -> bool {
        matches!(self, SemanticType::Int64 { .. } | SemanticType::Decimal { .. })
    }

    /// Whether values are text (dictionary-encoded or not)
    pub fn is_text(&self) -> bool {
        matches!(self, SemanticType::Categorical | SemanticType::String)
    }

    /// Fixed-point scale numeric values are normalized to (0 for integers)
    pub fn scale(&self) -> u8 {
        match self {
            SemanticType::Decimal { scale, .. } => *scale,
            _ => 0,
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticType::Int64 { width } => write!(f, "int64<{width}>"),
            SemanticType::Decimal { precision, scale } => {
                write!(f, "decimal({precision},{scale})")
            }
            SemanticType::Categorical => f.write_str("categorical"),
            SemanticType::String => f.write_str("string"),
            SemanticType::Date => f.write_str("date"),
        }
    }
}

/// One column of a table schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name as it appears in the export header
    pub name: String,
    /// Semantic type, including storage width for integers
    #[serde(rename = "type")]
    pub ty: SemanticType,
    /// Whether empty values are accepted
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, ty: SemanticType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable,
        }
    }

    /// Inferred integer storage width, if this is an integer column
    pub fn width(&self) -> Option<IntWidth> {
        match self.ty {
            SemanticType::Int64 { width } => Some(width),
            _ => None,
        }
    }
}

/// A versioned schema for one logical table.
///
/// Partitions are bound to exactly one `(table, version)` pair for life.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: TableName,
    pub version: u32,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(table: TableName, version: u32, columns: Vec<ColumnSchema>) -> Self {
        Self {
            table,
            version,
            columns,
        }
    }

    /// Look up a column by name
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Position of a column by name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Column names in declaration order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Whether two schemas describe identical columns, ignoring the version
    pub fn same_columns(&self, other: &TableSchema) -> bool {
        self.columns == other.columns
    }
}

#[cfg(test)]
#[path = "schema_test.rs"]
mod tests;
