//! Columnar chunk buffers
//!
//! Validated rows are appended column by column into typed buffers; a full
//! chunk becomes one Arrow record batch with the column's storage width.

use crate::source::RawRecord;
use crate::validate::{coerce, growth, Cell, Growth, QuarantineReason, ValidationError};
use arrow::array::{
    ArrayRef, Date32Array, Decimal128Array, DictionaryArray, Int16Array, Int32Array, Int64Array,
    Int8Array, StringArray, UInt16Array, UInt32Array, UInt8Array,
};
use arrow::datatypes::{Int32Type, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use st_catalog::ColumnStats;
use st_core::value::{days_to_date, to_decimal};
use st_core::{ColumnSchema, IntWidth, SemanticType, TableSchema, Value};
use std::sync::Arc;

/// Typed values of one column for the current chunk
#[derive(Debug)]
enum ColumnBuffer {
    Int {
        width: IntWidth,
        values: Vec<Option<i64>>,
    },
    Decimal {
        precision: u8,
        scale: u8,
        values: Vec<Option<i128>>,
    },
    Text {
        categorical: bool,
        values: Vec<Option<String>>,
    },
    Date(Vec<Option<i32>>),
}

impl ColumnBuffer {
    fn for_column(column: &ColumnSchema, capacity: usize) -> Self {
        match column.ty {
            SemanticType::Int64 { width } => ColumnBuffer::Int {
                width,
                values: Vec::with_capacity(capacity),
            },
            SemanticType::Decimal { precision, scale } => ColumnBuffer::Decimal {
                precision,
                scale,
                values: Vec::with_capacity(capacity),
            },
            SemanticType::Categorical => ColumnBuffer::Text {
                categorical: true,
                values: Vec::with_capacity(capacity),
            },
            SemanticType::String => ColumnBuffer::Text {
                categorical: false,
                values: Vec::with_capacity(capacity),
            },
            SemanticType::Date => ColumnBuffer::Date(Vec::with_capacity(capacity)),
        }
    }

    fn push(&mut self, cell: Cell<'_>) {
        match (self, cell) {
            (ColumnBuffer::Int { values, .. }, Cell::Int(v)) => values.push(Some(v)),
            (ColumnBuffer::Int { values, .. }, _) => values.push(None),
            (ColumnBuffer::Decimal { values, .. }, Cell::Decimal(v)) => values.push(Some(v)),
            (ColumnBuffer::Decimal { values, .. }, _) => values.push(None),
            (ColumnBuffer::Text { values, .. }, Cell::Text(v)) => values.push(Some(v.to_string())),
            (ColumnBuffer::Text { values, .. }, _) => values.push(None),
            (ColumnBuffer::Date(values), Cell::Date(v)) => values.push(Some(v)),
            (ColumnBuffer::Date(values), _) => values.push(None),
        }
    }

    /// Min, max and null count of the buffered values
    fn stats(&self) -> Result<ColumnStats, st_core::CoreError> {
        let mut stats = ColumnStats::empty();
        let (min, max, nulls) = match self {
            ColumnBuffer::Int { values, .. } => {
                let (min, max) = min_max(values.iter().flatten().copied());
                (
                    min.map(Value::Int),
                    max.map(Value::Int),
                    count_nulls(values),
                )
            }
            ColumnBuffer::Decimal { scale, values, .. } => {
                let (min, max) = min_max(values.iter().flatten().copied());
                let as_value = |m: Option<i128>| -> Result<Option<Value>, st_core::CoreError> {
                    m.map(|m| to_decimal(m, *scale).map(Value::Decimal))
                        .transpose()
                };
                (as_value(min)?, as_value(max)?, count_nulls(values))
            }
            ColumnBuffer::Text { values, .. } => {
                let (min, max) = min_max(values.iter().flatten().map(String::as_str));
                (
                    min.map(|s| Value::Text(s.to_string())),
                    max.map(|s| Value::Text(s.to_string())),
                    count_nulls(values),
                )
            }
            ColumnBuffer::Date(values) => {
                let (min, max) = min_max(values.iter().flatten().copied());
                (
                    min.and_then(days_to_date).map(Value::Date),
                    max.and_then(days_to_date).map(Value::Date),
                    count_nulls(values),
                )
            }
        };
        if let (Some(min), Some(max)) = (min, max) {
            stats.observe(&min);
            stats.observe(&max);
        }
        stats.null_count = nulls as u64;
        Ok(stats)
    }

    /// Drain the buffer into an Arrow array
    fn take_array(&mut self) -> Result<ArrayRef, ArrowError> {
        let array: ArrayRef = match self {
            ColumnBuffer::Int { width, values } => {
                let values = std::mem::take(values);
                int_array(*width, values)
            }
            ColumnBuffer::Decimal {
                precision,
                scale,
                values,
            } => {
                let values = std::mem::take(values);
                Arc::new(
                    values
                        .into_iter()
                        .collect::<Decimal128Array>()
                        .with_precision_and_scale(*precision, *scale as i8)?,
                )
            }
            ColumnBuffer::Text {
                categorical,
                values,
            } => {
                let values = std::mem::take(values);
                let iter = values.iter().map(|v| v.as_deref());
                if *categorical {
                    Arc::new(iter.collect::<DictionaryArray<Int32Type>>())
                } else {
                    Arc::new(iter.collect::<StringArray>())
                }
            }
            ColumnBuffer::Date(values) => {
                Arc::new(std::mem::take(values).into_iter().collect::<Date32Array>())
            }
        };
        Ok(array)
    }
}

fn int_array(width: IntWidth, values: Vec<Option<i64>>) -> ArrayRef {
    // Values were range-checked against the width during validation
    let iter = values.into_iter();
    match width {
        IntWidth::U8 => Arc::new(iter.map(|v| v.map(|x| x as u8)).collect::<UInt8Array>()),
        IntWidth::I8 => Arc::new(iter.map(|v| v.map(|x| x as i8)).collect::<Int8Array>()),
        IntWidth::U16 => Arc::new(iter.map(|v| v.map(|x| x as u16)).collect::<UInt16Array>()),
        IntWidth::I16 => Arc::new(iter.map(|v| v.map(|x| x as i16)).collect::<Int16Array>()),
        IntWidth::U32 => Arc::new(iter.map(|v| v.map(|x| x as u32)).collect::<UInt32Array>()),
        IntWidth::I32 => Arc::new(iter.map(|v| v.map(|x| x as i32)).collect::<Int32Array>()),
        IntWidth::I64 => Arc::new(iter.collect::<Int64Array>()),
    }
}

fn min_max<T: PartialOrd + Copy>(mut iter: impl Iterator<Item = T>) -> (Option<T>, Option<T>) {
    let Some(first) = iter.next() else {
        return (None, None);
    };
    let (min, max) = iter.fold((first, first), |(lo, hi), v| {
        (if v < lo { v } else { lo }, if v > hi { v } else { hi })
    });
    (Some(min), Some(max))
}

fn count_nulls<T>(values: &[Option<T>]) -> usize {
    values.iter().filter(|v| v.is_none()).count()
}

/// Why `ChunkBuilder::push` refused a record
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Rejection {
    /// The row is malformed and belongs in quarantine
    Invalid(ValidationError),
    /// Every field is a valid value of its column's type, but some columns'
    /// storage is too narrow to hold them
    Outgrown(Vec<(String, Growth)>),
}

/// Accumulates validated rows until a chunk is full
#[derive(Debug)]
pub(crate) struct ChunkBuilder {
    names: Vec<String>,
    columns: Vec<ColumnSchema>,
    /// Header position of each schema column
    positions: Vec<usize>,
    header_len: usize,
    buffers: Vec<ColumnBuffer>,
    rows: usize,
}

impl ChunkBuilder {
    /// Map schema columns onto header positions
    pub(crate) fn new(
        schema: &TableSchema,
        header: &[String],
        capacity: usize,
    ) -> Result<Self, String> {
        let positions = schema
            .columns
            .iter()
            .map(|c| {
                header.iter().position(|h| h == &c.name).ok_or_else(|| {
                    format!(
                        "column '{}' of schema version {} is missing from the header",
                        c.name, schema.version
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            names: schema.columns.iter().map(|c| c.name.clone()).collect(),
            columns: schema.columns.clone(),
            positions,
            header_len: header.len(),
            buffers: schema
                .columns
                .iter()
                .map(|c| ColumnBuffer::for_column(c, capacity))
                .collect(),
            rows: 0,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.rows
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Validate a record and append it; a rejected record leaves the chunk untouched
    pub(crate) fn push(&mut self, record: &RawRecord) -> Result<(), Rejection> {
        let reject = |column: Option<&str>, reason: QuarantineReason, value: Option<&str>| {
            Rejection::Invalid(ValidationError {
                file: record.provenance.file.to_string(),
                line: record.provenance.line,
                column: column.map(str::to_string),
                reason,
                value: value.map(str::to_string),
            })
        };

        if record.fields.len() != self.header_len {
            return Err(reject(None, QuarantineReason::FieldCount, None));
        }

        let mut cells = Vec::with_capacity(self.columns.len());
        let mut outgrown = Vec::new();
        for (column, &pos) in self.columns.iter().zip(&self.positions) {
            let raw = record.fields[pos].as_str();
            match coerce(raw, column) {
                Ok(cell) => cells.push(cell),
                Err(reason) => match growth(raw, column) {
                    Some(g) => outgrown.push((column.name.clone(), g)),
                    None => return Err(reject(Some(&column.name), reason, Some(raw))),
                },
            }
        }
        if !outgrown.is_empty() {
            return Err(Rejection::Outgrown(outgrown));
        }
        for (buffer, cell) in self.buffers.iter_mut().zip(cells) {
            buffer.push(cell);
        }
        self.rows += 1;
        Ok(())
    }

    /// Statistics of the buffered rows, keyed like the schema columns
    pub(crate) fn stats(&self) -> Result<Vec<(String, ColumnStats)>, st_core::CoreError> {
        self.names
            .iter()
            .zip(&self.buffers)
            .map(|(name, buffer)| Ok((name.clone(), buffer.stats()?)))
            .collect()
    }

    /// Drain the buffered rows into a record batch
    pub(crate) fn take_batch(&mut self, schema: &SchemaRef) -> Result<RecordBatch, ArrowError> {
        let arrays = self
            .buffers
            .iter_mut()
            .map(ColumnBuffer::take_array)
            .collect::<Result<Vec<_>, _>>()?;
        self.rows = 0;
        RecordBatch::try_new(Arc::clone(schema), arrays)
    }
}

#[cfg(test)]
#[path = "chunk_test.rs"]
mod tests;
