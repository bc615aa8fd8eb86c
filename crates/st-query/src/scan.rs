//! Reading partition batches in the active schema's representation
//!
//! A partition written under an older schema version may store a column at a
//! narrower integer width, a smaller decimal scale or as plain text instead of
//! a dictionary. Each batch column is normalized here so the rest of the
//! engine only sees active-schema values.

use crate::error::{QueryError, QueryResult};
use crate::plan::{ColumnKind, DatumRef, PlannedColumn, PlannedPredicate};
use arrow::array::{Array, ArrayRef, AsArray, Date32Array, DictionaryArray, StringArray};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Date32Type, Decimal128Type, Int16Type, Int32Type, Int64Type,
    Int8Type, UInt16Type, UInt32Type, UInt8Type,
};
use arrow::record_batch::RecordBatch;
use st_catalog::PartitionId;
use st_core::value::{pow10, rescale};

/// One column of one batch, ready for row access
pub(crate) enum ColumnValues<'a> {
    /// Mantissas at the active scale
    Numeric(Vec<Option<i128>>),
    Plain(&'a StringArray),
    Dictionary {
        keys: &'a DictionaryArray<Int32Type>,
        values: &'a StringArray,
    },
    Date(&'a Date32Array),
    /// Column absent from the partition's schema version
    Missing,
}

impl<'a> ColumnValues<'a> {
    /// Normalize the batch column named by `column`
    pub fn from_batch(
        batch: &'a RecordBatch,
        column: &PlannedColumn,
        partition: PartitionId,
    ) -> QueryResult<Self> {
        let Some(array) = batch.column_by_name(&column.name) else {
            return Ok(ColumnValues::Missing);
        };
        let incompatible = || QueryError::IncompatibleColumn {
            partition: partition.0,
            column: column.name.clone(),
            found: array.data_type().to_string(),
        };
        match column.kind {
            ColumnKind::Numeric { scale, .. } => numeric(array, scale, &column.name)?
                .map(ColumnValues::Numeric)
                .ok_or_else(incompatible),
            ColumnKind::Text => match array.data_type() {
                DataType::Utf8 => array
                    .as_string_opt::<i32>()
                    .map(ColumnValues::Plain)
                    .ok_or_else(incompatible),
                DataType::Dictionary(_, _) => {
                    let keys = array
                        .as_dictionary_opt::<Int32Type>()
                        .ok_or_else(incompatible)?;
                    let values = keys
                        .values()
                        .as_string_opt::<i32>()
                        .ok_or_else(incompatible)?;
                    Ok(ColumnValues::Dictionary { keys, values })
                }
                _ => Err(incompatible()),
            },
            ColumnKind::Date => array
                .as_primitive_opt::<Date32Type>()
                .map(ColumnValues::Date)
                .ok_or_else(incompatible),
        }
    }

    /// Value at `row`, borrowed from the batch
    pub fn get(&self, row: usize) -> DatumRef<'_> {
        match self {
            ColumnValues::Numeric(values) => values[row].map_or(DatumRef::Null, DatumRef::Num),
            ColumnValues::Plain(array) => {
                if array.is_null(row) {
                    DatumRef::Null
                } else {
                    DatumRef::Text(array.value(row))
                }
            }
            ColumnValues::Dictionary { keys, values } => match keys.key(row) {
                Some(k) if values.is_valid(k) => DatumRef::Text(values.value(k)),
                _ => DatumRef::Null,
            },
            ColumnValues::Date(array) => {
                if array.is_null(row) {
                    DatumRef::Null
                } else {
                    DatumRef::Date(array.value(row))
                }
            }
            ColumnValues::Missing => DatumRef::Null,
        }
    }

    /// Whether the value at `row` is null, without building a datum
    pub fn is_null(&self, row: usize) -> bool {
        match self {
            ColumnValues::Numeric(values) => values[row].is_none(),
            ColumnValues::Plain(array) => array.is_null(row),
            ColumnValues::Dictionary { keys, .. } => keys.is_null(row),
            ColumnValues::Date(array) => array.is_null(row),
            ColumnValues::Missing => true,
        }
    }
}

/// A predicate bound to one batch column
///
/// On a dictionary column the predicate is evaluated once per dictionary
/// entry and rows are tested by key.
pub(crate) struct RowFilter<'c, 'a> {
    predicate: &'c PlannedPredicate,
    values: &'c ColumnValues<'a>,
    by_key: Option<Vec<bool>>,
}

impl<'c, 'a> RowFilter<'c, 'a> {
    pub fn new(predicate: &'c PlannedPredicate, values: &'c ColumnValues<'a>) -> Self {
        let by_key = match values {
            ColumnValues::Dictionary { values: entries, .. } => Some(
                (0..entries.len())
                    .map(|k| {
                        entries.is_valid(k) && predicate.matches(DatumRef::Text(entries.value(k)))
                    })
                    .collect(),
            ),
            _ => None,
        };
        Self {
            predicate,
            values,
            by_key,
        }
    }

    pub fn matches(&self, row: usize) -> bool {
        match (&self.by_key, self.values) {
            (Some(hits), ColumnValues::Dictionary { keys, .. }) => keys
                .key(row)
                .is_some_and(|k| hits.get(k).copied().unwrap_or(false)),
            _ => self.predicate.matches(self.values.get(row)),
        }
    }
}

/// Read any stored integer or decimal array as mantissas at `scale`.
///
/// `Ok(None)` when the array is not numeric at all.
fn numeric(array: &ArrayRef, scale: u8, column: &str) -> QueryResult<Option<Vec<Option<i128>>>> {
    match array.data_type() {
        DataType::Int8 => widen::<Int8Type>(array, scale, column),
        DataType::Int16 => widen::<Int16Type>(array, scale, column),
        DataType::Int32 => widen::<Int32Type>(array, scale, column),
        DataType::Int64 => widen::<Int64Type>(array, scale, column),
        DataType::UInt8 => widen::<UInt8Type>(array, scale, column),
        DataType::UInt16 => widen::<UInt16Type>(array, scale, column),
        DataType::UInt32 => widen::<UInt32Type>(array, scale, column),
        DataType::Decimal128(_, stored) => {
            let from = u8::try_from(*stored).map_err(|_| overflow(column))?;
            let Some(array) = array.as_primitive_opt::<Decimal128Type>() else {
                return Ok(None);
            };
            array
                .iter()
                .map(|v| {
                    v.map(|m| rescale(m, from, scale).ok_or_else(|| overflow(column)))
                        .transpose()
                })
                .collect::<QueryResult<Vec<_>>>()
                .map(Some)
        }
        _ => Ok(None),
    }
}

fn widen<T>(array: &ArrayRef, scale: u8, column: &str) -> QueryResult<Option<Vec<Option<i128>>>>
where
    T: ArrowPrimitiveType,
    T::Native: Into<i64>,
{
    let factor = pow10(scale).ok_or_else(|| overflow(column))?;
    let Some(array) = array.as_primitive_opt::<T>() else {
        return Ok(None);
    };
    array
        .iter()
        .map(|v| {
            v.map(|n| {
                let n: i64 = n.into();
                (n as i128).checked_mul(factor).ok_or_else(|| overflow(column))
            })
            .transpose()
        })
        .collect::<QueryResult<Vec<_>>>()
        .map(Some)
}

fn overflow(column: &str) -> QueryError {
    QueryError::Overflow {
        column: column.to_string(),
    }
}
