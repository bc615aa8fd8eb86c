//! Grouped accumulators with exact fixed-point arithmetic
//!
//! Sums and averages accumulate `i128` mantissas at the column's active scale
//! and only become [`rust_decimal::Decimal`] when a row is emitted. Any
//! overflow is reported, never wrapped.

use crate::error::{QueryError, QueryResult};
use crate::plan::{numeric_value, ColumnKind, Datum, DatumRef, QueryPlan};
use crate::result::ResultRow;
use rust_decimal::Decimal;
use st_core::value::to_decimal;
use st_core::{AggregateFunction, Value};
use std::collections::HashMap;

/// Running state of one aggregate within one group
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Accumulator {
    Count(u64),
    Sum { total: i128, seen: bool },
    Avg { total: i128, count: u64 },
    /// `Datum::Null` until the first non-null value
    Min(Datum),
    Max(Datum),
}

impl Accumulator {
    pub fn new(function: AggregateFunction) -> Self {
        match function {
            AggregateFunction::Count => Accumulator::Count(0),
            AggregateFunction::Sum => Accumulator::Sum {
                total: 0,
                seen: false,
            },
            AggregateFunction::Avg => Accumulator::Avg { total: 0, count: 0 },
            AggregateFunction::Min => Accumulator::Min(Datum::Null),
            AggregateFunction::Max => Accumulator::Max(Datum::Null),
        }
    }

    /// Add whole rows to a count(*) without reading any column
    pub fn add_rows(&mut self, rows: u64) {
        if let Accumulator::Count(n) = self {
            *n += rows;
        }
    }

    /// Fold one value in; nulls are ignored by every aggregate
    pub fn update(&mut self, value: DatumRef<'_>, column: &str) -> QueryResult<()> {
        if matches!(value, DatumRef::Null) {
            return Ok(());
        }
        match self {
            Accumulator::Count(n) => *n += 1,
            Accumulator::Sum { total, seen } => {
                if let DatumRef::Num(v) = value {
                    *total = total.checked_add(v).ok_or_else(|| overflow(column))?;
                    *seen = true;
                }
            }
            Accumulator::Avg { total, count } => {
                if let DatumRef::Num(v) = value {
                    *total = total.checked_add(v).ok_or_else(|| overflow(column))?;
                    *count += 1;
                }
            }
            Accumulator::Min(current) => {
                if matches!(current, Datum::Null) || value < current.borrowed() {
                    *current = value.to_datum();
                }
            }
            Accumulator::Max(current) => {
                if matches!(current, Datum::Null) || value > current.borrowed() {
                    *current = value.to_datum();
                }
            }
        }
        Ok(())
    }

    /// Final value; `kind` is the aggregated column's kind (`None` for count(*))
    pub fn finish(&self, kind: Option<ColumnKind>, column: &str) -> QueryResult<Value> {
        let (scale, integer) = match kind {
            Some(ColumnKind::Numeric { scale, integer }) => (scale, integer),
            _ => (0, true),
        };
        match self {
            Accumulator::Count(n) => Ok(Value::Int(
                i64::try_from(*n).map_err(|_| overflow(column))?,
            )),
            Accumulator::Sum { seen: false, .. } => Ok(Value::Null),
            Accumulator::Sum { total, .. } => numeric_value(*total, scale, integer, column),
            Accumulator::Avg { count: 0, .. } => Ok(Value::Null),
            Accumulator::Avg { total, count } => {
                let sum = to_decimal(*total, scale).map_err(|_| overflow(column))?;
                sum.checked_div(Decimal::from(*count))
                    .map(Value::Decimal)
                    .ok_or_else(|| overflow(column))
            }
            Accumulator::Min(d) | Accumulator::Max(d) => match kind {
                Some(kind) => d.to_value(kind, column),
                None => Ok(Value::Null),
            },
        }
    }
}

fn overflow(column: &str) -> QueryError {
    QueryError::Overflow {
        column: column.to_string(),
    }
}

/// Accumulators keyed by group-by tuple, bounded by `max_groups`
#[derive(Debug)]
pub(crate) struct GroupTable {
    /// Slot of each group in `groups`
    slots: HashMap<Vec<Datum>, usize>,
    groups: Vec<(Vec<Datum>, Vec<Accumulator>)>,
    functions: Vec<AggregateFunction>,
    max_groups: usize,
}

impl GroupTable {
    /// A group-less plan starts with its single (empty-key) group so that it
    /// always yields one row, even over no input
    pub fn new(plan: &QueryPlan, max_groups: usize) -> Self {
        let functions: Vec<AggregateFunction> =
            plan.aggregates.iter().map(|a| a.function).collect();
        let mut table = Self {
            slots: HashMap::new(),
            groups: Vec::new(),
            functions,
            max_groups,
        };
        if plan.group_by.is_empty() {
            table.insert(Vec::new());
        }
        table
    }

    fn insert(&mut self, key: Vec<Datum>) -> usize {
        let slot = self.groups.len();
        let accumulators = self.functions.iter().copied().map(Accumulator::new).collect();
        self.slots.insert(key.clone(), slot);
        self.groups.push((key, accumulators));
        slot
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Slot of the group for `key`, creating the group if the key is new
    pub fn slot(&mut self, key: &[DatumRef<'_>]) -> QueryResult<usize> {
        let owned: Vec<Datum> = key.iter().map(|d| d.to_datum()).collect();
        if let Some(&slot) = self.slots.get(&owned) {
            return Ok(slot);
        }
        if self.groups.len() >= self.max_groups {
            return Err(QueryError::GroupLimitExceeded {
                limit: self.max_groups,
            });
        }
        Ok(self.insert(owned))
    }

    pub fn accumulators(&mut self, slot: usize) -> &mut [Accumulator] {
        &mut self.groups[slot].1
    }

    /// Emit one row per group: group-by values, then aggregates.
    ///
    /// Rows follow the plan's order_by; without one they are sorted by group
    /// key. `limit` is applied last.
    pub fn finish(self, plan: &QueryPlan) -> QueryResult<Vec<ResultRow>> {
        let mut groups = self.groups;
        groups.sort_by(|a, b| a.0.cmp(&b.0));

        let mut rows = Vec::with_capacity(groups.len());
        for (key, accumulators) in groups {
            let mut values = Vec::with_capacity(plan.output_columns.len());
            for (datum, idx) in key.iter().zip(&plan.group_by) {
                let column = &plan.columns[*idx];
                values.push(datum.to_value(column.kind, &column.name)?);
            }
            for (acc, agg) in accumulators.iter().zip(&plan.aggregates) {
                let kind = agg.column.map(|idx| plan.columns[idx].kind);
                values.push(acc.finish(kind, &agg.name)?);
            }
            rows.push(ResultRow::new(values));
        }

        if !plan.order_by.is_empty() {
            rows.sort_by(|a, b| {
                plan.order_by
                    .iter()
                    .map(|(idx, descending)| {
                        let ord = a.values()[*idx].sort_cmp(&b.values()[*idx]);
                        if *descending {
                            ord.reverse()
                        } else {
                            ord
                        }
                    })
                    .find(|o| o.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        if let Some(limit) = plan.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}
