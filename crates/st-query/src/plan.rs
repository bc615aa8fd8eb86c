//! Query planning: column resolution, literal typing and partition pruning
//!
//! Columns are typed against the table's active schema. Numeric values of
//! every partition are normalized to the active scale, so a predicate literal
//! is parsed once into the same `i128` representation the scan produces.

use crate::error::{QueryError, QueryResult};
use st_catalog::{ColumnStats, PartitionRecord};
use st_core::value::{date_to_days, parse_date, parse_decimal, pow10, rescale};
use st_core::{
    AggregateFunction, AggregateQuery, CompareOp, Literal, SemanticType, TableName, TableSchema,
    Value,
};
use std::cmp::Ordering;

/// How the query reads a column, fixed by the active schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnKind {
    /// Exact number as a mantissa at `scale`; `integer` when the type is int64
    Numeric { scale: u8, integer: bool },
    Text,
    Date,
}

impl ColumnKind {
    fn of(ty: &SemanticType) -> Self {
        match ty {
            SemanticType::Int64 { .. } => ColumnKind::Numeric {
                scale: 0,
                integer: true,
            },
            SemanticType::Decimal { scale, .. } => ColumnKind::Numeric {
                scale: *scale,
                integer: false,
            },
            SemanticType::Categorical | SemanticType::String => ColumnKind::Text,
            SemanticType::Date => ColumnKind::Date,
        }
    }
}

/// An owned, normalized value: group keys, literals and min/max state
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum Datum {
    Null,
    Num(i128),
    Text(String),
    Date(i32),
}

impl Datum {
    pub(crate) fn borrowed(&self) -> DatumRef<'_> {
        match self {
            Datum::Null => DatumRef::Null,
            Datum::Num(n) => DatumRef::Num(*n),
            Datum::Text(s) => DatumRef::Text(s),
            Datum::Date(d) => DatumRef::Date(*d),
        }
    }

    /// Convert back to a result value for a column of `kind`
    pub(crate) fn to_value(&self, kind: ColumnKind, column: &str) -> QueryResult<Value> {
        Ok(match (self, kind) {
            (Datum::Null, _) => Value::Null,
            (Datum::Num(n), ColumnKind::Numeric { scale, integer }) => {
                numeric_value(*n, scale, integer, column)?
            }
            (Datum::Num(n), _) => numeric_value(*n, 0, true, column)?,
            (Datum::Text(s), _) => Value::Text(s.clone()),
            (Datum::Date(d), _) => st_core::value::days_to_date(*d)
                .map(Value::Date)
                .unwrap_or(Value::Null),
        })
    }
}

/// A value read in place from a batch; ordered and hashed like [`Datum`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum DatumRef<'a> {
    Null,
    Num(i128),
    Text(&'a str),
    Date(i32),
}

impl DatumRef<'_> {
    pub(crate) fn to_datum(self) -> Datum {
        match self {
            DatumRef::Null => Datum::Null,
            DatumRef::Num(n) => Datum::Num(n),
            DatumRef::Text(s) => Datum::Text(s.to_string()),
            DatumRef::Date(d) => Datum::Date(d),
        }
    }
}

/// Integer results stay integers while they fit in i64
pub(crate) fn numeric_value(
    mantissa: i128,
    scale: u8,
    integer: bool,
    column: &str,
) -> QueryResult<Value> {
    if integer && scale == 0 {
        if let Ok(i) = i64::try_from(mantissa) {
            return Ok(Value::Int(i));
        }
    }
    st_core::value::to_decimal(mantissa, scale)
        .map(Value::Decimal)
        .map_err(|_| QueryError::Overflow {
            column: column.to_string(),
        })
}

#[derive(Debug, Clone)]
pub(crate) struct PlannedColumn {
    pub name: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone)]
pub(crate) struct PlannedPredicate {
    /// Index into [`QueryPlan::columns`]
    pub column: usize,
    pub op: CompareOp,
    pub values: Vec<Datum>,
}

impl PlannedPredicate {
    /// Evaluate against one non-null value; null never matches
    pub fn matches(&self, value: DatumRef<'_>) -> bool {
        if matches!(value, DatumRef::Null) {
            return false;
        }
        match self.op {
            CompareOp::In => self.values.iter().any(|v| v.borrowed() == value),
            op => self
                .values
                .first()
                .is_some_and(|lit| compare_holds(op, value.cmp(&lit.borrowed()))),
        }
    }

    /// Whether a partition with these statistics may hold matching rows
    fn may_match(&self, stats: &ColumnStats, kind: ColumnKind) -> bool {
        if stats.all_null() {
            return false;
        }
        let (Some(min), Some(max)) = (stat_datum(&stats.min, kind), stat_datum(&stats.max, kind))
        else {
            return true;
        };
        let in_range = |v: &Datum| min <= *v && *v <= max;
        match self.op {
            CompareOp::In => self.values.iter().any(in_range),
            op => {
                let Some(lit) = self.values.first() else {
                    return true;
                };
                match op {
                    CompareOp::Eq => in_range(lit),
                    CompareOp::Ne => !(min == *lit && max == *lit),
                    CompareOp::Lt => min < *lit,
                    CompareOp::Le => min <= *lit,
                    CompareOp::Gt => max > *lit,
                    CompareOp::Ge => max >= *lit,
                    CompareOp::In => true,
                }
            }
        }
    }
}

fn compare_holds(op: CompareOp, ord: Ordering) -> bool {
    match op {
        CompareOp::Eq | CompareOp::In => ord.is_eq(),
        CompareOp::Ne => ord.is_ne(),
        CompareOp::Lt => ord.is_lt(),
        CompareOp::Le => ord.is_le(),
        CompareOp::Gt => ord.is_gt(),
        CompareOp::Ge => ord.is_ge(),
    }
}

/// Statistics value in the normalized representation, if convertible
fn stat_datum(value: &Value, kind: ColumnKind) -> Option<Datum> {
    match (value, kind) {
        (Value::Int(i), ColumnKind::Numeric { scale, .. }) => {
            (*i as i128).checked_mul(pow10(scale)?).map(Datum::Num)
        }
        (Value::Decimal(d), ColumnKind::Numeric { scale, .. }) => {
            let from = u8::try_from(d.scale()).ok()?;
            rescale(d.mantissa(), from, scale).map(Datum::Num)
        }
        (Value::Text(s), ColumnKind::Text) => Some(Datum::Text(s.clone())),
        (Value::Date(d), ColumnKind::Date) => Some(Datum::Date(date_to_days(*d))),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PlannedAggregate {
    pub function: AggregateFunction,
    /// Index into [`QueryPlan::columns`]; `None` for count(*)
    pub column: Option<usize>,
    pub name: String,
}

/// A query resolved against one schema version
#[derive(Debug, Clone)]
pub(crate) struct QueryPlan {
    pub table: TableName,
    /// Every column the scan reads, each once
    pub columns: Vec<PlannedColumn>,
    pub predicates: Vec<PlannedPredicate>,
    pub group_by: Vec<usize>,
    pub aggregates: Vec<PlannedAggregate>,
    /// Output column index and descending flag
    pub order_by: Vec<(usize, bool)>,
    pub limit: Option<usize>,
    pub output_columns: Vec<String>,
}

impl QueryPlan {
    /// Resolve and type a query against the active schema of its table
    pub fn build(query: &AggregateQuery, schema: &TableSchema) -> QueryResult<Self> {
        query.validate()?;
        let mut columns: Vec<PlannedColumn> = Vec::new();
        let mut resolve = |name: &str| -> QueryResult<usize> {
            if let Some(idx) = columns.iter().position(|c| c.name == name) {
                return Ok(idx);
            }
            let column = schema
                .column(name)
                .ok_or_else(|| QueryError::UnknownColumn {
                    table: schema.table.to_string(),
                    column: name.to_string(),
                })?;
            columns.push(PlannedColumn {
                name: column.name.clone(),
                kind: ColumnKind::of(&column.ty),
            });
            Ok(columns.len() - 1)
        };

        let mut predicates = Vec::with_capacity(query.filters.len());
        for pred in &query.filters {
            let idx = resolve(&pred.column)?;
            predicates.push((idx, pred));
        }
        let group_by = query
            .group_by
            .iter()
            .map(|g| resolve(g))
            .collect::<QueryResult<Vec<_>>>()?;
        let mut aggregates = Vec::with_capacity(query.aggregates.len());
        for agg in &query.aggregates {
            let column = agg.column.as_deref().map(&mut resolve).transpose()?;
            aggregates.push((agg, column));
        }

        let predicates = predicates
            .into_iter()
            .map(|(idx, pred)| {
                let column = &columns[idx];
                let values = pred
                    .value
                    .literals()
                    .into_iter()
                    .map(|lit| type_literal(lit, column))
                    .collect::<QueryResult<Vec<_>>>()?;
                Ok(PlannedPredicate {
                    column: idx,
                    op: pred.op,
                    values,
                })
            })
            .collect::<QueryResult<Vec<_>>>()?;

        let aggregates = aggregates
            .into_iter()
            .map(|(agg, column)| {
                if let (Some(idx), AggregateFunction::Sum | AggregateFunction::Avg) =
                    (column, agg.function)
                {
                    if !matches!(columns[idx].kind, ColumnKind::Numeric { .. }) {
                        let ty = schema
                            .column(&columns[idx].name)
                            .map(|c| c.ty.to_string())
                            .unwrap_or_default();
                        return Err(QueryError::InvalidAggregate {
                            function: agg.function.to_string(),
                            column: columns[idx].name.clone(),
                            ty,
                        });
                    }
                }
                Ok(PlannedAggregate {
                    function: agg.function,
                    column,
                    name: agg.output_name(),
                })
            })
            .collect::<QueryResult<Vec<_>>>()?;

        let output_columns = query.output_columns();
        let order_by = query
            .order_by
            .iter()
            .filter_map(|o| {
                output_columns
                    .iter()
                    .position(|c| *c == o.column)
                    .map(|idx| (idx, o.descending))
            })
            .collect();

        Ok(Self {
            table: query.table.clone(),
            columns,
            predicates,
            group_by,
            aggregates,
            order_by,
            limit: query.limit,
            output_columns,
        })
    }

    /// Whether a partition can be skipped without reading it.
    ///
    /// `present` tells whether the partition's schema has a column; a missing
    /// column reads as all nulls, which no predicate matches.
    pub fn prunes(&self, record: &PartitionRecord, present: impl Fn(&str) -> bool) -> bool {
        if record.row_count == 0 {
            return true;
        }
        self.predicates.iter().any(|pred| {
            let column = &self.columns[pred.column];
            if !present(&column.name) {
                return true;
            }
            match record.stats.get(&column.name) {
                Some(stats) => !pred.may_match(stats, column.kind),
                None => false,
            }
        })
    }
}

fn type_literal(literal: &Literal, column: &PlannedColumn) -> QueryResult<Datum> {
    let invalid = |message: String| QueryError::InvalidLiteral {
        column: column.name.clone(),
        literal: literal.as_str().to_string(),
        message,
    };
    if literal.parameter_name().is_some() {
        return Err(invalid("unbound parameter".to_string()));
    }
    match column.kind {
        ColumnKind::Numeric { scale, .. } => {
            let fixed = parse_decimal(literal.as_str()).map_err(|e| invalid(e.to_string()))?;
            fixed
                .at_scale(scale)
                .map(Datum::Num)
                .ok_or_else(|| invalid(format!("more than {scale} decimal places")))
        }
        ColumnKind::Text => Ok(Datum::Text(literal.as_str().to_string())),
        ColumnKind::Date => parse_date(literal.as_str())
            .map(|d| Datum::Date(date_to_days(d)))
            .ok_or_else(|| invalid("expected YYYY-MM-DD".to_string())),
    }
}

#[cfg(test)]
#[path = "plan_test.rs"]
mod tests;
