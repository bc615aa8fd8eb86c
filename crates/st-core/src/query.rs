//! The constrained aggregate-query contract.
//!
//! A query names one table, a conjunction of column comparisons, optional
//! group-by columns and one or more aggregates. Literals stay textual here;
//! the query engine types them against the table schema at plan time.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, CoreResult};
use crate::names::TableName;
use crate::serde_helpers::scalar_as_string;

/// Comparison operator of a filter predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::In => "IN",
        };
        f.write_str(s)
    }
}

/// Right-hand side of a predicate: one literal or a list for `in`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Many(Vec<Literal>),
    One(Literal),
}

/// A textual literal; YAML numbers and booleans are accepted as text
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Literal(pub String);

impl<'de> Deserialize<'de> for Literal {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        scalar_as_string(deserializer).map(Literal)
    }
}

impl Literal {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `$name` placeholders are bound from KPI parameters
    pub fn parameter_name(&self) -> Option<&str> {
        self.0.strip_prefix('$').filter(|n| !n.is_empty())
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal(s.to_string())
    }
}

impl Operand {
    /// Literals in evaluation order
    pub fn literals(&self) -> Vec<&Literal> {
        match self {
            Operand::One(l) => vec![l],
            Operand::Many(ls) => ls.iter().collect(),
        }
    }
}

/// `column <op> value`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub op: CompareOp,
    pub value: Operand,
}

impl Predicate {
    pub fn new(column: impl Into<String>, op: CompareOp, value: impl Into<Literal>) -> Self {
        Self {
            column: column.into(),
            op,
            value: Operand::One(value.into()),
        }
    }

    pub fn one_of(column: impl Into<String>, values: &[&str]) -> Self {
        Self {
            column: column.into(),
            op: CompareOp::In,
            value: Operand::Many(values.iter().map(|v| Literal::from(*v)).collect()),
        }
    }
}

/// Aggregate function over a column (or over rows for `count`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        };
        f.write_str(s)
    }
}

/// One aggregate output column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub function: AggregateFunction,
    /// `None` only for `count`, meaning count(*)
    #[serde(default)]
    pub column: Option<String>,
    /// Output name; defaults to `function_column`
    #[serde(default)]
    pub alias: Option<String>,
}

impl AggregateSpec {
    /// count(*)
    pub fn count_rows() -> Self {
        Self {
            function: AggregateFunction::Count,
            column: None,
            alias: None,
        }
    }

    pub fn new(function: AggregateFunction, column: impl Into<String>) -> Self {
        Self {
            function,
            column: Some(column.into()),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Name of the output column
    pub fn output_name(&self) -> String {
        match (&self.alias, &self.column) {
            (Some(alias), _) => alias.clone(),
            (None, Some(col)) => format!("{}_{}", self.function, col),
            (None, None) => format!("{}_rows", self.function),
        }
    }
}

/// Sort key over an output column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

/// A constrained aggregate query over one table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateQuery {
    pub table: TableName,
    #[serde(default)]
    pub filters: Vec<Predicate>,
    #[serde(default)]
    pub group_by: Vec<String>,
    pub aggregates: Vec<AggregateSpec>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl AggregateQuery {
    /// Query with no filters, groups or ordering
    pub fn new(table: TableName, aggregates: Vec<AggregateSpec>) -> Self {
        Self {
            table,
            filters: Vec::new(),
            group_by: Vec::new(),
            aggregates,
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// `SELECT count(*) FROM table`
    pub fn count_rows(table: TableName) -> Self {
        Self::new(table, vec![AggregateSpec::count_rows()])
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    pub fn group(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    pub fn order(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            descending,
        });
        self
    }

    /// Names of the result columns: group-by columns then aggregates
    pub fn output_columns(&self) -> Vec<String> {
        self.group_by
            .iter()
            .cloned()
            .chain(self.aggregates.iter().map(AggregateSpec::output_name))
            .collect()
    }

    /// Check the query shape independent of any schema
    pub fn validate(&self) -> CoreResult<()> {
        if self.aggregates.is_empty() {
            return Err(invalid("at least one aggregate is required"));
        }
        for agg in &self.aggregates {
            if agg.column.is_none() && agg.function != AggregateFunction::Count {
                return Err(invalid(format!("{} requires a column", agg.function)));
            }
        }
        for pred in &self.filters {
            match (&pred.op, &pred.value) {
                (CompareOp::In, Operand::Many(values)) if values.is_empty() => {
                    return Err(invalid(format!("empty IN list on '{}'", pred.column)));
                }
                (CompareOp::In, _) | (_, Operand::One(_)) => {}
                (op, Operand::Many(_)) => {
                    return Err(invalid(format!(
                        "operator {op} on '{}' takes a single value",
                        pred.column
                    )));
                }
            }
        }
        let outputs = self.output_columns();
        for (i, name) in outputs.iter().enumerate() {
            if outputs[..i].contains(name) {
                return Err(invalid(format!("duplicate output column '{name}'")));
            }
        }
        for order in &self.order_by {
            if !outputs.contains(&order.column) {
                return Err(invalid(format!(
                    "order_by column '{}' is not an output column",
                    order.column
                )));
            }
        }
        Ok(())
    }

    /// Parameter names referenced by `$name` literals
    pub fn parameter_names(&self) -> Vec<&str> {
        self.filters
            .iter()
            .flat_map(|p| p.value.literals())
            .filter_map(Literal::parameter_name)
            .collect()
    }
}

fn invalid(message: impl Into<String>) -> CoreError {
    CoreError::InvalidQuery {
        message: message.into(),
    }
}

#[cfg(test)]
#[path = "query_test.rs"]
mod tests;
