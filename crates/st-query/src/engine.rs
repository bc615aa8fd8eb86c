//! Query execution over a pinned catalog view
//!
//! Planning happens eagerly in [`QueryEngine::execute`], so unknown columns or
//! bad literals fail before any file is opened. The scan itself runs when the
//! returned [`ResultStream`] is first polled; the stream owns the pinned view
//! until then, so no partition it reads can be removed underneath it.

use crate::aggregate::GroupTable;
use crate::error::{QueryError, QueryResult};
use crate::plan::{DatumRef, QueryPlan};
use crate::result::{CancelToken, ResultRow, ResultTable};
use crate::scan::{ColumnValues, RowFilter};
use arrow::record_batch::RecordBatch;
use st_catalog::{CatalogError, PartitionBatches, PartitionCatalog, PartitionId, PinnedView};
use st_core::{AggregateFunction, AggregateQuery, QueryConfig};
use std::collections::HashMap;

/// Executes aggregate queries against the partition catalog
#[derive(Debug, Clone)]
pub struct QueryEngine {
    catalog: PartitionCatalog,
    max_groups: usize,
}

impl QueryEngine {
    pub fn new(catalog: PartitionCatalog, config: &QueryConfig) -> Self {
        Self {
            catalog,
            max_groups: config.max_groups,
        }
    }

    pub fn catalog(&self) -> &PartitionCatalog {
        &self.catalog
    }

    /// Plan a query against the current catalog state
    pub fn execute(&self, query: &AggregateQuery) -> QueryResult<ResultStream> {
        self.execute_with_cancel(query, CancelToken::new())
    }

    /// Like [`execute`](Self::execute), stoppable through `cancel`
    pub fn execute_with_cancel(
        &self,
        query: &AggregateQuery,
        cancel: CancelToken,
    ) -> QueryResult<ResultStream> {
        let view = self.catalog.pin(std::slice::from_ref(&query.table))?;
        self.execute_pinned(view, query, cancel)
    }

    /// Plan a query against a view the caller already pinned
    pub fn execute_pinned(
        &self,
        view: PinnedView,
        query: &AggregateQuery,
        cancel: CancelToken,
    ) -> QueryResult<ResultStream> {
        let schema = view
            .active_schema(&query.table)
            .ok_or_else(|| QueryError::UnknownTable {
                table: query.table.to_string(),
            })?;
        let plan = QueryPlan::build(query, schema)?;
        Ok(ResultStream {
            columns: plan.output_columns.clone(),
            state: StreamState::Pending(Box::new(Scan {
                view,
                plan,
                cancel,
                max_groups: self.max_groups,
            })),
        })
    }

    /// Execute and collect every row
    pub fn query(&self, query: &AggregateQuery) -> QueryResult<ResultTable> {
        self.execute(query)?.try_collect()
    }
}

/// Lazily evaluated query result
pub struct ResultStream {
    columns: Vec<String>,
    state: StreamState,
}

enum StreamState {
    Pending(Box<Scan>),
    Rows(std::vec::IntoIter<ResultRow>),
    Done,
}

impl ResultStream {
    /// Output column names: group-by columns, then aggregates
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Drain the stream into a [`ResultTable`]
    pub fn try_collect(self) -> QueryResult<ResultTable> {
        let columns = self.columns.clone();
        let rows = self.collect::<QueryResult<Vec<_>>>()?;
        Ok(ResultTable { columns, rows })
    }
}

impl Iterator for ResultStream {
    type Item = QueryResult<ResultRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match std::mem::replace(&mut self.state, StreamState::Done) {
                StreamState::Pending(scan) => match scan.run() {
                    Ok(rows) => self.state = StreamState::Rows(rows.into_iter()),
                    Err(e) => return Some(Err(e)),
                },
                StreamState::Rows(mut rows) => {
                    let next = rows.next();
                    if next.is_some() {
                        self.state = StreamState::Rows(rows);
                    }
                    return next.map(Ok);
                }
                StreamState::Done => return None,
            }
        }
    }
}

struct Scan {
    view: PinnedView,
    plan: QueryPlan,
    cancel: CancelToken,
    max_groups: usize,
}

impl Scan {
    fn run(self) -> QueryResult<Vec<ResultRow>> {
        let mut groups = GroupTable::new(&self.plan, self.max_groups);
        let partitions = self.view.partitions(&self.plan.table);
        let mut scanned = 0usize;

        for record in &partitions {
            self.check_cancelled()?;
            let schema = self
                .view
                .schema_at(&record.table, record.schema_version)
                .ok_or_else(|| CatalogError::UnknownSchema {
                    table: record.table.to_string(),
                    version: record.schema_version,
                })?;
            if self.plan.prunes(record, |c| schema.column(c).is_some()) {
                continue;
            }
            scanned += 1;

            let mut projection: Vec<usize> = self
                .plan
                .columns
                .iter()
                .filter_map(|c| schema.index_of(&c.name))
                .collect();
            projection.sort_unstable();
            projection.dedup();
            if projection.is_empty() {
                // nothing to read: every referenced column is absent here
                self.fold_absent(record.row_count, &mut groups)?;
                continue;
            }

            let path = self.view.path_of(record);
            for batch in PartitionBatches::open(&path, Some(projection))? {
                self.check_cancelled()?;
                self.fold_batch(&batch?, record.id, &mut groups)?;
            }
        }

        log::debug!(
            "Query on '{}' scanned {} of {} partitions into {} groups",
            self.plan.table,
            scanned,
            partitions.len(),
            groups.len()
        );
        groups.finish(&self.plan)
    }

    fn check_cancelled(&self) -> QueryResult<()> {
        if self.cancel.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        Ok(())
    }

    fn fold_batch(
        &self,
        batch: &RecordBatch,
        partition: PartitionId,
        groups: &mut GroupTable,
    ) -> QueryResult<()> {
        let columns = self
            .plan
            .columns
            .iter()
            .map(|c| ColumnValues::from_batch(batch, c, partition))
            .collect::<QueryResult<Vec<_>>>()?;

        let filters: Vec<RowFilter<'_, '_>> = self
            .plan
            .predicates
            .iter()
            .map(|pred| RowFilter::new(pred, &columns[pred.column]))
            .collect();
        // Group keys borrow from the batch; each distinct key is copied into
        // the group table once
        let mut slots: HashMap<Vec<DatumRef<'_>>, usize> = HashMap::new();
        let mut key: Vec<DatumRef<'_>> = Vec::with_capacity(self.plan.group_by.len());

        for row in 0..batch.num_rows() {
            if !filters.iter().all(|f| f.matches(row)) {
                continue;
            }
            key.clear();
            key.extend(self.plan.group_by.iter().map(|idx| columns[*idx].get(row)));
            let slot = match slots.get(key.as_slice()) {
                Some(&slot) => slot,
                None => {
                    let slot = groups.slot(&key)?;
                    slots.insert(key.clone(), slot);
                    slot
                }
            };
            let accumulators = groups.accumulators(slot);
            for (acc, agg) in accumulators.iter_mut().zip(&self.plan.aggregates) {
                match (agg.column, agg.function) {
                    (None, _) => acc.add_rows(1),
                    (Some(idx), AggregateFunction::Count) => {
                        if !columns[idx].is_null(row) {
                            acc.add_rows(1);
                        }
                    }
                    (Some(idx), _) => acc.update(columns[idx].get(row), &agg.name)?,
                }
            }
        }
        Ok(())
    }

    /// Rows of a partition whose referenced columns are all absent (or, for a
    /// pure count(*), rows that need no column at all)
    fn fold_absent(&self, rows: u64, groups: &mut GroupTable) -> QueryResult<()> {
        if rows == 0 {
            return Ok(());
        }
        let key = vec![DatumRef::Null; self.plan.group_by.len()];
        let slot = groups.slot(&key)?;
        for (acc, agg) in groups.accumulators(slot).iter_mut().zip(&self.plan.aggregates) {
            if agg.column.is_none() {
                acc.add_rows(rows);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;
