//! Evaluation seam between the cache and the query engine

use crate::error::{CacheResult, KpiError};
use st_catalog::PinnedView;
use st_core::AggregateQuery;
use st_query::{CancelToken, QueryEngine, ResultTable};

/// Runs a bound KPI query against a pinned view.
///
/// The cache computes on a blocking thread, so implementations may do
/// synchronous I/O.
pub trait KpiEvaluator: Send + Sync {
    fn evaluate(&self, view: PinnedView, query: &AggregateQuery) -> CacheResult<ResultTable>;
}

impl KpiEvaluator for QueryEngine {
    fn evaluate(&self, view: PinnedView, query: &AggregateQuery) -> CacheResult<ResultTable> {
        self.execute_pinned(view, query, CancelToken::new())
            .and_then(|stream| stream.try_collect())
            .map_err(|e| KpiError::ComputationFailure {
                kpi: query.table.to_string(),
                message: e.to_string(),
            })
    }
}
