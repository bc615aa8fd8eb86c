use super::*;
use rust_decimal::Decimal;
use st_catalog::{CommitRequest, PartitionRecord, StorageLayout};
use st_core::{
    AggregateSpec, BatchId, CatalogConfig, ColumnSchema, CompareOp, IntWidth, Predicate,
    SemanticType, TableName, TableSchema, Value, WideningPolicy,
};
use st_ingest::{IngestionPipeline, PipelineOptions, PipelineResult, Provenance, RawRecord};
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    catalog: PartitionCatalog,
    engine: QueryEngine,
}

fn fixture() -> Fixture {
    fixture_with_groups(1_000)
}

fn fixture_with_groups(max_groups: usize) -> Fixture {
    let dir = TempDir::new().unwrap();
    let catalog =
        PartitionCatalog::open(StorageLayout::new(dir.path()), &CatalogConfig::default()).unwrap();
    let engine = QueryEngine::new(catalog.clone(), &QueryConfig { max_groups });
    Fixture {
        _dir: dir,
        catalog,
        engine,
    }
}

fn sales_v1() -> TableSchema {
    TableSchema::new(
        TableName::new("sales"),
        1,
        vec![
            ColumnSchema::new(
                "qty",
                SemanticType::Int64 {
                    width: IntWidth::U8,
                },
                false,
            ),
            ColumnSchema::new("region", SemanticType::Categorical, false),
            ColumnSchema::new(
                "amount",
                SemanticType::Decimal {
                    precision: 8,
                    scale: 3,
                },
                true,
            ),
        ],
    )
}

impl Fixture {
    /// Stage and commit rows as one batch, replacing that batch if live
    fn load(&self, schema: &TableSchema, batch: &str, rows: &[Vec<&str>]) -> Vec<PartitionRecord> {
        let pipeline = IngestionPipeline::new(
            self.catalog.layout().clone(),
            PipelineOptions {
                chunk_rows: 4,
                max_partition_rows: 100_000,
                quarantine_threshold: 0,
                widening: WideningPolicy::default(),
            },
        );
        let header: Vec<String> = schema.columns.iter().map(|c| c.name.clone()).collect();
        let file: Arc<str> = Arc::from(format!("{batch}.csv").as_str());
        let records: Vec<PipelineResult<RawRecord>> = rows
            .iter()
            .enumerate()
            .map(|(i, fields)| {
                Ok(RawRecord {
                    fields: fields.iter().map(|f| f.to_string()).collect(),
                    provenance: Provenance {
                        file: Arc::clone(&file),
                        line: i as u64 + 2,
                    },
                })
            })
            .collect();
        let batch_id = BatchId::new(batch);
        let result = pipeline
            .ingest(&schema.table, &batch_id, schema, &header, records)
            .unwrap();
        let replaces = self
            .catalog
            .snapshot()
            .unwrap()
            .live_batch(&schema.table, batch)
            .iter()
            .map(|p| p.id)
            .collect();
        self.catalog
            .commit_batch(CommitRequest {
                schemas: result.schemas,
                partitions: result.partitions,
                replaces,
            })
            .unwrap()
    }

    fn load_sales(&self) {
        self.load(
            &sales_v1(),
            "2024-01",
            &[
                vec!["1", "north", "10.500"],
                vec!["2", "south", "1.250"],
                vec!["3", "north", ""],
                vec!["4", "east", "2.000"],
                vec!["5", "south", "0.250"],
            ],
        );
        self.load(
            &sales_v1(),
            "2024-02",
            &[
                vec!["20", "north", "100.000"],
                vec!["30", "west", "3.125"],
            ],
        );
    }
}

fn sales_query(aggregates: Vec<AggregateSpec>) -> AggregateQuery {
    AggregateQuery::new(TableName::new("sales"), aggregates)
}

#[test]
fn test_count_matches_committed_rows() {
    let f = fixture();
    f.load_sales();
    let table = f
        .engine
        .query(&AggregateQuery::count_rows(TableName::new("sales")))
        .unwrap();
    assert_eq!(table.columns, vec!["count_rows"]);
    assert_eq!(table.scalar(), Some(&Value::Int(7)));
}

#[test]
fn test_group_sum_ordered_and_limited() {
    let f = fixture();
    f.load_sales();
    let q = sales_query(vec![
        AggregateSpec::new(AggregateFunction::Sum, "amount").with_alias("revenue"),
        AggregateSpec::count_rows(),
    ])
    .group("region")
    .order("revenue", true);
    let mut q = q;
    q.limit = Some(2);

    let table = f.engine.query(&q).unwrap();
    assert_eq!(table.columns, vec!["region", "revenue", "count_rows"]);
    assert_eq!(table.rows.len(), 2);
    assert_eq!(table.value(0, "region"), Some(&Value::Text("north".into())));
    assert_eq!(
        table.value(0, "revenue"),
        Some(&Value::Decimal(Decimal::new(110_500, 3)))
    );
    assert_eq!(table.value(0, "count_rows"), Some(&Value::Int(3)));
    assert_eq!(table.value(1, "region"), Some(&Value::Text("west".into())));
}

#[test]
fn test_unordered_groups_follow_key_order() {
    let f = fixture();
    f.load_sales();
    let q = sales_query(vec![AggregateSpec::count_rows()]).group("region");
    let regions: Vec<Value> = f
        .engine
        .query(&q)
        .unwrap()
        .rows
        .into_iter()
        .map(|r| r.into_values().remove(0))
        .collect();
    assert_eq!(
        regions,
        ["east", "north", "south", "west"]
            .iter()
            .map(|r| Value::Text(r.to_string()))
            .collect::<Vec<_>>()
    );
}

#[test]
fn test_filters_conjunction() {
    let f = fixture();
    f.load_sales();
    let q = sales_query(vec![
        AggregateSpec::count_rows(),
        AggregateSpec::new(AggregateFunction::Count, "amount"),
        AggregateSpec::new(AggregateFunction::Max, "qty"),
        AggregateSpec::new(AggregateFunction::Min, "amount"),
    ])
    .filter(Predicate::one_of("region", &["north", "south"]))
    .filter(Predicate::new("qty", CompareOp::Lt, "20"));

    let table = f.engine.query(&q).unwrap();
    assert_eq!(table.value(0, "count_rows"), Some(&Value::Int(4)));
    assert_eq!(table.value(0, "count_amount"), Some(&Value::Int(3)));
    assert_eq!(table.value(0, "max_qty"), Some(&Value::Int(5)));
    assert_eq!(
        table.value(0, "min_amount"),
        Some(&Value::Decimal(Decimal::new(250, 3)))
    );
}

#[test]
fn test_avg_is_exact_decimal() {
    let f = fixture();
    f.load_sales();
    let q = sales_query(vec![AggregateSpec::new(AggregateFunction::Avg, "qty")])
        .filter(Predicate::new("region", CompareOp::Eq, "north"));
    let table = f.engine.query(&q).unwrap();
    // (1 + 3 + 20) / 3
    assert_eq!(table.scalar(), Some(&Value::Decimal(Decimal::from(8))));
}

#[test]
fn test_decimal_sum_has_no_drift() {
    let f = fixture();
    let schema = TableSchema::new(
        TableName::new("ledger"),
        1,
        vec![ColumnSchema::new(
            "amount",
            SemanticType::Decimal {
                precision: 5,
                scale: 3,
            },
            false,
        )],
    );
    let n = 5_000;
    f.load(&schema, "2024-01", &vec![vec!["10.005"]; n]);
    f.load(&schema, "2024-02", &vec![vec!["0.005"]; n]);

    let q = AggregateQuery::new(
        TableName::new("ledger"),
        vec![AggregateSpec::new(AggregateFunction::Sum, "amount")],
    );
    let table = f.engine.query(&q).unwrap();
    assert_eq!(
        table.scalar(),
        Some(&Value::Decimal(Decimal::new(50_050_000, 3)))
    );
}

#[test]
fn test_group_less_query_over_nothing_yields_one_row() {
    let f = fixture();
    f.load_sales();
    let q = sales_query(vec![
        AggregateSpec::count_rows(),
        AggregateSpec::new(AggregateFunction::Sum, "amount"),
    ])
    .filter(Predicate::new("region", CompareOp::Eq, "nowhere"));
    let table = f.engine.query(&q).unwrap();
    assert_eq!(table.rows.len(), 1);
    assert_eq!(
        table.rows[0].values(),
        &[Value::Int(0), Value::Null][..]
    );
}

#[test]
fn test_older_schema_versions_are_widened() {
    let f = fixture();
    f.load_sales();
    let mut v2 = sales_v1();
    v2.version = 2;
    v2.columns[0].ty = SemanticType::Int64 {
        width: IntWidth::U16,
    };
    v2.columns[2].ty = SemanticType::Decimal {
        precision: 10,
        scale: 4,
    };
    v2.columns
        .push(ColumnSchema::new("channel", SemanticType::String, true));
    f.load(&v2, "2024-03", &[vec!["1000", "north", "0.0001", "web"]]);

    let q = sales_query(vec![
        AggregateSpec::new(AggregateFunction::Sum, "amount"),
        AggregateSpec::new(AggregateFunction::Sum, "qty"),
    ])
    .group("channel");
    let table = f.engine.query(&q).unwrap();
    assert_eq!(table.rows.len(), 2);
    // old partitions have no channel column: they group under null
    assert_eq!(table.value(0, "channel"), Some(&Value::Null));
    assert_eq!(
        table.value(0, "sum_amount"),
        Some(&Value::Decimal(Decimal::new(1_171_250, 4)))
    );
    assert_eq!(table.value(0, "sum_qty"), Some(&Value::Int(65)));
    assert_eq!(table.value(1, "channel"), Some(&Value::Text("web".into())));
    assert_eq!(table.value(1, "sum_qty"), Some(&Value::Int(1000)));
}

#[test]
fn test_filter_on_added_column_skips_old_partitions() {
    let f = fixture();
    f.load_sales();
    let mut v2 = sales_v1();
    v2.version = 2;
    v2.columns
        .push(ColumnSchema::new("channel", SemanticType::String, true));
    f.load(&v2, "2024-03", &[vec!["7", "north", "1.000", "web"]]);

    let q = sales_query(vec![AggregateSpec::count_rows()])
        .filter(Predicate::new("channel", CompareOp::Eq, "web"));
    assert_eq!(f.engine.query(&q).unwrap().scalar(), Some(&Value::Int(1)));
}

#[test]
fn test_pruned_partition_is_not_read() {
    let f = fixture();
    f.load_sales();
    let view = f.catalog.snapshot().unwrap();
    let january = view.live_batch(&TableName::new("sales"), "2024-01")[0].clone();
    // qty in january is 1..=5; a filter on qty >= 20 never opens its file
    std::fs::remove_file(f.catalog.layout().resolve(&january.file)).unwrap();

    let q = sales_query(vec![AggregateSpec::count_rows()])
        .filter(Predicate::new("qty", CompareOp::Ge, "20"));
    assert_eq!(f.engine.query(&q).unwrap().scalar(), Some(&Value::Int(2)));
}

#[test]
fn test_cancelled_query_yields_cancelled() {
    let f = fixture();
    f.load_sales();
    let cancel = CancelToken::new();
    let mut stream = f
        .engine
        .execute_with_cancel(&sales_query(vec![AggregateSpec::count_rows()]), cancel.clone())
        .unwrap();
    cancel.cancel();
    assert!(matches!(stream.next(), Some(Err(QueryError::Cancelled))));
    assert!(stream.next().is_none());
}

#[test]
fn test_group_limit() {
    let f = fixture_with_groups(2);
    f.load_sales();
    let q = sales_query(vec![AggregateSpec::count_rows()]).group("region");
    let err = f.engine.query(&q).unwrap_err();
    assert!(matches!(err, QueryError::GroupLimitExceeded { limit: 2 }));
}

#[test]
fn test_unknown_table() {
    let f = fixture();
    let err = f
        .engine
        .execute(&AggregateQuery::count_rows(TableName::new("missing")))
        .err()
        .unwrap();
    assert!(matches!(err, QueryError::UnknownTable { .. }));
}

#[test]
fn test_stream_reads_the_view_it_was_planned_on() {
    let f = fixture();
    f.load_sales();
    let q = sales_query(vec![AggregateSpec::count_rows()]);
    let stream = f.engine.execute(&q).unwrap();

    // replace january with a single row while the stream is pending
    f.load(&sales_v1(), "2024-01", &[vec!["9", "north", "1.000"]]);
    assert_eq!(f.catalog.pending_tombstones().unwrap(), 1);

    let table = stream.try_collect().unwrap();
    assert_eq!(table.scalar(), Some(&Value::Int(7)));
    assert_eq!(f.catalog.pending_tombstones().unwrap(), 0);

    let fresh = f.engine.query(&q).unwrap();
    assert_eq!(fresh.scalar(), Some(&Value::Int(3)));
}
