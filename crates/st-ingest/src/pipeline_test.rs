use super::*;
use crate::source::Provenance;
use crate::validate::QuarantineReason;
use st_catalog::PartitionBatches;
use arrow::datatypes::DataType;
use st_core::{ColumnSchema, IntWidth, SemanticType, Value};
use std::sync::Arc;
use tempfile::TempDir;

fn schema() -> TableSchema {
    TableSchema::new(
        TableName::new("sales"),
        1,
        vec![
            ColumnSchema::new(
                "id",
                SemanticType::Int64 {
                    width: IntWidth::U16,
                },
                false,
            ),
            ColumnSchema::new("region", SemanticType::Categorical, false),
            ColumnSchema::new(
                "amount",
                SemanticType::Decimal {
                    precision: 6,
                    scale: 2,
                },
                false,
            ),
        ],
    )
}

fn header() -> Vec<String> {
    vec!["id".to_string(), "region".to_string(), "amount".to_string()]
}

fn records(rows: Vec<Vec<String>>) -> Vec<PipelineResult<RawRecord>> {
    let file: Arc<str> = Arc::from("sales.csv");
    rows.into_iter()
        .enumerate()
        .map(|(i, fields)| {
            Ok(RawRecord {
                fields,
                provenance: Provenance {
                    file: Arc::clone(&file),
                    line: i as u64 + 2,
                },
            })
        })
        .collect()
}

fn valid_rows(n: usize) -> Vec<Vec<String>> {
    (0..n)
        .map(|i| {
            vec![
                i.to_string(),
                if i % 2 == 0 { "north" } else { "south" }.to_string(),
                format!("{}.25", i % 100),
            ]
        })
        .collect()
}

fn pipeline(
    dir: &TempDir,
    chunk_rows: usize,
    max_partition_rows: usize,
    threshold: usize,
) -> IngestionPipeline {
    pipeline_with(
        dir,
        PipelineOptions {
            chunk_rows,
            max_partition_rows,
            quarantine_threshold: threshold,
            widening: WideningPolicy::default(),
        },
    )
}

fn pipeline_with(dir: &TempDir, options: PipelineOptions) -> IngestionPipeline {
    let layout = StorageLayout::new(dir.path());
    layout.ensure_dirs().unwrap();
    IngestionPipeline::new(layout, options)
}

fn ingest(
    pipeline: &IngestionPipeline,
    rows: Vec<PipelineResult<RawRecord>>,
) -> PipelineResult<IngestResult> {
    pipeline.ingest(
        &TableName::new("sales"),
        &BatchId::new("2024-03"),
        &schema(),
        &header(),
        rows,
    )
}

fn file_rows(path: &std::path::Path) -> usize {
    PartitionBatches::open(path, None)
        .unwrap()
        .map(|b| b.unwrap().num_rows())
        .sum()
}

fn staging_is_empty(dir: &TempDir) -> bool {
    std::fs::read_dir(dir.path().join("staging"))
        .unwrap()
        .next()
        .is_none()
}

#[test]
fn test_partitions_roll_over_at_row_limit() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&dir, 3, 6, 0);
    let result = ingest(&pipeline, records(valid_rows(10))).unwrap();

    assert_eq!(result.rows_accepted, 10);
    assert!(result.quarantined.is_empty());
    let rows: Vec<u64> = result.partitions.iter().map(|p| p.row_count).collect();
    assert_eq!(rows, vec![6, 4]);
    let parts: Vec<u32> = result.partitions.iter().map(|p| p.part).collect();
    assert_eq!(parts, vec![0, 1]);

    for staged in &result.partitions {
        assert!(staged.staged_file.starts_with(dir.path().join("staging")));
        assert_eq!(file_rows(&staged.staged_file), staged.row_count as usize);
        assert_eq!(staged.checksum, file_checksum(&staged.staged_file).unwrap());
        assert!(staged.ingested_from <= staged.ingested_to);
    }
    assert_eq!(
        result.encoded_bytes,
        result.partitions.iter().map(|p| p.size_bytes).sum::<u64>()
    );
    assert!(result.raw_bytes > 0);
}

#[test]
fn test_stats_span_all_chunks() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&dir, 4, 1_000, 0);
    let result = ingest(&pipeline, records(valid_rows(10))).unwrap();
    assert_eq!(result.partitions.len(), 1);

    let stats = &result.partitions[0].stats;
    assert_eq!(stats["id"].min, Value::Int(0));
    assert_eq!(stats["id"].max, Value::Int(9));
    assert_eq!(stats["region"].min, Value::Text("north".to_string()));
    assert_eq!(stats["region"].max, Value::Text("south".to_string()));
    assert_eq!(stats["amount"].null_count, 0);
}

#[test]
fn test_one_bad_row_in_a_thousand() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&dir, 128, 1_000_000, 5);
    let mut rows = valid_rows(1000);
    rows[500][0] = "five hundred".to_string();

    let result = ingest(&pipeline, records(rows)).unwrap();
    assert_eq!(result.rows_accepted, 999);
    assert_eq!(result.quarantined.len(), 1);
    let bad = &result.quarantined[0];
    assert_eq!(bad.reason, QuarantineReason::TypeMismatch);
    assert_eq!(bad.line, 502);
    assert_eq!(bad.column.as_deref(), Some("id"));
    assert_eq!(result.partitions.len(), 1);
    assert_eq!(result.partitions[0].row_count, 999);
    assert_eq!(file_rows(&result.partitions[0].staged_file), 999);
}

#[test]
fn test_quarantine_threshold_aborts_and_cleans_up() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&dir, 2, 4, 2);
    let mut rows = valid_rows(12);
    rows[8][2] = "n/a?".to_string();
    rows[9].truncate(2);
    rows[10][0] = "x1".to_string();

    let err = ingest(&pipeline, records(rows)).unwrap_err();
    assert!(matches!(
        err,
        IngestError::QuarantineThresholdExceeded {
            quarantined: 3,
            threshold: 2,
            ..
        }
    ));
    assert!(staging_is_empty(&dir));
}

#[test]
fn test_source_error_cleans_up() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&dir, 2, 4, 0);
    let mut rows = records(valid_rows(6));
    rows.push(Err(IngestError::MalformedInput {
        file: "sales.csv".to_string(),
        message: "truncated".to_string(),
    }));

    assert!(ingest(&pipeline, rows).is_err());
    assert!(staging_is_empty(&dir));
}

#[test]
fn test_empty_input_yields_empty_partition() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&dir, 2, 4, 0);
    let result = ingest(&pipeline, Vec::new()).unwrap();
    assert_eq!(result.rows_accepted, 0);
    assert_eq!(result.partitions.len(), 1);
    assert_eq!(result.partitions[0].row_count, 0);
    assert_eq!(file_rows(&result.partitions[0].staged_file), 0);

    result.discard();
    assert!(staging_is_empty(&dir));
}

#[test]
fn test_header_missing_schema_column() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&dir, 2, 4, 0);
    let err = pipeline
        .ingest(
            &TableName::new("sales"),
            &BatchId::new("2024-03"),
            &schema(),
            &["id".to_string()],
            Vec::<PipelineResult<RawRecord>>::new(),
        )
        .unwrap_err();
    assert!(matches!(err, IngestError::MalformedInput { .. }));
}

/// Schema profiled from a sample of small ids and one-decimal amounts
fn sampled_schema() -> TableSchema {
    TableSchema::new(
        TableName::new("sales"),
        1,
        vec![
            ColumnSchema::new(
                "id",
                SemanticType::Int64 {
                    width: IntWidth::U8,
                },
                false,
            ),
            ColumnSchema::new("region", SemanticType::Categorical, false),
            ColumnSchema::new(
                "amount",
                SemanticType::Decimal {
                    precision: 2,
                    scale: 1,
                },
                false,
            ),
        ],
    )
}

/// Ids 1..=1000; amounts gain a decimal place from id 901, id 950 has none
fn growing_rows() -> Vec<Vec<String>> {
    (1..=1000)
        .map(|i| {
            let amount = match i {
                950 => String::new(),
                _ if i >= 901 => "1.25".to_string(),
                _ => "2.5".to_string(),
            };
            vec![i.to_string(), "north".to_string(), amount]
        })
        .collect()
}

#[test]
fn test_values_beyond_sampled_range_widen_the_schema() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&dir, 128, 1_000_000, 0);
    let result = pipeline
        .ingest(
            &TableName::new("sales"),
            &BatchId::new("2024-03"),
            &sampled_schema(),
            &header(),
            records(growing_rows()),
        )
        .unwrap();

    assert_eq!(result.rows_accepted, 1000);
    assert!(result.quarantined.is_empty());
    assert_eq!(result.schema_version, 4);
    let versions: Vec<u32> = result.schemas.iter().map(|s| s.version).collect();
    assert_eq!(versions, vec![1, 2, 3, 4]);

    let last = &result.schemas[3];
    assert_eq!(
        last.column("id").unwrap().ty,
        SemanticType::Int64 {
            width: IntWidth::U16
        }
    );
    let amount = last.column("amount").unwrap();
    assert_eq!(
        amount.ty,
        SemanticType::Decimal {
            precision: 3,
            scale: 2
        }
    );
    assert!(amount.nullable);
    assert!(!last.column("id").unwrap().nullable);

    // one partition per schema version, split where each widening happened
    let parts: Vec<(u32, u64)> = result
        .partitions
        .iter()
        .map(|p| (p.schema_version, p.row_count))
        .collect();
    assert_eq!(parts, vec![(1, 255), (2, 645), (3, 49), (4, 51)]);
    let ids = PartitionBatches::open(&result.partitions[1].staged_file, None)
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    assert_eq!(ids.column(0).data_type(), &DataType::UInt16);
    assert_eq!(
        result.partitions.iter().map(|p| file_rows(&p.staged_file)).sum::<usize>(),
        1000
    );
}

#[test]
fn test_forbidden_widening_is_schema_drift() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline_with(
        &dir,
        PipelineOptions {
            chunk_rows: 64,
            max_partition_rows: 1_000,
            quarantine_threshold: 1_000,
            widening: WideningPolicy {
                integers: false,
                ..WideningPolicy::default()
            },
        },
    );
    let err = pipeline
        .ingest(
            &TableName::new("sales"),
            &BatchId::new("2024-03"),
            &sampled_schema(),
            &header(),
            records(growing_rows()),
        )
        .unwrap_err();
    let IngestError::SchemaDrift { changes, .. } = err else {
        panic!("expected drift");
    };
    assert_eq!(changes.len(), 1);
    assert!(changes[0].contains("'id'"), "{}", changes[0]);
    assert!(staging_is_empty(&dir));
}
