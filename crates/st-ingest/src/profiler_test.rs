use super::*;
use crate::source::Provenance;
use std::sync::Arc;

fn header(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn rows(data: &[&[&str]]) -> Vec<RawRecord> {
    let file: Arc<str> = Arc::from("sample.csv");
    data.iter()
        .enumerate()
        .map(|(i, fields)| RawRecord {
            fields: fields.iter().map(|s| s.to_string()).collect(),
            provenance: Provenance {
                file: Arc::clone(&file),
                line: i as u64 + 2,
            },
        })
        .collect()
}

fn table() -> TableName {
    TableName::new("sales")
}

fn infer_fresh(names: &[&str], data: &[&[&str]]) -> TableSchema {
    infer(&table(), &header(names), &rows(data), None, &ProfileOptions::default()).unwrap()
}

fn int(width: IntWidth) -> SemanticType {
    SemanticType::Int64 { width }
}

#[test]
fn test_narrowest_integer_widths() {
    let schema = infer_fresh(
        &["a", "b", "c", "d", "e"],
        &[
            &["0", "-5", "300", "70000", "3000000000"],
            &["255", "100", "65535", "-2000000000", "-1"],
        ],
    );
    let widths: Vec<_> = schema.columns.iter().map(|c| c.ty).collect();
    assert_eq!(
        widths,
        vec![
            int(IntWidth::U8),
            int(IntWidth::I8),
            int(IntWidth::U16),
            int(IntWidth::I32),
            int(IntWidth::I64),
        ]
    );
    assert_eq!(schema.version, 1);
}

#[test]
fn test_decimal_precision_and_scale() {
    let schema = infer_fresh(&["amount", "rate"], &[&["1234.5", "0.005"], &["-7.25", "0.5"]]);
    assert_eq!(
        schema.columns[0].ty,
        SemanticType::Decimal {
            precision: 6,
            scale: 2
        }
    );
    assert_eq!(
        schema.columns[1].ty,
        SemanticType::Decimal {
            precision: 4,
            scale: 3
        }
    );
}

#[test]
fn test_dates_and_text() {
    let data: Vec<Vec<String>> = (0..10)
        .map(|i| {
            vec![
                format!("2024-01-{:02}", i + 1),
                if i % 2 == 0 { "north" } else { "south" }.to_string(),
                format!("order note {}", i),
            ]
        })
        .collect();
    let refs: Vec<Vec<&str>> = data
        .iter()
        .map(|r| r.iter().map(String::as_str).collect())
        .collect();
    let slices: Vec<&[&str]> = refs.iter().map(Vec::as_slice).collect();
    let schema = infer_fresh(&["day", "region", "note"], &slices);
    assert_eq!(schema.columns[0].ty, SemanticType::Date);
    assert_eq!(schema.columns[1].ty, SemanticType::Categorical);
    assert_eq!(schema.columns[2].ty, SemanticType::String);
}

#[test]
fn test_nullability_and_all_null_columns() {
    let schema = infer_fresh(
        &["units", "empty", "full"],
        &[&["1", "", "x"], &["NULL", "n/a", "y"], &["3", "", "z"]],
    );
    assert_eq!(schema.columns[0].ty, int(IntWidth::U8));
    assert!(schema.columns[0].nullable);
    assert_eq!(schema.columns[1].ty, SemanticType::String);
    assert!(schema.columns[1].nullable);
    assert!(!schema.columns[2].nullable);
}

#[test]
fn test_outliers_within_tolerance_keep_numeric_type() {
    let mut data: Vec<Vec<&str>> = (0..20).map(|_| vec!["42"]).collect();
    data[7] = vec!["forty-two"];
    let slices: Vec<&[&str]> = data.iter().map(Vec::as_slice).collect();

    let lenient = ProfileOptions {
        tolerance: 5,
        ..ProfileOptions::default()
    };
    let schema = infer(&table(), &header(&["units"]), &rows(&slices), None, &lenient).unwrap();
    assert_eq!(schema.columns[0].ty, int(IntWidth::U8));

    let strict = ProfileOptions {
        tolerance: 0,
        ..ProfileOptions::default()
    };
    let schema = infer(&table(), &header(&["units"]), &rows(&slices), None, &strict).unwrap();
    assert!(schema.columns[0].ty.is_text());
}

#[test]
fn test_rows_with_wrong_field_count_are_ignored() {
    let schema = infer_fresh(&["a", "b"], &[&["1", "2"], &["x"], &["3", "4"]]);
    assert_eq!(schema.columns[0].ty, int(IntWidth::U8));
}

fn prior(columns: Vec<ColumnSchema>) -> TableSchema {
    TableSchema::new(table(), 3, columns)
}

#[test]
fn test_identical_sample_keeps_version() {
    let prior = prior(vec![
        ColumnSchema::new("units", int(IntWidth::U16), false),
        ColumnSchema::new("region", SemanticType::String, false),
    ]);
    let schema = infer(
        &table(),
        &header(&["region", "units"]),
        &rows(&[&["north", "12"], &["south", "9"]]),
        Some(&prior),
        &ProfileOptions::default(),
    )
    .unwrap();
    assert_eq!(schema, prior);
}

#[test]
fn test_integer_widening_bumps_version() {
    let prior = prior(vec![ColumnSchema::new("units", int(IntWidth::U8), false)]);
    let data: &[&[&str]] = &[&["1000"], &[""]];
    let schema = infer(
        &table(),
        &header(&["units"]),
        &rows(data),
        Some(&prior),
        &ProfileOptions::default(),
    )
    .unwrap();
    assert_eq!(schema.version, 4);
    assert_eq!(schema.columns[0].ty, int(IntWidth::U16));
    assert!(schema.columns[0].nullable);

    let frozen = ProfileOptions {
        widening: WideningPolicy {
            integers: false,
            ..WideningPolicy::default()
        },
        ..ProfileOptions::default()
    };
    let err = infer(&table(), &header(&["units"]), &rows(data), Some(&prior), &frozen).unwrap_err();
    assert!(matches!(err, IngestError::SchemaDrift { .. }));
}

#[test]
fn test_integer_to_decimal_widening() {
    let prior = prior(vec![ColumnSchema::new("amount", int(IntWidth::U16), false)]);
    let schema = infer(
        &table(),
        &header(&["amount"]),
        &rows(&[&["12.50"], &["3.25"]]),
        Some(&prior),
        &ProfileOptions::default(),
    )
    .unwrap();
    assert_eq!(
        schema.columns[0].ty,
        SemanticType::Decimal {
            precision: 7,
            scale: 2
        }
    );
}

#[test]
fn test_narrower_sample_keeps_prior_type() {
    let prior = prior(vec![ColumnSchema::new(
        "amount",
        SemanticType::Decimal {
            precision: 12,
            scale: 3,
        },
        false,
    )]);
    let schema = infer(
        &table(),
        &header(&["amount"]),
        &rows(&[&["7"], &["1.5"]]),
        Some(&prior),
        &ProfileOptions::default(),
    )
    .unwrap();
    assert_eq!(schema, prior);
}

#[test]
fn test_drift_is_reported_with_every_change() {
    let prior = prior(vec![
        ColumnSchema::new("units", int(IntWidth::U8), false),
        ColumnSchema::new("region", SemanticType::Categorical, false),
        ColumnSchema::new("gone", SemanticType::String, true),
    ]);
    let err = infer(
        &table(),
        &header(&["units", "region", "extra"]),
        &rows(&[&["a lot", "north", "1"], &["some", "south", "2"]]),
        Some(&prior),
        &ProfileOptions::default(),
    )
    .unwrap_err();
    let IngestError::SchemaDrift { changes, .. } = err else {
        panic!("expected drift");
    };
    assert_eq!(changes.len(), 3);
    assert!(changes[0].contains("'units'"));
    assert!(changes[1].contains("'gone' was removed"));
    assert!(changes[2].contains("'extra' was added"));
}

#[test]
fn test_added_columns_when_allowed() {
    let prior = prior(vec![ColumnSchema::new("units", int(IntWidth::U8), false)]);
    let options = ProfileOptions {
        widening: WideningPolicy {
            added_columns: true,
            ..WideningPolicy::default()
        },
        ..ProfileOptions::default()
    };
    let schema = infer(
        &table(),
        &header(&["units", "region"]),
        &rows(&[&["1", "north"], &["2", "north"], &["3", "north"]]),
        Some(&prior),
        &options,
    )
    .unwrap();
    assert_eq!(schema.version, 4);
    assert_eq!(schema.columns[1].name, "region");
    assert!(schema.columns[1].nullable);
}

#[test]
fn test_categorical_may_become_string() {
    let prior = prior(vec![ColumnSchema::new("note", SemanticType::Categorical, false)]);
    let schema = infer(
        &table(),
        &header(&["note"]),
        &rows(&[&["a"], &["b"], &["c"]]),
        Some(&prior),
        &ProfileOptions::default(),
    )
    .unwrap();
    assert_eq!(schema.columns[0].ty, SemanticType::String);
    assert_eq!(schema.version, 4);
}

#[test]
fn test_widen_column_for_outgrown_values() {
    let units = ColumnSchema::new("units", int(IntWidth::U8), false);
    let policy = WideningPolicy::default();

    let widened = widen_column(&units, Growth::Type(int(IntWidth::U16)), &policy).unwrap();
    assert_eq!(widened.ty, int(IntWidth::U16));
    assert!(!widened.nullable);

    let widened = widen_column(&units, Growth::Nullable, &policy).unwrap();
    assert_eq!(widened.ty, int(IntWidth::U8));
    assert!(widened.nullable);

    let fixed = WideningPolicy {
        integers: false,
        ..policy
    };
    let err = widen_column(&units, Growth::Type(int(IntWidth::I8)), &fixed).unwrap_err();
    assert!(err.starts_with("column 'units'"), "{err}");

    let amount = ColumnSchema::new(
        "amount",
        SemanticType::Decimal {
            precision: 2,
            scale: 1,
        },
        true,
    );
    let widened = widen_column(
        &amount,
        Growth::Type(SemanticType::Decimal {
            precision: 3,
            scale: 2,
        }),
        &policy,
    )
    .unwrap();
    assert_eq!(
        widened.ty,
        SemanticType::Decimal {
            precision: 3,
            scale: 2
        }
    );
}
