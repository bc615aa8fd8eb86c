use super::*;

#[test]
fn test_parse_minimal_config() {
    let config = Config::from_yaml("name: sales_warehouse").unwrap();
    assert_eq!(config.name, "sales_warehouse");
    let root = PathBuf::from("/srv/stratum");
    assert_eq!(config.data_dir_absolute(&root), root.join("data"));
    assert_eq!(config.kpi_paths_absolute(&root), vec![root.join("kpis")]);
    assert_eq!(config.ingest.chunk_rows, 65_536);
    assert_eq!(config.ingest.quarantine_threshold, 1_000);
    assert!(config.ingest.widening.integers);
    assert!(!config.ingest.widening.added_columns);
    assert!(config.cache.persist);
    assert!(config.catalog.verify_checksums);
}

#[test]
fn test_parse_full_config() {
    let yaml = r#"
name: sales_warehouse
data_dir: /var/lib/stratum
kpi_paths:
  - kpis
  - shared/kpis
ingest:
  chunk_rows: 1000
  max_partition_rows: 5000
  quarantine_threshold: 5
  sample_rows: 200
  delimiter: ";"
  categorical_ratio: 0.25
  widening:
    integers: false
    added_columns: true
query:
  max_groups: 10
cache:
  budget_bytes: 4096
  persist: false
catalog:
  verify_checksums: false
"#;
    let config = Config::from_yaml(yaml).unwrap();
    let root = PathBuf::from("/srv/stratum");
    assert_eq!(
        config.data_dir_absolute(&root),
        PathBuf::from("/var/lib/stratum")
    );
    assert_eq!(config.kpi_paths_absolute(&root).len(), 2);
    assert_eq!(config.ingest.delimiter, ';');
    assert_eq!(config.ingest.quarantine_threshold, 5);
    assert!(!config.ingest.widening.integers);
    assert!(config.ingest.widening.decimals);
    assert!(config.ingest.widening.added_columns);
    assert_eq!(config.query.max_groups, 10);
    assert_eq!(config.cache.budget_bytes, 4096);
    assert!(!config.cache.persist);
    assert!(!config.catalog.verify_checksums);
}

#[test]
fn test_unknown_field_rejected() {
    let err = Config::from_yaml("name: x\nmaterialization: view").unwrap_err();
    assert!(matches!(err, CoreError::ConfigParseError { .. }));
}

#[test]
fn test_empty_name_rejected() {
    let err = Config::from_yaml("name: \"\"").unwrap_err();
    assert!(matches!(err, CoreError::ConfigInvalid { .. }));
}

#[test]
fn test_partition_rows_below_chunk_rows_rejected() {
    let yaml = "name: x\ningest:\n  chunk_rows: 100\n  max_partition_rows: 10\n";
    assert!(Config::from_yaml(yaml).is_err());
}

#[test]
fn test_load_from_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("stratum.yml"), "name: from_dir\n").unwrap();
    let config = Config::load_from_dir(dir.path()).unwrap();
    assert_eq!(config.name, "from_dir");
}

#[test]
fn test_load_from_dir_missing() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load_from_dir(dir.path()).unwrap_err();
    assert!(matches!(err, CoreError::ConfigNotFound { .. }));
}

#[test]
fn test_default_for() {
    let config = Config::default_for("demo");
    assert_eq!(config.name, "demo");
    assert_eq!(config.query.max_groups, 1_000_000);
}
