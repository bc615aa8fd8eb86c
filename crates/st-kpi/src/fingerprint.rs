//! Result fingerprints
//!
//! A fingerprint identifies one KPI result: the definition's spec checksum,
//! the effective parameters, and the exact set of live partitions (with their
//! checksums) of every dependency table. Any commit touching a dependency
//! changes the partition set, so stale results are never looked up again.

use crate::error::CacheResult;
use serde::{Deserialize, Serialize};
use st_catalog::{CatalogView, PartitionId};
use st_core::{compute_checksum, KpiDefinition, Parameters, TableName};
use std::collections::BTreeSet;
use std::fmt;

/// Hex sha256 identifying a KPI result
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One live partition a result was computed from
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEntry {
    pub table: TableName,
    pub partition: PartitionId,
    pub checksum: String,
}

/// Live partitions of `tables` in a catalog view, sorted
pub fn snapshot_of(view: &CatalogView, tables: &BTreeSet<TableName>) -> Vec<DependencyEntry> {
    let mut entries: Vec<DependencyEntry> = tables
        .iter()
        .flat_map(|table| {
            view.active_partitions(table)
                .into_iter()
                .map(|record| DependencyEntry {
                    table: record.table.clone(),
                    partition: record.id,
                    checksum: record.checksum.clone(),
                })
        })
        .collect();
    entries.sort();
    entries
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    kpi: &'a str,
    spec_checksum: String,
    parameters: &'a Parameters,
    dependencies: &'a [DependencyEntry],
}

/// Fingerprint of a definition evaluated with `params` over `dependencies`.
///
/// `params` must already be the effective parameters, so an explicit default
/// and an omitted one hash the same.
pub fn fingerprint(
    def: &KpiDefinition,
    params: &Parameters,
    dependencies: &[DependencyEntry],
) -> CacheResult<Fingerprint> {
    let input = FingerprintInput {
        kpi: def.id.as_str(),
        spec_checksum: def.spec_checksum()?,
        parameters: params,
        dependencies,
    };
    Ok(Fingerprint(compute_checksum(&serde_json::to_string(&input)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_core::{AggregateSpec, KpiId, RefreshPolicy};

    fn count_kpi() -> KpiDefinition {
        KpiDefinition {
            id: KpiId::new("order_count"),
            name: "Orders".to_string(),
            description: None,
            table: TableName::new("orders"),
            filters: Vec::new(),
            group_by: Vec::new(),
            aggregates: vec![AggregateSpec::count_rows()],
            order_by: Vec::new(),
            depends_on: Vec::new(),
            refresh: RefreshPolicy::OnDemand,
            parameters: Parameters::new(),
            owner: None,
            path: None,
        }
    }

    fn entry(id: u64, checksum: &str) -> DependencyEntry {
        DependencyEntry {
            table: TableName::new("orders"),
            partition: PartitionId(id),
            checksum: checksum.to_string(),
        }
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let deps = vec![entry(1, "aa"), entry(2, "bb")];
        let a = fingerprint(&count_kpi(), &Parameters::new(), &deps).unwrap();
        let b = fingerprint(&count_kpi(), &Parameters::new(), &deps).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_partitions() {
        let before = fingerprint(&count_kpi(), &Parameters::new(), &[entry(1, "aa")]).unwrap();
        let replaced = fingerprint(&count_kpi(), &Parameters::new(), &[entry(2, "aa")]).unwrap();
        let rewritten = fingerprint(&count_kpi(), &Parameters::new(), &[entry(1, "ab")]).unwrap();
        assert_ne!(before, replaced);
        assert_ne!(before, rewritten);
    }

    #[test]
    fn test_fingerprint_changes_with_parameters_and_spec() {
        let deps = [entry(1, "aa")];
        let base = fingerprint(&count_kpi(), &Parameters::new(), &deps).unwrap();

        let mut params = Parameters::new();
        params.insert("region".to_string(), "north".to_string());
        assert_ne!(base, fingerprint(&count_kpi(), &params, &deps).unwrap());

        let mut renamed = count_kpi();
        renamed.name = "All orders".to_string();
        assert_ne!(base, fingerprint(&renamed, &Parameters::new(), &deps).unwrap());
    }
}
