//! KPI definitions and discovery
//!
//! A KPI is a named aggregate query over one table plus the metadata the
//! cache needs: which tables feed it, how long results stay valid, and
//! default values for `$parameter` placeholders in its filters.

use crate::checksum::compute_checksum;
use crate::error::{CoreError, CoreResult};
use crate::names::{KpiId, TableName};
use crate::query::{
    AggregateQuery, AggregateSpec, Literal, Operand, OrderBy, Predicate,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Parameter bindings, ordered so they hash deterministically
pub type Parameters = BTreeMap<String, String>;

/// When cached results for a KPI stop being served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Valid until a dependency partition changes; recomputed after ingestion
    #[default]
    OnIngest,
    /// Valid until a dependency partition changes; computed only when asked
    OnDemand,
    /// Like `OnDemand`, and additionally expires `seconds` after computation
    Ttl { seconds: u64 },
}

impl RefreshPolicy {
    /// Maximum result age, if the policy has one
    pub fn max_age(&self) -> Option<Duration> {
        match self {
            RefreshPolicy::Ttl { seconds } => Some(Duration::from_secs(*seconds)),
            _ => None,
        }
    }

    /// Whether the orchestrator recomputes this KPI after each commit
    pub fn warms_on_ingest(&self) -> bool {
        matches!(self, RefreshPolicy::OnIngest)
    }
}

/// A KPI definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KpiDefinition {
    /// Unique id of the KPI
    pub id: KpiId,
    /// Human-readable name
    pub name: String,
    /// Description of what the KPI measures
    #[serde(default)]
    pub description: Option<String>,
    /// Source table
    pub table: TableName,
    /// Conjunction of filters; `$name` literals are parameters
    #[serde(default)]
    pub filters: Vec<Predicate>,
    /// Group-by columns
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Aggregate expressions
    pub aggregates: Vec<AggregateSpec>,
    /// Optional ordering of grouped results
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    /// Tables feeding the KPI besides `table`
    #[serde(default)]
    pub depends_on: Vec<TableName>,
    /// Result validity policy
    #[serde(default)]
    pub refresh: RefreshPolicy,
    /// Default parameter values
    #[serde(default)]
    pub parameters: Parameters,
    /// Owner/maintainer of this KPI
    #[serde(default)]
    pub owner: Option<String>,
    /// File path where this KPI was defined
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

/// Kind discriminator for KPI files (must be "kpi")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KpiKind {
    /// The only valid kind value
    Kpi,
}

/// Raw YAML structure for KPI files
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct KpiFile {
    /// Validated by serde during deserialization to ensure `kind: kpi`
    #[allow(dead_code)]
    kind: KpiKind,
    id: KpiId,
    name: String,
    #[serde(default)]
    description: Option<String>,
    table: TableName,
    #[serde(default)]
    filters: Vec<Predicate>,
    #[serde(default)]
    group_by: Vec<String>,
    aggregates: Vec<AggregateSpec>,
    #[serde(default)]
    order_by: Vec<OrderBy>,
    #[serde(default)]
    depends_on: Vec<TableName>,
    #[serde(default)]
    refresh: RefreshPolicy,
    #[serde(default, deserialize_with = "scalar_map")]
    parameters: Parameters,
    #[serde(default)]
    owner: Option<String>,
}

/// Parameter defaults may be written as bare YAML numbers
fn scalar_map<'de, D>(deserializer: D) -> Result<Parameters, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: BTreeMap<String, Literal> = BTreeMap::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(k, v)| (k, v.0)).collect())
}

impl KpiDefinition {
    /// Parse a KPI from YAML content
    pub fn from_yaml(content: &str, path: &Path) -> CoreResult<Self> {
        let invalid = |message: String| CoreError::KpiDefinitionInvalid {
            path: path.display().to_string(),
            message,
        };
        let raw: KpiFile = serde_yaml::from_str(content).map_err(|e| invalid(e.to_string()))?;

        let def = KpiDefinition {
            id: raw.id,
            name: raw.name,
            description: raw.description,
            table: raw.table,
            filters: raw.filters,
            group_by: raw.group_by,
            aggregates: raw.aggregates,
            order_by: raw.order_by,
            depends_on: raw.depends_on,
            refresh: raw.refresh,
            parameters: raw.parameters,
            owner: raw.owner,
            path: Some(path.to_path_buf()),
        };
        def.validate().map_err(|e| invalid(e.to_string()))?;
        Ok(def)
    }

    /// Load a KPI from a file
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&content, path)
    }

    /// Check the definition's shape
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidQuery {
                message: format!("KPI '{}' has an empty name", self.id),
            });
        }
        self.query_template().validate()
    }

    /// The query with `$parameter` literals left unbound
    pub fn query_template(&self) -> AggregateQuery {
        AggregateQuery {
            table: self.table.clone(),
            filters: self.filters.clone(),
            group_by: self.group_by.clone(),
            aggregates: self.aggregates.clone(),
            order_by: self.order_by.clone(),
            limit: None,
        }
    }

    /// Caller parameters merged over the definition defaults
    pub fn effective_parameters(&self, params: &Parameters) -> Parameters {
        let mut merged = self.parameters.clone();
        merged.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Produce the executable query for a set of parameter bindings
    pub fn bind(&self, params: &Parameters) -> CoreResult<AggregateQuery> {
        let bindings = self.effective_parameters(params);
        let mut query = self.query_template();
        for pred in &mut query.filters {
            pred.value = match &pred.value {
                Operand::One(lit) => Operand::One(self.bind_literal(lit, &bindings)?),
                Operand::Many(lits) => Operand::Many(
                    lits.iter()
                        .map(|l| self.bind_literal(l, &bindings))
                        .collect::<CoreResult<Vec<_>>>()?,
                ),
            };
        }
        Ok(query)
    }

    fn bind_literal(&self, lit: &Literal, bindings: &Parameters) -> CoreResult<Literal> {
        match lit.parameter_name() {
            None => Ok(lit.clone()),
            Some(name) => bindings
                .get(name)
                .map(|v| Literal(v.clone()))
                .ok_or_else(|| CoreError::UnboundParameter {
                    kpi: self.id.to_string(),
                    parameter: name.to_string(),
                }),
        }
    }

    /// Every table whose partitions feed this KPI
    pub fn dependencies(&self) -> BTreeSet<TableName> {
        let mut deps: BTreeSet<TableName> = self.depends_on.iter().cloned().collect();
        deps.insert(self.table.clone());
        deps
    }

    /// Checksum of the specification, excluding where it was loaded from
    pub fn spec_checksum(&self) -> CoreResult<String> {
        Ok(compute_checksum(&serde_json::to_string(self)?))
    }

    /// Whether two definitions specify the same KPI
    pub fn same_spec(&self, other: &KpiDefinition) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.path = None;
        b.path = None;
        a == b
    }
}

/// Minimal YAML probe to check the `kind` field without full deserialization
#[derive(Deserialize)]
struct KpiKindProbe {
    #[serde(default)]
    kind: Option<KpiKind>,
}

/// Discover KPI definitions from a list of directories
///
/// Files whose `kind` is not `kpi` are skipped; a `kind: kpi` file that does
/// not parse is an error, as are duplicate ids across files.
pub fn discover_kpis(paths: &[PathBuf]) -> CoreResult<Vec<KpiDefinition>> {
    let mut kpis = Vec::new();

    for path in paths {
        if !path.is_dir() {
            continue;
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(path)
            .map_err(|e| CoreError::IoWithPath {
                path: path.display().to_string(),
                source: e,
            })?
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "yml" || ext == "yaml"))
            .collect();
        files.sort();

        for file_path in files {
            let content = std::fs::read_to_string(&file_path).map_err(|e| {
                CoreError::IoWithPath {
                    path: file_path.display().to_string(),
                    source: e,
                }
            })?;

            // Probe the kind field before full parse
            let probe: KpiKindProbe = match serde_yaml::from_str(&content) {
                Ok(p) => p,
                Err(_) => continue,
            };
            if !matches!(probe.kind, Some(KpiKind::Kpi)) {
                log::debug!("Skipping {}: not a KPI file", file_path.display());
                continue;
            }

            kpis.push(KpiDefinition::from_yaml(&content, &file_path)?);
        }
    }

    let mut seen: HashMap<KpiId, usize> = HashMap::new();
    for (idx, kpi) in kpis.iter().enumerate() {
        if let Some(&prev_idx) = seen.get(&kpi.id) {
            return Err(CoreError::KpiDuplicateId {
                id: kpi.id.to_string(),
                path1: display_path(&kpis[prev_idx].path),
                path2: display_path(&kpi.path),
            });
        }
        seen.insert(kpi.id.clone(), idx);
    }

    Ok(kpis)
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<inline>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{AggregateFunction, CompareOp};
    use tempfile::TempDir;

    const MONTHLY_REVENUE: &str = r#"
kind: kpi
id: monthly_revenue
name: Monthly revenue
table: sales
filters:
  - column: region
    op: eq
    value: $region
  - column: amount
    op: gt
    value: 0
group_by: [month]
aggregates:
  - function: sum
    column: amount
    alias: revenue
refresh:
  policy: ttl
  seconds: 3600
parameters:
  region: north
"#;

    #[test]
    fn test_parse_kpi() {
        let kpi = KpiDefinition::from_yaml(MONTHLY_REVENUE, Path::new("kpis/rev.yml")).unwrap();
        assert_eq!(kpi.id.as_str(), "monthly_revenue");
        assert_eq!(kpi.table.as_str(), "sales");
        assert_eq!(kpi.filters.len(), 2);
        assert_eq!(kpi.filters[1].op, CompareOp::Gt);
        assert_eq!(kpi.aggregates[0].function, AggregateFunction::Sum);
        assert_eq!(kpi.refresh, RefreshPolicy::Ttl { seconds: 3600 });
        assert_eq!(kpi.refresh.max_age(), Some(Duration::from_secs(3600)));
        assert_eq!(kpi.parameters.get("region").map(String::as_str), Some("north"));
        assert_eq!(kpi.path.as_deref(), Some(Path::new("kpis/rev.yml")));
    }

    #[test]
    fn test_default_refresh_is_on_ingest() {
        let yaml = r#"
kind: kpi
id: row_count
name: Rows
table: sales
aggregates:
  - function: count
"#;
        let kpi = KpiDefinition::from_yaml(yaml, Path::new("k.yml")).unwrap();
        assert_eq!(kpi.refresh, RefreshPolicy::OnIngest);
        assert!(kpi.refresh.warms_on_ingest());
        assert_eq!(kpi.refresh.max_age(), None);
    }

    #[test]
    fn test_reject_wrong_kind_and_unknown_fields() {
        let wrong_kind = MONTHLY_REVENUE.replace("kind: kpi", "kind: metric");
        assert!(matches!(
            KpiDefinition::from_yaml(&wrong_kind, Path::new("k.yml")),
            Err(CoreError::KpiDefinitionInvalid { .. })
        ));
        let extra = format!("{}\nsurprise: true\n", MONTHLY_REVENUE);
        assert!(KpiDefinition::from_yaml(&extra, Path::new("k.yml")).is_err());
    }

    #[test]
    fn test_reject_kpi_without_aggregates() {
        let yaml = r#"
kind: kpi
id: empty
name: Empty
table: sales
aggregates: []
"#;
        let err = KpiDefinition::from_yaml(yaml, Path::new("k.yml")).unwrap_err();
        assert!(err.to_string().contains("[C004]"));
    }

    #[test]
    fn test_bind_uses_defaults_and_overrides() {
        let kpi = KpiDefinition::from_yaml(MONTHLY_REVENUE, Path::new("k.yml")).unwrap();

        let query = kpi.bind(&Parameters::new()).unwrap();
        assert_eq!(query.filters[0].value, Operand::One(Literal::from("north")));
        assert_eq!(query.filters[1].value, Operand::One(Literal::from("0")));

        let mut params = Parameters::new();
        params.insert("region".to_string(), "south".to_string());
        let query = kpi.bind(&params).unwrap();
        assert_eq!(query.filters[0].value, Operand::One(Literal::from("south")));
    }

    #[test]
    fn test_bind_unbound_parameter() {
        let mut kpi = KpiDefinition::from_yaml(MONTHLY_REVENUE, Path::new("k.yml")).unwrap();
        kpi.parameters.clear();
        let err = kpi.bind(&Parameters::new()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::UnboundParameter { ref parameter, .. } if parameter == "region"
        ));
    }

    #[test]
    fn test_effective_parameters_equal_for_explicit_default() {
        let kpi = KpiDefinition::from_yaml(MONTHLY_REVENUE, Path::new("k.yml")).unwrap();
        let mut explicit = Parameters::new();
        explicit.insert("region".to_string(), "north".to_string());
        assert_eq!(
            kpi.effective_parameters(&explicit),
            kpi.effective_parameters(&Parameters::new())
        );
    }

    #[test]
    fn test_dependencies_include_source_table() {
        let mut kpi = KpiDefinition::from_yaml(MONTHLY_REVENUE, Path::new("k.yml")).unwrap();
        kpi.depends_on = vec![TableName::new("regions"), TableName::new("sales")];
        let deps: Vec<String> = kpi.dependencies().iter().map(|t| t.to_string()).collect();
        assert_eq!(deps, vec!["regions", "sales"]);
    }

    #[test]
    fn test_same_spec_ignores_path() {
        let a = KpiDefinition::from_yaml(MONTHLY_REVENUE, Path::new("a.yml")).unwrap();
        let b = KpiDefinition::from_yaml(MONTHLY_REVENUE, Path::new("b.yml")).unwrap();
        assert!(a.same_spec(&b));
        assert_eq!(a.spec_checksum().unwrap(), b.spec_checksum().unwrap());

        let mut c = b.clone();
        c.name = "Renamed".to_string();
        assert!(!a.same_spec(&c));
        assert_ne!(a.spec_checksum().unwrap(), c.spec_checksum().unwrap());
    }

    #[test]
    fn test_discover_kpis_skips_other_kinds() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("revenue.yml"), MONTHLY_REVENUE).unwrap();
        std::fs::write(dir.path().join("notes.yml"), "kind: metric\nname: x\n").unwrap();
        std::fs::write(dir.path().join("readme.txt"), "kind: kpi").unwrap();

        let kpis = discover_kpis(&[dir.path().to_path_buf(), dir.path().join("missing")]).unwrap();
        assert_eq!(kpis.len(), 1);
        assert_eq!(kpis[0].id.as_str(), "monthly_revenue");
    }

    #[test]
    fn test_discover_kpis_duplicate_id() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.yml"), MONTHLY_REVENUE).unwrap();
        std::fs::write(dir.path().join("b.yml"), MONTHLY_REVENUE).unwrap();
        assert!(matches!(
            discover_kpis(&[dir.path().to_path_buf()]),
            Err(CoreError::KpiDuplicateId { .. })
        ));
    }
}
