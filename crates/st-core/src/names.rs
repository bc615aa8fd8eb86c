//! Strongly-typed names for tables, KPIs and ingestion batches.

use crate::newtype_string::define_name;

define_name! {
    /// A logical table name (`sales`, `customer_master`).
    ///
    /// Lowercase ASCII letters, digits and underscores, starting with a letter.
    pub struct TableName => check_identifier;
}

define_name! {
    /// A KPI identifier, same character rules as table names.
    pub struct KpiId => check_identifier;
}

define_name! {
    /// Source-batch identity, usually the export month (`2024-03`).
    ///
    /// Used as a path segment, so separators and dot-only names are rejected.
    pub struct BatchId => check_batch;
}

fn check_identifier(s: &str) -> Result<(), &'static str> {
    let mut chars = s.chars();
    match chars.next() {
        None => return Err("must not be empty"),
        Some(c) if !c.is_ascii_lowercase() => return Err("must start with a lowercase letter"),
        _ => {}
    }
    if chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        Ok(())
    } else {
        Err("only lowercase letters, digits and '_' are allowed")
    }
}

fn check_batch(s: &str) -> Result<(), &'static str> {
    if s.is_empty() {
        return Err("must not be empty");
    }
    if s.chars().all(|c| c == '.') {
        return Err("must not consist of dots only");
    }
    if s.contains(['/', '\\']) {
        return Err("must not contain path separators");
    }
    Ok(())
}

impl TableName {
    /// Derive a table name from an export file stem the way exports are named
    /// in practice (`Sales Orders-2024` -> `sales_orders_2024`).
    pub fn from_file_stem(stem: &str) -> Result<Self, String> {
        let normalized: String = stem
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        Self::parse(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_rules() {
        assert!(TableName::parse("sales").is_ok());
        assert!(TableName::parse("sales_2024").is_ok());
        assert!(TableName::parse("").is_err());
        assert!(TableName::parse("Sales").is_err());
        assert!(TableName::parse("1sales").is_err());
        assert!(TableName::parse("sales.orders").is_err());
    }

    #[test]
    fn test_table_name_from_file_stem() {
        assert_eq!(
            TableName::from_file_stem("Sales Orders-2024").unwrap(),
            "sales_orders_2024"
        );
        assert!(TableName::from_file_stem("   ").is_err());
    }

    #[test]
    fn test_batch_id_rules() {
        assert!(BatchId::parse("2024-03").is_ok());
        assert!(BatchId::parse("..").is_err());
        assert!(BatchId::parse("a/b").is_err());
    }

    #[test]
    fn test_deserialize_rejects_invalid() {
        let ok: KpiId = serde_json::from_str("\"revenue\"").unwrap();
        assert_eq!(ok, "revenue");
        let err = serde_json::from_str::<KpiId>("\"Revenue\"");
        assert!(err.is_err());
    }
}
