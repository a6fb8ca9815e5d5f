//! Code translation table: domain values to CM codes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One reference-data row as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRow {
    /// Entity category, e.g. `AGENT` or `CUSTOMER`.
    pub category: String,
    /// Group key, e.g. `DIVISION`.
    pub group: String,
    /// Domain value as captured on the record.
    pub source: String,
    /// CM code the value translates to.
    pub code: String,
}

impl ReferenceRow {
    pub fn new(
        category: impl Into<String>,
        group: impl Into<String>,
        source: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            group: group.into(),
            source: source.into(),
            code: code.into(),
        }
    }
}

/// A required code lookup found nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No CM code for {category}/{group}/{}", value.as_deref().unwrap_or("<default>"))]
pub struct TranslationMiss {
    pub category: String,
    pub group: String,
    /// The looked-up value; `None` for a default-code lookup.
    pub value: Option<String>,
}

/// Immutable nested lookup: category → group → ordered (source, code) pairs.
///
/// Built once from reference rows; a refresh builds a new table.
#[derive(Debug, Clone, Default)]
pub struct CodeTranslationTable {
    groups: HashMap<String, HashMap<String, Vec<(String, String)>>>,
    rows: usize,
}

impl CodeTranslationTable {
    /// Group rows by category then group key, keeping first-seen order
    /// inside each group.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = ReferenceRow>,
    {
        let mut groups: HashMap<String, HashMap<String, Vec<(String, String)>>> = HashMap::new();
        let mut count = 0;
        for row in rows {
            groups
                .entry(normalize(&row.category))
                .or_default()
                .entry(normalize(&row.group))
                .or_default()
                .push((row.source.trim().to_string(), row.code.trim().to_string()));
            count += 1;
        }
        Self {
            groups,
            rows: count,
        }
    }

    /// Translate `value`. When several rows share the value the first one wins.
    pub fn resolve(&self, category: &str, group: &str, value: &str) -> Result<&str, TranslationMiss> {
        let value = value.trim();
        self.entries(category, group)
            .iter()
            .find(|(source, _)| source.eq_ignore_ascii_case(value))
            .map(|(_, code)| code.as_str())
            .ok_or_else(|| TranslationMiss {
                category: category.to_string(),
                group: group.to_string(),
                value: Some(value.to_string()),
            })
    }

    /// First code of a group, used when the record carries no value.
    pub fn default_code(&self, category: &str, group: &str) -> Result<&str, TranslationMiss> {
        self.entries(category, group)
            .first()
            .map(|(_, code)| code.as_str())
            .ok_or_else(|| TranslationMiss {
                category: category.to_string(),
                group: group.to_string(),
                value: None,
            })
    }

    /// All pairs of a group in insertion order; empty when unknown.
    pub fn entries(&self, category: &str, group: &str) -> &[(String, String)] {
        self.groups
            .get(&normalize(category))
            .and_then(|groups| groups.get(&normalize(group)))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of rows the table was built from.
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

fn normalize(key: &str) -> String {
    key.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CodeTranslationTable {
        CodeTranslationTable::from_rows(vec![
            ReferenceRow::new("AGENT", "DIVISION", "Mobile", "10"),
            ReferenceRow::new("AGENT", "DIVISION", "Fixed", "20"),
            ReferenceRow::new("AGENT", "DIVISION", "mobile", "11"),
            ReferenceRow::new("CUSTOMER", "DIVISION", "Mobile", "30"),
            ReferenceRow::new("AGENT", "DISTRIBUTION_CHANNEL", "Direct", "01"),
            ReferenceRow::new("AGENT", "DISTRIBUTION_CHANNEL", "Dealer", "02"),
        ])
    }

    #[test]
    fn resolves_by_category_and_group() {
        let t = table();
        assert_eq!(t.resolve("AGENT", "DIVISION", "Fixed").unwrap(), "20");
        assert_eq!(t.resolve("CUSTOMER", "DIVISION", "Mobile").unwrap(), "30");
        assert_eq!(t.len(), 6);
    }

    #[test]
    fn first_match_wins_for_ambiguous_values() {
        let t = table();
        assert_eq!(t.resolve("AGENT", "DIVISION", "MOBILE").unwrap(), "10");
    }

    #[test]
    fn keys_are_case_insensitive() {
        let t = table();
        assert_eq!(t.resolve("agent", "division", " Fixed ").unwrap(), "20");
    }

    #[test]
    fn miss_reports_the_lookup() {
        let t = table();
        let miss = t.resolve("AGENT", "SALES_ORG", "KE01").unwrap_err();
        assert_eq!(miss.group, "SALES_ORG");
        assert_eq!(miss.value.as_deref(), Some("KE01"));
        assert!(miss.to_string().contains("AGENT/SALES_ORG/KE01"));
        assert!(t.resolve("CUSTOMER", "DIVISION", "Fixed").is_err());
    }

    #[test]
    fn default_code_is_first_seen() {
        let t = table();
        assert_eq!(t.default_code("AGENT", "DISTRIBUTION_CHANNEL").unwrap(), "01");
        let miss = t.default_code("CUSTOMER", "DISTRIBUTION_CHANNEL").unwrap_err();
        assert!(miss.value.is_none());
    }

    #[test]
    fn empty_table() {
        let t = CodeTranslationTable::default();
        assert!(t.is_empty());
        assert!(t.entries("AGENT", "DIVISION").is_empty());
    }
}
