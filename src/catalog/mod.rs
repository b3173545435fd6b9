//! Catalog & Allowlist
//!
//! Describes the tables a generated query may read. The catalog is either
//! reflected from the live database or taken from a built-in fallback, and
//! is turned into an immutable [`CatalogAllowlist`] that the validator
//! treats as the only source of truth for real tables and columns.

pub mod cache;
pub mod reflection;

pub use cache::CatalogCache;
pub use reflection::{ColumnRow, NoSchemaSource, PgSchemaSource, SchemaSource};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// A reflected or fallback column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogColumn {
    pub name: String,
    #[serde(rename = "dataType")]
    pub data_type: String,
}

/// A reflected or fallback table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogTable {
    pub name: String,
    pub columns: Vec<CatalogColumn>,
}

impl CatalogTable {
    pub fn new(name: &str, columns: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns
                .iter()
                .map(|(name, data_type)| CatalogColumn {
                    name: name.to_string(),
                    data_type: data_type.to_string(),
                })
                .collect(),
        }
    }
}

/// Normalized lookup sets derived from a list of [`CatalogTable`]s.
///
/// Names are trimmed and lower-cased. `column_union` backs the resolution
/// of unqualified column references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogAllowlist {
    pub tables: HashSet<String>,
    pub columns: HashMap<String, HashSet<String>>,
    pub column_union: HashSet<String>,
}

impl CatalogAllowlist {
    pub fn from_tables(tables: &[CatalogTable]) -> Self {
        let mut allowlist = Self::default();
        for table in tables {
            let table_name = normalize_name(&table.name);
            let mut column_set = HashSet::new();
            for column in &table.columns {
                let column_name = normalize_name(&column.name);
                allowlist.column_union.insert(column_name.clone());
                column_set.insert(column_name);
            }
            allowlist.tables.insert(table_name.clone());
            allowlist.columns.insert(table_name, column_set);
        }
        allowlist
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains(table)
    }

    /// Column set of a real table, `None` if the table is not allowlisted
    pub fn table_columns(&self, table: &str) -> Option<&HashSet<String>> {
        self.columns.get(table)
    }
}

/// One immutable generation of the catalog
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub tables: Vec<CatalogTable>,
    pub allowlist: Arc<CatalogAllowlist>,
}

impl CatalogSnapshot {
    pub fn new(tables: Vec<CatalogTable>) -> Self {
        let allowlist = Arc::new(CatalogAllowlist::from_tables(&tables));
        Self { tables, allowlist }
    }

    /// Text block describing the allowlist for the planning prompt
    pub fn context(&self) -> String {
        if self.tables.is_empty() {
            return "Allowed tables: (none discovered)".to_string();
        }
        let mut lines = vec!["Allowed tables and columns:".to_string()];
        for table in &self.tables {
            let columns: Vec<String> = table
                .columns
                .iter()
                .map(|c| format!("{} ({})", c.name, c.data_type))
                .collect();
            lines.push(format!("- {}: {}", table.name, columns.join(", ")));
        }
        lines.push(
            "Rules: tables live in the public schema and are read-only. Columns ending in [] are arrays."
                .to_string(),
        );
        lines.join("\n")
    }
}

/// Schema used on cold start and whenever reflection is unavailable
pub fn fallback_tables() -> Vec<CatalogTable> {
    vec![
        CatalogTable::new(
            "gym_lifts",
            &[
                ("id", "text"),
                ("date", "date"),
                ("timestamp", "timestamptz"),
                ("exercise", "text"),
                ("weight", "numeric"),
                ("reps", "integer"),
                ("set_number", "integer"),
                ("day_tag", "text"),
                ("is_unilateral", "boolean"),
                ("equipment", "text"),
            ],
        ),
        CatalogTable::new(
            "gym_day_meta",
            &[
                ("date", "date"),
                ("day_tag", "text"),
                ("body_parts", "text[]"),
                ("updated_at", "timestamptz"),
            ],
        ),
    ]
}

/// Array columns are reported as `ARRAY` with the element type in `udt_name`
/// (prefixed with an underscore); they are spelled `element[]` instead.
pub fn format_array_type(data_type: &str, udt_name: &str) -> String {
    if data_type.eq_ignore_ascii_case("ARRAY") {
        format!("{}[]", udt_name.strip_prefix('_').unwrap_or(udt_name))
    } else {
        data_type.to_string()
    }
}

/// Group reflection rows into tables, keeping only names with `table_prefix`.
/// Column order follows the rows; tables are sorted by name.
pub fn group_rows_into_tables(rows: &[ColumnRow], table_prefix: &str) -> Vec<CatalogTable> {
    let prefix = table_prefix.to_lowercase();
    let mut grouped: BTreeMap<String, CatalogTable> = BTreeMap::new();
    for row in rows {
        if !row.table_name.to_lowercase().starts_with(&prefix) {
            continue;
        }
        let entry = grouped
            .entry(row.table_name.clone())
            .or_insert_with(|| CatalogTable {
                name: row.table_name.clone(),
                columns: Vec::new(),
            });
        entry.columns.push(CatalogColumn {
            name: row.column_name.clone(),
            data_type: format_array_type(&row.data_type, &row.udt_name),
        });
    }
    grouped.into_values().collect()
}

pub fn normalize_name(value: &str) -> String {
    value.trim().to_lowercase()
}
