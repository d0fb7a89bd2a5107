use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::services::query::dialect::SqlDialect;

/// Known ERP tables, keyed case-insensitively by both `schema.table` and
/// bare `table`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaCatalog {
    tables: BTreeSet<String>,
}

impl SchemaCatalog {
    pub fn from_tables<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut catalog = Self::default();
        for table in tables {
            catalog.insert(table.as_ref());
        }
        catalog
    }

    pub fn insert(&mut self, table: &str) {
        let key = table.trim().to_ascii_lowercase();
        if key.is_empty() {
            return;
        }
        if let Some((_, bare)) = key.rsplit_once('.') {
            self.tables.insert(bare.to_string());
        }
        self.tables.insert(key);
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains(&table.trim().to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(String::as_str)
    }

    /// Introspection query listing base tables and views, with the schema
    /// in `table_schema` and the name in `table_name`.
    pub fn introspection_sql(dialect: SqlDialect) -> &'static str {
        match dialect {
            SqlDialect::Postgres => {
                "SELECT table_schema, table_name FROM information_schema.tables \
                 WHERE table_schema NOT IN ('pg_catalog', 'information_schema')"
            }
            SqlDialect::MySql => {
                "SELECT table_schema, table_name FROM information_schema.tables \
                 WHERE table_schema = DATABASE()"
            }
            SqlDialect::MsSql => {
                "SELECT TABLE_SCHEMA AS table_schema, TABLE_NAME AS table_name \
                 FROM INFORMATION_SCHEMA.TABLES"
            }
        }
    }

    /// Builds a catalog from introspection rows. Column names are matched
    /// case-insensitively.
    pub fn from_rows(rows: &[serde_json::Map<String, serde_json::Value>]) -> Self {
        let field = |row: &serde_json::Map<String, serde_json::Value>, name: &str| {
            row.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .and_then(|(_, v)| v.as_str())
                .map(str::to_string)
        };

        let mut catalog = Self::default();
        for row in rows {
            let Some(table) = field(row, "table_name") else {
                continue;
            };
            match field(row, "table_schema") {
                Some(schema) if !schema.is_empty() => catalog.insert(&format!("{}.{}", schema, table)),
                _ => catalog.insert(&table),
            }
        }
        catalog
    }
}
