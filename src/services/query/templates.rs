//! Fixed SQL skeletons for the predefined dataset types.
//!
//! Only the table name, an optional WHERE fragment and the row limit are
//! substituted. Table names must match `^[A-Za-z0-9_]+$` and WHERE fragments
//! are screened for separators, comments and destructive keywords.

use serde::{Deserialize, Serialize};

use crate::middleware::error_handling::{AppError, Result};
use crate::models::mapping::DatasetType;
use crate::services::query::dialect::SqlDialect;
use crate::services::query::identifier::{validate_table_name, validate_where_fragment};
use crate::services::query::MAX_ROW_LIMIT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTemplate {
    pub key: &'static str,
    pub sql: &'static str,
}

const TEMPLATES: &[QueryTemplate] = &[
    QueryTemplate {
        key: "ITEMS",
        sql: "SELECT {top}item_code, item_name, uom, pack_qty, barcode, category, brand FROM {table}{where}{limit}",
    },
    QueryTemplate {
        key: "STOCK",
        sql: "SELECT {top}item_code, location_code, quantity FROM {table}{where}{limit}",
    },
    QueryTemplate {
        key: "COST",
        sql: "SELECT {top}item_code, cost FROM {table}{where}{limit}",
    },
    QueryTemplate {
        key: "PRICE",
        sql: "SELECT {top}item_code, price FROM {table}{where}{limit}",
    },
    QueryTemplate {
        key: "DESTINATION",
        sql: "SELECT {top}location_code, location_name FROM {table}{where}{limit}",
    },
    // Direct single-table read used when no mapping is configured.
    QueryTemplate {
        key: "LEGACY_ITEMS",
        sql: "SELECT {top}* FROM {table}{where}{limit}",
    },
];

pub const LEGACY_ITEMS_TEMPLATE: &str = "LEGACY_ITEMS";

/// Dataset read through its fixed template, for tables laid out the way the
/// template expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateQuery {
    pub dataset_type: DatasetType,
    pub table: String,
    #[serde(default)]
    pub where_clause: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateParams {
    pub table: String,
    #[serde(default)]
    pub where_clause: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl QueryTemplate {
    pub fn find(key: &str) -> Option<&'static QueryTemplate> {
        TEMPLATES.iter().find(|t| t.key.eq_ignore_ascii_case(key))
    }

    pub fn for_dataset(dataset: DatasetType) -> &'static QueryTemplate {
        // Every dataset type has an entry above.
        TEMPLATES
            .iter()
            .find(|t| t.key == dataset.as_str())
            .unwrap_or(&TEMPLATES[0])
    }

}

pub fn render_template(key: &str, dialect: SqlDialect, params: &TemplateParams) -> Result<String> {
    let template = QueryTemplate::find(key)
        .ok_or_else(|| AppError::InvalidInput(format!("Unknown query template: {}", key)))?;

    validate_table_name(&params.table)?;

    if let Some(limit) = params.limit {
        if limit == 0 || limit > MAX_ROW_LIMIT {
            return Err(AppError::InvalidInput(format!(
                "Row limit must be between 1 and {}",
                MAX_ROW_LIMIT
            )));
        }
    }

    let where_sql = match params.where_clause.as_deref().map(str::trim) {
        Some(fragment) if !fragment.is_empty() => {
            validate_where_fragment(fragment)?;
            format!(" WHERE {}", fragment)
        }
        _ => String::new(),
    };

    Ok(template
        .sql
        .replace("{top}", &dialect.top_clause(params.limit))
        .replace("{table}", &params.table)
        .replace("{where}", &where_sql)
        .replace("{limit}", &dialect.limit_clause(params.limit)))
}
