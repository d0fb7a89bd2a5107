//! Compiles a declarative mapping (main table, joins, filters, columns) into
//! a single parameterized SELECT for the connection's dialect.
//!
//! Table references inside column expressions, join conditions and filter
//! fields are rewritten to the alias assigned to that table. References that
//! do not resolve are left untouched, which keeps compilation idempotent.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::middleware::error_handling::{AppError, Result};
use crate::models::mapping::{FilterOperator, FilterSpec, JoinSpec, MappingConfig};
use crate::services::query::catalog::SchemaCatalog;
use crate::services::query::dialect::SqlDialect;
use crate::services::query::identifier::{
    validate_alias, validate_column_reference, validate_select_statement, validate_table_reference,
};
use crate::services::query::templates::{render_template, QueryTemplate, TemplateParams, TemplateQuery};
use crate::services::query::MAX_ROW_LIMIT;

static DOTTED_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*(?:\.(?:[A-Za-z_][A-Za-z0-9_]*|\*))+").unwrap()
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParam {
    pub name: String,
    pub value: Value,
}

/// SQL text plus its bound parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub sql: String,
    pub parameters: Vec<QueryParam>,
}

impl CompiledQuery {
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameters: Vec::new(),
        }
    }

    pub fn values(&self) -> Vec<Value> {
        self.parameters.iter().map(|p| p.value.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectColumn {
    pub expr: String,
    #[serde(default)]
    pub alias: Option<String>,
}

/// Typed intermediate representation shared by stored mappings and the
/// ad-hoc query builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub main_table: String,
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
    #[serde(default)]
    pub columns: Vec<SelectColumn>,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl QuerySpec {
    pub fn from_mapping(config: &MappingConfig, limit: Option<u32>) -> Self {
        Self {
            main_table: config.main_table.clone(),
            joins: config.joins.clone(),
            columns: config
                .field_mappings
                .iter()
                .map(|m| SelectColumn {
                    expr: m.source.clone(),
                    alias: Some(m.target.clone()),
                })
                .collect(),
            filters: config.filters.clone(),
            limit,
        }
    }
}

/// Table to alias assignment for one query.
#[derive(Debug, Clone)]
pub struct TableAliases {
    main_alias: String,
    join_aliases: Vec<String>,
    lookup: HashMap<String, String>,
}

impl TableAliases {
    pub fn build(main_table: &str, joins: &[JoinSpec]) -> Result<Self> {
        let mut used: HashSet<String> = HashSet::new();
        for join in joins {
            if let Some(alias) = &join.alias {
                validate_alias(alias)?;
                if !used.insert(alias.to_ascii_lowercase()) {
                    return Err(AppError::InvalidInput(format!("Duplicate join alias: {}", alias)));
                }
            }
        }

        let main_alias = generate_alias(main_table, &used);
        used.insert(main_alias.to_ascii_lowercase());

        let mut join_aliases = Vec::with_capacity(joins.len());
        for join in joins {
            let alias = match &join.alias {
                Some(alias) => alias.clone(),
                None => {
                    let generated = generate_alias(&join.table, &used);
                    used.insert(generated.to_ascii_lowercase());
                    generated
                }
            };
            join_aliases.push(alias);
        }

        let mut lookup = HashMap::new();
        let tables = std::iter::once((main_table, &main_alias))
            .chain(joins.iter().map(|j| j.table.as_str()).zip(join_aliases.iter()));
        for (table, alias) in tables {
            let qualified = table.to_ascii_lowercase();
            let bare = qualified.rsplit('.').next().unwrap_or(&qualified).to_string();
            lookup.entry(qualified).or_insert_with(|| alias.clone());
            lookup.entry(bare).or_insert_with(|| alias.clone());
        }

        Ok(Self {
            main_alias,
            join_aliases,
            lookup,
        })
    }

    pub fn main_alias(&self) -> &str {
        &self.main_alias
    }

    pub fn join_alias(&self, index: usize) -> Option<&str> {
        self.join_aliases.get(index).map(String::as_str)
    }

    /// Alias for a `table` or `schema.table` reference.
    pub fn resolve(&self, table: &str) -> Option<&str> {
        self.lookup.get(&table.to_ascii_lowercase()).map(String::as_str)
    }

    /// Rewrites `table.column` and `schema.table.column` references to
    /// `alias.column`. Quoted literals are left alone.
    pub fn rewrite(&self, expr: &str) -> String {
        expr.split('\'')
            .enumerate()
            .map(|(i, segment)| {
                if i % 2 == 1 {
                    return segment.to_string();
                }
                DOTTED_REFERENCE
                    .replace_all(segment, |caps: &Captures<'_>| self.rewrite_reference(&caps[0]))
                    .into_owned()
            })
            .collect::<Vec<_>>()
            .join("'")
    }

    fn rewrite_reference(&self, reference: &str) -> String {
        let parts: Vec<&str> = reference.split('.').collect();
        let resolved = match parts.as_slice() {
            [table, column] => self.resolve(table).map(|alias| (alias, *column)),
            [schema, table, column] => self
                .resolve(&format!("{}.{}", schema, table))
                .map(|alias| (alias, *column)),
            _ => None,
        };

        match resolved {
            Some((alias, column)) => format!("{}.{}", alias, column),
            None => reference.to_string(),
        }
    }
}

/// First letter of the bare table name, first two characters on collision,
/// then a numeric suffix.
fn generate_alias(table: &str, used: &HashSet<String>) -> String {
    let bare = table.rsplit('.').next().unwrap_or(table).to_ascii_lowercase();
    let mut chars = bare.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '_');
    let first: String = chars.next().map(String::from).unwrap_or_else(|| "t".to_string());
    let base = if first.chars().all(|c| c.is_ascii_alphabetic() || c == '_') {
        first
    } else {
        format!("t{}", first)
    };

    if !used.contains(&base) {
        return base;
    }

    let two = match chars.next() {
        Some(second) => format!("{}{}", base, second),
        None => format!("{}{}", base, base),
    };
    if !used.contains(&two) {
        return two;
    }

    (2..)
        .map(|n| format!("{}{}", two, n))
        .find(|candidate| !used.contains(candidate))
        .unwrap_or(two)
}

#[derive(Debug, Clone, Default)]
pub struct QueryCompiler {
    dialect: SqlDialect,
    catalog: Option<SchemaCatalog>,
}

impl QueryCompiler {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect, catalog: None }
    }

    /// Restricts table references to those known from introspection.
    pub fn with_catalog(mut self, catalog: SchemaCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Compiles a stored mapping, honoring its raw override query. A raw
    /// query is wrapped so the row limit still applies; it cannot be checked
    /// against a catalog and is refused when one is set.
    pub fn compile_mapping(&self, config: &MappingConfig, limit: Option<u32>) -> Result<CompiledQuery> {
        if let Some(raw) = config.raw_query.as_deref().filter(|q| !q.trim().is_empty()) {
            validate_limit(limit)?;
            if self.catalog.is_some() {
                return Err(AppError::InvalidInput(format!(
                    "Mapping {} uses a raw query, which cannot be checked against the schema catalog",
                    config.name
                )));
            }
            let sql = validate_select_statement(raw)?;
            return Ok(CompiledQuery::raw(self.dialect.limit_statement(&sql, limit)));
        }
        self.compile(&QuerySpec::from_mapping(config, limit))
    }

    /// Renders the dataset's fixed template against `query.table`.
    pub fn compile_template(&self, query: &TemplateQuery, limit: Option<u32>) -> Result<CompiledQuery> {
        self.check_table(&query.table)?;
        let sql = render_template(
            QueryTemplate::for_dataset(query.dataset_type).key,
            self.dialect,
            &TemplateParams {
                table: query.table.clone(),
                where_clause: query.where_clause.clone(),
                limit,
            },
        )?;
        Ok(CompiledQuery::raw(sql))
    }

    pub fn compile(&self, spec: &QuerySpec) -> Result<CompiledQuery> {
        validate_limit(spec.limit)?;
        self.check_table(&spec.main_table)?;
        for join in &spec.joins {
            self.check_table(&join.table)?;
            if join.on.is_empty() {
                return Err(AppError::InvalidInput(format!("Join on {} has no condition", join.table)));
            }
        }

        let aliases = TableAliases::build(&spec.main_table, &spec.joins)?;

        let columns = if spec.columns.is_empty() {
            format!("{}.*", aliases.main_alias())
        } else {
            spec.columns
                .iter()
                .map(|column| self.render_column(column, &aliases))
                .collect::<Result<Vec<_>>>()?
                .join(", ")
        };

        let mut sql = format!(
            "SELECT {}{} FROM {} {}",
            self.dialect.top_clause(spec.limit),
            columns,
            spec.main_table,
            aliases.main_alias()
        );

        for (index, join) in spec.joins.iter().enumerate() {
            let conditions = join
                .on
                .iter()
                .map(|condition| {
                    validate_column_reference(&condition.left, false)?;
                    validate_column_reference(&condition.right, false)?;
                    Ok(format!(
                        "{} = {}",
                        aliases.rewrite(&condition.left),
                        aliases.rewrite(&condition.right)
                    ))
                })
                .collect::<Result<Vec<_>>>()?;

            sql.push_str(&format!(
                " {} JOIN {} {} ON {}",
                join.join_type.keyword(),
                join.table,
                aliases.join_alias(index).unwrap_or_default(),
                conditions.join(" AND ")
            ));
        }

        let mut parameters = Vec::new();
        if !spec.filters.is_empty() {
            let conditions = spec
                .filters
                .iter()
                .map(|filter| self.render_filter(filter, &aliases, &mut parameters))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        sql.push_str(&self.dialect.limit_clause(spec.limit));

        Ok(CompiledQuery { sql, parameters })
    }

    fn check_table(&self, table: &str) -> Result<()> {
        validate_table_reference(table)?;
        if let Some(catalog) = &self.catalog {
            if !catalog.contains(table) {
                return Err(AppError::InvalidInput(format!("Unknown table: {}", table)));
            }
        }
        Ok(())
    }

    fn render_column(&self, column: &SelectColumn, aliases: &TableAliases) -> Result<String> {
        validate_column_reference(&column.expr, true)?;
        let expr = aliases.rewrite(&column.expr);
        match &column.alias {
            Some(alias) if !column.expr.ends_with('*') => {
                validate_alias(alias)?;
                Ok(format!("{} AS {}", expr, self.dialect.quote_alias(alias)))
            }
            _ => Ok(expr),
        }
    }

    fn render_filter(
        &self,
        filter: &FilterSpec,
        aliases: &TableAliases,
        parameters: &mut Vec<QueryParam>,
    ) -> Result<String> {
        validate_column_reference(&filter.field, false)?;
        let field = aliases.rewrite(&filter.field);

        match filter.operator {
            FilterOperator::IsNull | FilterOperator::IsNotNull => {
                Ok(format!("{} {}", field, filter.operator.sql()))
            }
            FilterOperator::In => {
                let values = match &filter.value {
                    Value::Array(values) if !values.is_empty() => values,
                    _ => {
                        return Err(AppError::InvalidInput(format!(
                            "Filter on {} needs a non-empty list for IN",
                            filter.field
                        )))
                    }
                };
                let placeholders = values
                    .iter()
                    .map(|value| {
                        ensure_scalar(&filter.field, value)?;
                        Ok(self.bind(parameters, value.clone()))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("{} IN ({})", field, placeholders.join(", ")))
            }
            operator => {
                ensure_scalar(&filter.field, &filter.value)?;
                let placeholder = self.bind(parameters, filter.value.clone());
                Ok(format!("{} {} {}", field, operator.sql(), placeholder))
            }
        }
    }

    fn bind(&self, parameters: &mut Vec<QueryParam>, value: Value) -> String {
        let index = parameters.len() + 1;
        parameters.push(QueryParam {
            name: format!("p{}", index),
            value,
        });
        self.dialect.placeholder(index)
    }
}

fn ensure_scalar(field: &str, value: &Value) -> Result<()> {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(()),
        _ => Err(AppError::InvalidInput(format!("Filter on {} needs a scalar value", field))),
    }
}

/// Rejects zero limits and limits above the hard ceiling.
pub fn validate_limit(limit: Option<u32>) -> Result<()> {
    match limit {
        Some(0) => Err(AppError::InvalidInput("Row limit must be positive".to_string())),
        Some(n) if n > MAX_ROW_LIMIT => Err(AppError::InvalidInput(format!(
            "Row limit {} exceeds maximum of {}",
            n, MAX_ROW_LIMIT
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::mapping::{JoinCondition, JoinType};
    use serde_json::json;

    fn join(table: &str, alias: Option<&str>, left: &str, right: &str) -> JoinSpec {
        JoinSpec {
            table: table.to_string(),
            alias: alias.map(String::from),
            join_type: JoinType::Inner,
            on: vec![JoinCondition {
                left: left.to_string(),
                right: right.to_string(),
            }],
        }
    }

    fn column(expr: &str, alias: Option<&str>) -> SelectColumn {
        SelectColumn {
            expr: expr.to_string(),
            alias: alias.map(String::from),
        }
    }

    fn item_stock_spec() -> QuerySpec {
        QuerySpec {
            main_table: "OITM".to_string(),
            joins: vec![join("OITW", Some("w"), "OITM.ItemCode", "OITW.ItemCode")],
            columns: vec![
                column("OITM.ItemCode", Some("itemCode")),
                column("OITM.ItemName", Some("itemName")),
                column("OITW.OnHand", Some("systemQty")),
            ],
            filters: vec![FilterSpec {
                field: "OITW.WhsCode".to_string(),
                operator: FilterOperator::Eq,
                value: json!("01"),
            }],
            limit: None,
        }
    }

    #[test]
    fn test_compile_item_stock_join() {
        let compiled = QueryCompiler::new(SqlDialect::Postgres).compile(&item_stock_spec()).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT o.ItemCode AS \"itemCode\", o.ItemName AS \"itemName\", w.OnHand AS \"systemQty\" \
             FROM OITM o INNER JOIN OITW w ON o.ItemCode = w.ItemCode WHERE w.WhsCode = $1"
        );
        assert_eq!(compiled.values(), vec![json!("01")]);
    }

    #[test]
    fn test_main_alias_takes_two_chars_on_collision() {
        let spec = QuerySpec {
            main_table: "items".to_string(),
            joins: vec![join("stock", Some("i"), "items.code", "stock.code")],
            columns: vec![column("items.code", None)],
            filters: vec![],
            limit: None,
        };
        let compiled = QueryCompiler::new(SqlDialect::Postgres).compile(&spec).unwrap();
        assert!(compiled.sql.starts_with("SELECT it.code FROM items it INNER JOIN stock i ON it.code = i.code"));
    }

    #[test]
    fn test_schema_qualified_references_resolve() {
        let spec = QuerySpec {
            main_table: "dbo.OITM".to_string(),
            joins: vec![join("dbo.OITW", Some("w"), "dbo.OITM.ItemCode", "OITW.ItemCode")],
            columns: vec![column("dbo.OITM.ItemCode", None)],
            filters: vec![],
            limit: None,
        };
        let compiled = QueryCompiler::new(SqlDialect::Postgres).compile(&spec).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT o.ItemCode FROM dbo.OITM o INNER JOIN dbo.OITW w ON o.ItemCode = w.ItemCode"
        );
    }

    #[test]
    fn test_unresolved_reference_passes_through() {
        let aliases = TableAliases::build("OITM", &[]).unwrap();
        assert_eq!(aliases.rewrite("OCRD.CardCode"), "OCRD.CardCode");
        assert_eq!(aliases.rewrite("OITM.ItemCode"), "o.ItemCode");
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let spec = item_stock_spec();
        let aliases = TableAliases::build(&spec.main_table, &spec.joins).unwrap();
        for expr in ["OITM.ItemCode", "OITW.OnHand", "OCRD.CardCode", "ItemCode"] {
            let once = aliases.rewrite(expr);
            assert_eq!(aliases.rewrite(&once), once);
        }
    }

    #[test]
    fn test_every_reference_resolves_with_many_joins() {
        let spec = QuerySpec {
            main_table: "OITM".to_string(),
            joins: vec![
                join("OITW", None, "OITM.ItemCode", "OITW.ItemCode"),
                join("OITB", None, "OITM.ItmsGrpCod", "OITB.ItmsGrpCod"),
                join("OMRC", None, "OITM.FirmCode", "OMRC.FirmCode"),
            ],
            columns: vec![
                column("OITM.ItemCode", None),
                column("OITB.ItmsGrpNam", None),
                column("OMRC.FirmName", None),
            ],
            filters: vec![],
            limit: None,
        };
        let compiled = QueryCompiler::new(SqlDialect::Postgres).compile(&spec).unwrap();
        for table in ["OITM.", "OITW.", "OITB.", "OMRC."] {
            assert!(!compiled.sql.contains(table), "{} left unresolved in {}", table, compiled.sql);
        }
    }

    #[test]
    fn test_quoted_literals_untouched() {
        let aliases = TableAliases::build("OITM", &[]).unwrap();
        assert_eq!(aliases.rewrite("OITM.a = 'OITM.b'"), "o.a = 'OITM.b'");
    }

    #[test]
    fn test_mssql_uses_top_only() {
        let mut spec = item_stock_spec();
        spec.limit = Some(100);
        let compiled = QueryCompiler::new(SqlDialect::MsSql).compile(&spec).unwrap();
        assert!(compiled.sql.starts_with("SELECT TOP 100 "));
        assert!(!compiled.sql.contains("LIMIT"));
        assert!(compiled.sql.ends_with("WHERE w.WhsCode = @p1"));
    }

    #[test]
    fn test_postgres_uses_limit_only() {
        let mut spec = item_stock_spec();
        spec.limit = Some(100);
        let compiled = QueryCompiler::new(SqlDialect::Postgres).compile(&spec).unwrap();
        assert!(compiled.sql.ends_with(" LIMIT 100"));
        assert!(!compiled.sql.contains("TOP"));
    }

    #[test]
    fn test_limit_ceiling() {
        let mut spec = item_stock_spec();
        spec.limit = Some(MAX_ROW_LIMIT + 1);
        assert!(QueryCompiler::new(SqlDialect::Postgres).compile(&spec).is_err());
        spec.limit = Some(MAX_ROW_LIMIT);
        assert!(QueryCompiler::new(SqlDialect::Postgres).compile(&spec).is_ok());
    }

    #[test]
    fn test_in_and_null_filters() {
        let mut spec = item_stock_spec();
        spec.filters = vec![
            FilterSpec {
                field: "OITW.WhsCode".into(),
                operator: FilterOperator::In,
                value: json!(["01", "02"]),
            },
            FilterSpec {
                field: "OITM.frozenFor".into(),
                operator: FilterOperator::IsNull,
                value: Value::Null,
            },
            FilterSpec {
                field: "OITW.OnHand".into(),
                operator: FilterOperator::Gt,
                value: json!(0),
            },
        ];
        let compiled = QueryCompiler::new(SqlDialect::MsSql).compile(&spec).unwrap();
        assert!(compiled
            .sql
            .ends_with("WHERE w.WhsCode IN (@p1, @p2) AND o.frozenFor IS NULL AND w.OnHand > @p3"));
        assert_eq!(compiled.parameters.len(), 3);
        assert_eq!(compiled.parameters[2].name, "p3");
    }

    #[test]
    fn test_rejects_injection_in_identifiers() {
        let mut spec = item_stock_spec();
        spec.main_table = "OITM; DROP TABLE OITM".into();
        assert!(QueryCompiler::new(SqlDialect::Postgres).compile(&spec).is_err());

        let mut spec = item_stock_spec();
        spec.filters[0].field = "1=1 OR OITW.WhsCode".into();
        assert!(QueryCompiler::new(SqlDialect::Postgres).compile(&spec).is_err());

        let mut spec = item_stock_spec();
        spec.filters[0].operator = FilterOperator::In;
        spec.filters[0].value = json!([]);
        assert!(QueryCompiler::new(SqlDialect::Postgres).compile(&spec).is_err());
    }

    #[test]
    fn test_catalog_restricts_tables() {
        let catalog = SchemaCatalog::from_tables(["OITM"]);
        let compiler = QueryCompiler::new(SqlDialect::Postgres).with_catalog(catalog);
        let err = compiler.compile(&item_stock_spec()).unwrap_err();
        assert!(err.to_string().contains("OITW"));
    }

    #[test]
    fn test_raw_mapping_keeps_row_limit() {
        let now = chrono::Utc::now();
        let config = MappingConfig {
            id: uuid::Uuid::new_v4(),
            tenant_id: uuid::Uuid::new_v4(),
            erp_connection_id: uuid::Uuid::new_v4(),
            dataset_type: crate::models::mapping::DatasetType::Items,
            name: "Raw items".into(),
            main_table: "items".into(),
            joins: vec![],
            field_mappings: vec![],
            filters: vec![],
            raw_query: Some("SELECT * FROM items".into()),
            version: 1,
            is_active: true,
            created_by: uuid::Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        };

        let compiled = QueryCompiler::new(SqlDialect::Postgres)
            .compile_mapping(&config, Some(5))
            .unwrap();
        assert_eq!(compiled.sql, "SELECT * FROM (SELECT * FROM items) q LIMIT 5");

        let compiled = QueryCompiler::new(SqlDialect::MsSql)
            .compile_mapping(&config, Some(5))
            .unwrap();
        assert_eq!(compiled.sql, "SELECT TOP 5 * FROM (SELECT * FROM items) q");

        assert!(QueryCompiler::new(SqlDialect::Postgres)
            .compile_mapping(&config, Some(MAX_ROW_LIMIT + 1))
            .is_err());

        let catalog = SchemaCatalog::from_tables(["items"]);
        let err = QueryCompiler::new(SqlDialect::Postgres)
            .with_catalog(catalog)
            .compile_mapping(&config, Some(5))
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_template_query_for_dataset() {
        let query = TemplateQuery {
            dataset_type: crate::models::mapping::DatasetType::Cost,
            table: "OITM".into(),
            where_clause: Some("AvgPrice > 0".into()),
        };
        let compiled = QueryCompiler::new(SqlDialect::MsSql)
            .compile_template(&query, Some(25))
            .unwrap();
        assert_eq!(compiled.sql, "SELECT TOP 25 item_code, cost FROM OITM WHERE AvgPrice > 0");
        assert!(compiled.parameters.is_empty());

        let compiler = QueryCompiler::new(SqlDialect::Postgres).with_catalog(SchemaCatalog::from_tables(["OITW"]));
        assert_eq!(compiler.compile_template(&query, None).unwrap_err().kind(), "validation");

        let injected = TemplateQuery {
            where_clause: Some("1=1; DELETE FROM OITM".into()),
            ..query
        };
        assert!(QueryCompiler::new(SqlDialect::Postgres)
            .compile_template(&injected, None)
            .is_err());
    }

    #[test]
    fn test_duplicate_join_alias_rejected() {
        let spec = QuerySpec {
            main_table: "OITM".into(),
            joins: vec![
                join("OITW", Some("w"), "OITM.ItemCode", "OITW.ItemCode"),
                join("OWHS", Some("W"), "OITW.WhsCode", "OWHS.WhsCode"),
            ],
            columns: vec![],
            filters: vec![],
            limit: None,
        };
        assert!(QueryCompiler::new(SqlDialect::Postgres).compile(&spec).is_err());
    }

    #[test]
    fn test_empty_columns_select_main_star() {
        let spec = QuerySpec {
            main_table: "OITM".into(),
            joins: vec![],
            columns: vec![],
            filters: vec![],
            limit: Some(10),
        };
        let compiled = QueryCompiler::new(SqlDialect::MySql).compile(&spec).unwrap();
        assert_eq!(compiled.sql, "SELECT o.* FROM OITM o LIMIT 10");
    }
}
