//! Identifier and fragment validation.
//!
//! Values always travel as bound parameters; these checks only guard the
//! identifiers and the few raw fragments that must be spliced into SQL.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::middleware::error_handling::{AppError, Result};

static IDENTIFIER_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

static DESTRUCTIVE_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|TRUNCATE|CREATE|GRANT|REVOKE|EXEC|EXECUTE|MERGE|CALL|ATTACH|DETACH)\b",
    )
    .unwrap()
});

/// Accepts a bare table name matching `^[A-Za-z0-9_]+$`.
pub fn validate_table_name(name: &str) -> Result<()> {
    if IDENTIFIER_SEGMENT.is_match(name) {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!("Invalid table name: {}", name)))
    }
}

/// Accepts `table` or `schema.table`.
pub fn validate_table_reference(reference: &str) -> Result<()> {
    let segments: Vec<&str> = reference.split('.').collect();
    if segments.len() > 2 || segments.iter().any(|s| !IDENTIFIER_SEGMENT.is_match(s)) {
        return Err(AppError::InvalidInput(format!("Invalid table reference: {}", reference)));
    }
    Ok(())
}

/// Accepts `column`, `table.column` or `schema.table.column`. With
/// `allow_star`, the last segment may also be `*`.
pub fn validate_column_reference(reference: &str, allow_star: bool) -> Result<()> {
    let segments: Vec<&str> = reference.split('.').collect();
    let last = segments.len() - 1;
    let valid = segments.len() <= 3
        && segments.iter().enumerate().all(|(i, s)| {
            IDENTIFIER_SEGMENT.is_match(s) || (allow_star && i == last && *s == "*")
        });

    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!("Invalid column reference: {}", reference)))
    }
}

/// Accepts an output alias such as `itemCode`.
pub fn validate_alias(alias: &str) -> Result<()> {
    if IDENTIFIER_SEGMENT.is_match(alias) {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!("Invalid alias: {}", alias)))
    }
}

fn destructive_keyword(fragment: &str) -> Option<String> {
    DESTRUCTIVE_KEYWORD
        .find(fragment)
        .map(|m| m.as_str().to_ascii_uppercase())
}

/// Rejects WHERE fragments containing a statement separator, a comment
/// opener or a destructive keyword.
pub fn validate_where_fragment(fragment: &str) -> Result<()> {
    if fragment.contains(';') {
        return Err(AppError::InvalidInput(
            "WHERE clause must not contain a statement separator".to_string(),
        ));
    }
    if fragment.contains("--") || fragment.contains("/*") {
        return Err(AppError::InvalidInput("WHERE clause must not contain comments".to_string()));
    }
    if let Some(keyword) = destructive_keyword(fragment) {
        return Err(AppError::InvalidInput(format!("Forbidden SQL keyword in WHERE clause: {}", keyword)));
    }
    Ok(())
}

/// Validates a hand-written override query: a single `SELECT` (or `WITH`)
/// statement. Returns the statement without its optional trailing `;`.
pub fn validate_select_statement(sql: &str) -> Result<String> {
    let trimmed = sql.trim();
    let statement = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();

    if statement.is_empty() {
        return Err(AppError::InvalidInput("Query is empty".to_string()));
    }

    let upper = statement.to_ascii_uppercase();
    if !(upper.starts_with("SELECT") || upper.starts_with("WITH")) {
        return Err(AppError::InvalidInput("Only SELECT queries are allowed".to_string()));
    }
    if statement.contains(';') {
        return Err(AppError::InvalidInput("Multiple statements are not allowed".to_string()));
    }
    if let Some(keyword) = destructive_keyword(statement) {
        return Err(AppError::InvalidInput(format!("Forbidden SQL operation: {}", keyword)));
    }

    Ok(statement.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        assert!(validate_table_name("OITM").is_ok());
        assert!(validate_table_name("stock_2024").is_ok());
        assert!(validate_table_name("dbo.OITM").is_err());
        assert!(validate_table_name("OITM; DROP TABLE x").is_err());
        assert!(validate_table_name("").is_err());
    }

    #[test]
    fn test_table_reference_allows_schema() {
        assert!(validate_table_reference("dbo.OITM").is_ok());
        assert!(validate_table_reference("a.b.c").is_err());
        assert!(validate_table_reference("dbo.").is_err());
    }

    #[test]
    fn test_column_reference() {
        assert!(validate_column_reference("ItemCode", false).is_ok());
        assert!(validate_column_reference("dbo.OITM.ItemCode", false).is_ok());
        assert!(validate_column_reference("OITM.*", true).is_ok());
        assert!(validate_column_reference("OITM.*", false).is_err());
        assert!(validate_column_reference("SUM(OnHand)", false).is_err());
    }

    #[test]
    fn test_where_fragment_rejections() {
        assert!(validate_where_fragment("OnHand > 0 AND frozenFor = 'N'").is_ok());
        assert!(validate_where_fragment("1=1; DROP TABLE OITM").is_err());
        assert!(validate_where_fragment("1=1 OR delete_flag = 1").is_ok());
        assert!(validate_where_fragment("x IN (SELECT 1) UNION DELETE").is_err());
        assert!(validate_where_fragment("a = 1 -- comment").is_err());
    }

    #[test]
    fn test_select_statement() {
        assert_eq!(
            validate_select_statement("SELECT * FROM OITM;").unwrap(),
            "SELECT * FROM OITM"
        );
        assert!(validate_select_statement("WITH s AS (SELECT 1) SELECT * FROM s").is_ok());
        assert!(validate_select_statement("UPDATE OITM SET OnHand = 0").is_err());
        assert!(validate_select_statement("SELECT 1; SELECT 2").is_err());
        assert!(validate_select_statement("SELECT * FROM t WHERE x = 1 DROP TABLE t").is_err());
    }
}
