use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target SQL flavour of an ERP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlDialect {
    #[default]
    Postgres,
    MySql,
    MsSql,
}

impl SqlDialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlDialect::Postgres => "postgres",
            SqlDialect::MySql => "mysql",
            SqlDialect::MsSql => "mssql",
        }
    }

    /// Bind placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${}", index),
            SqlDialect::MySql => "?".to_string(),
            SqlDialect::MsSql => format!("@p{}", index),
        }
    }

    /// Placeholder for a quantity bound as exact decimal text or an integer,
    /// converted server-side to a decimal type.
    pub fn decimal_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("CAST({} AS NUMERIC)", self.placeholder(index)),
            SqlDialect::MySql | SqlDialect::MsSql => format!("CAST({} AS DECIMAL(38, 10))", self.placeholder(index)),
        }
    }

    /// Wraps a complete SELECT so at most `limit` of its rows come back.
    pub fn limit_statement(&self, statement: &str, limit: Option<u32>) -> String {
        let statement = statement.trim().trim_end_matches(';').trim_end();
        match limit {
            Some(_) => format!(
                "SELECT {}* FROM ({}) q{}",
                self.top_clause(limit),
                statement,
                self.limit_clause(limit)
            ),
            None => statement.to_string(),
        }
    }

    /// Quotes an output column alias.
    pub fn quote_alias(&self, alias: &str) -> String {
        match self {
            SqlDialect::Postgres => format!("\"{}\"", alias),
            SqlDialect::MySql => format!("`{}`", alias),
            SqlDialect::MsSql => format!("[{}]", alias),
        }
    }

    /// Row-limit fragment placed right after `SELECT ` (MSSQL only).
    pub fn top_clause(&self, limit: Option<u32>) -> String {
        match (self, limit) {
            (SqlDialect::MsSql, Some(n)) => format!("TOP {} ", n),
            _ => String::new(),
        }
    }

    /// Row-limit fragment appended to the statement (all but MSSQL).
    pub fn limit_clause(&self, limit: Option<u32>) -> String {
        match (self, limit) {
            (SqlDialect::MsSql, _) | (_, None) => String::new(),
            (_, Some(n)) => format!(" LIMIT {}", n),
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SqlDialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(SqlDialect::Postgres),
            "mysql" | "mariadb" => Ok(SqlDialect::MySql),
            "mssql" | "sqlserver" | "tsql" => Ok(SqlDialect::MsSql),
            other => Err(format!("Unsupported SQL dialect: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_one_limit_form_per_dialect() {
        for dialect in [SqlDialect::Postgres, SqlDialect::MySql, SqlDialect::MsSql] {
            let top = dialect.top_clause(Some(50));
            let limit = dialect.limit_clause(Some(50));
            assert!(top.is_empty() ^ limit.is_empty(), "{} emitted both or neither", dialect);
        }
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(SqlDialect::Postgres.placeholder(3), "$3");
        assert_eq!(SqlDialect::MySql.placeholder(3), "?");
        assert_eq!(SqlDialect::MsSql.placeholder(3), "@p3");
    }

    #[test]
    fn test_limit_statement_wraps_raw_select() {
        let raw = "SELECT ItemCode, OnHand FROM OITW WHERE WhsCode = '01';";
        assert_eq!(
            SqlDialect::Postgres.limit_statement(raw, Some(5)),
            "SELECT * FROM (SELECT ItemCode, OnHand FROM OITW WHERE WhsCode = '01') q LIMIT 5"
        );
        assert_eq!(
            SqlDialect::MsSql.limit_statement(raw, Some(5)),
            "SELECT TOP 5 * FROM (SELECT ItemCode, OnHand FROM OITW WHERE WhsCode = '01') q"
        );
        assert_eq!(
            SqlDialect::MySql.limit_statement(raw, None),
            "SELECT ItemCode, OnHand FROM OITW WHERE WhsCode = '01'"
        );
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("SQLServer".parse::<SqlDialect>().unwrap(), SqlDialect::MsSql);
        assert!("oracle".parse::<SqlDialect>().is_err());
    }
}
