use std::env;
use anyhow::{Context, Result};
use uuid::Uuid;

use crate::services::query::{SqlDialect, MAX_ROW_LIMIT};

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: String,
    /// Takes precedence over the individual fields when set.
    pub url: Option<String>,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        let url = env::var("DATABASE_URL").ok();
        let password = match url {
            Some(_) => env::var("DATABASE_PASSWORD").unwrap_or_default(),
            None => env::var("DATABASE_PASSWORD").context("DATABASE_URL or DATABASE_PASSWORD must be set")?,
        };

        Ok(Self {
            host: env::var("DATABASE_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: env::var("DATABASE_PORT")
                .unwrap_or_else(|_| "5432".to_string())
                .parse()?,
            username: env::var("DATABASE_USER").unwrap_or_else(|_| "postgres".to_string()),
            password,
            database: env::var("DATABASE_NAME").unwrap_or_else(|_| "stocktake".to_string()),
            ssl_mode: env::var("DATABASE_SSL_MODE").unwrap_or_else(|_| "prefer".to_string()),
            url,
        })
    }

    pub fn connection_string(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "postgres://{}:{}@{}:{}/{}?sslmode={}",
                self.username, self.password, self.host, self.port, self.database, self.ssl_mode
            ),
        }
    }
}

/// A connector registered at startup from the environment.
#[derive(Debug, Clone)]
pub struct ErpConnectionSettings {
    pub id: Uuid,
    pub url: String,
    pub dialect: SqlDialect,
}

#[derive(Debug, Clone)]
pub struct ErpConfig {
    pub default_connection: Option<ErpConnectionSettings>,
    /// Enables the deprecated direct-query fallback of the loader.
    pub legacy_items_table: Option<String>,
    pub default_row_limit: u32,
}

impl ErpConfig {
    pub fn from_env() -> Result<Self> {
        let default_connection = match (env::var("ERP_CONNECTION_ID"), env::var("ERP_DATABASE_URL")) {
            (Ok(id), Ok(url)) => Some(ErpConnectionSettings {
                id: id.parse().context("ERP_CONNECTION_ID must be a UUID")?,
                url,
                dialect: env::var("ERP_DIALECT")
                    .unwrap_or_else(|_| "postgres".to_string())
                    .parse()
                    .map_err(|e: String| anyhow::anyhow!(e))?,
            }),
            _ => None,
        };

        let default_row_limit = env::var("ERP_DEFAULT_ROW_LIMIT")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(5000)
            .min(MAX_ROW_LIMIT);

        Ok(Self {
            default_connection,
            legacy_items_table: env::var("ERP_LEGACY_ITEMS_TABLE").ok().filter(|t| !t.trim().is_empty()),
            default_row_limit,
        })
    }
}

impl Default for ErpConfig {
    fn default() -> Self {
        Self {
            default_connection: None,
            legacy_items_table: None,
            default_row_limit: 5000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: Option<DatabaseConfig>,
    pub jwt_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub erp: ErpConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            database: Some(DatabaseConfig::from_env()?),
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            cors_origins,
            erp: ErpConfig::from_env()?,
        })
    }

    /// Configuration without a database, for in-memory runs and tests.
    pub fn in_memory(jwt_secret: &str) -> Self {
        Self {
            database: None,
            jwt_secret: jwt_secret.to_string(),
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            cors_origins: Vec::new(),
            erp: ErpConfig::default(),
        }
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
