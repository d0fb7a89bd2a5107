//! ERP connector contract and the registry that resolves connection ids to
//! connector instances.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, PgConnection, Postgres, Row};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::middleware::error_handling::{AppError, Result};
use crate::middleware::metrics;
use crate::services::query::SqlDialect;

/// One result row keyed by column name.
pub type ErpRow = serde_json::Map<String, Value>;

/// Driver for one external ERP database. Implementations hold at most one
/// open session between `connect` and `disconnect`.
#[async_trait]
pub trait ErpConnector: Send + Sync {
    fn dialect(&self) -> SqlDialect;

    async fn connect(&self) -> Result<()>;

    /// Releases the session. Calling it without an open session is a no-op.
    async fn disconnect(&self) -> Result<()>;

    async fn execute_query(&self, sql: &str, params: &[Value]) -> Result<Vec<ErpRow>>;

    async fn test_connection(&self) -> Result<bool>;
}

/// Resolves an ERP connection id to a fresh connector.
#[async_trait]
pub trait ConnectorProvider: Send + Sync {
    async fn connector(&self, tenant_id: Uuid, connection_id: Uuid) -> Result<Arc<dyn ErpConnector>>;
}

type ConnectorFactory = Arc<dyn Fn() -> Arc<dyn ErpConnector> + Send + Sync>;

/// Connection ids registered at startup (or by tests).
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    factories: Arc<DashMap<Uuid, ConnectorFactory>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each lookup builds a new connector, so concurrent requests never
    /// share a session.
    pub fn register<F>(&self, connection_id: Uuid, factory: F)
    where
        F: Fn() -> Arc<dyn ErpConnector> + Send + Sync + 'static,
    {
        self.factories.insert(connection_id, Arc::new(factory));
    }

    /// Every lookup returns the same instance.
    pub fn register_shared(&self, connection_id: Uuid, connector: Arc<dyn ErpConnector>) {
        self.register(connection_id, move || connector.clone());
    }

    pub fn register_postgres(&self, connection_id: Uuid, url: String) {
        self.register(connection_id, move || Arc::new(PgErpConnector::new(url.clone())) as Arc<dyn ErpConnector>);
    }

    pub fn contains(&self, connection_id: Uuid) -> bool {
        self.factories.contains_key(&connection_id)
    }
}

#[async_trait]
impl ConnectorProvider for ConnectionRegistry {
    async fn connector(&self, _tenant_id: Uuid, connection_id: Uuid) -> Result<Arc<dyn ErpConnector>> {
        let factory = self
            .factories
            .get(&connection_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("ERP connection {} not found", connection_id)))?;
        Ok(factory())
    }
}

/// Runs `work` inside a connect/disconnect pair. The session is released on
/// every exit path, including a failed `connect` and errors from `work`.
pub async fn with_session<T, F, Fut>(connector: Arc<dyn ErpConnector>, work: F) -> Result<T>
where
    F: FnOnce(Arc<dyn ErpConnector>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let result = match connector.connect().await {
        Ok(()) => work(connector.clone()).await,
        Err(e) => Err(e),
    };

    if let Err(e) = connector.disconnect().await {
        tracing::warn!("Failed to release ERP session: {}", e);
    }

    result
}

/// Executes one query in its own session and records the outcome metric.
pub async fn run_query(connector: Arc<dyn ErpConnector>, sql: &str, params: &[Value]) -> Result<Vec<ErpRow>> {
    let result = with_session(connector, |c| async move { c.execute_query(sql, params).await }).await;
    metrics::record_erp_query(result.is_ok());
    result
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    pub message: String,
}

pub async fn test_connection(connector: Arc<dyn ErpConnector>) -> ConnectionTestResult {
    match with_session(connector, |c| async move { c.test_connection().await }).await {
        Ok(true) => ConnectionTestResult {
            success: true,
            message: "Successfully connected to ERP database".to_string(),
        },
        Ok(false) => ConnectionTestResult {
            success: false,
            message: "Connection failed - ERP database did not answer the test query".to_string(),
        },
        Err(e) => ConnectionTestResult {
            success: false,
            message: format!("Connection test failed: {}", e),
        },
    }
}

/// Connector for ERPs backed by PostgreSQL.
pub struct PgErpConnector {
    url: String,
    session: Mutex<Option<PgConnection>>,
}

impl PgErpConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            session: Mutex::new(None),
        }
    }
}

/// Quantity as a bindable JSON value: integral amounts bind as BIGINT, the
/// rest as their exact decimal text. Pair with `SqlDialect::decimal_placeholder`.
pub fn decimal_param(value: Decimal) -> Value {
    if value.fract().is_zero() {
        if let Some(i) = value.to_i64() {
            return Value::from(i);
        }
    }
    Value::String(value.normalize().to_string())
}

fn bind_value<'q>(query: Query<'q, Postgres, PgArguments>, value: &Value) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => query.bind(i),
            (None, Some(f)) => query.bind(f),
            _ => query.bind(n.to_string()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

fn row_to_json(row: &PgRow) -> ErpRow {
    let mut json_row = serde_json::Map::new();
    for column in row.columns() {
        let index = column.ordinal();
        let value = if let Ok(v) = row.try_get::<Option<String>, _>(index) {
            v.map(Value::String)
        } else if let Ok(v) = row.try_get::<Option<i32>, _>(index) {
            v.map(|n| Value::Number(n.into()))
        } else if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
            v.map(|n| Value::Number(n.into()))
        } else if let Ok(v) = row.try_get::<Option<Decimal>, _>(index) {
            v.map(|d| Value::String(d.normalize().to_string()))
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
            v.and_then(serde_json::Number::from_f64).map(Value::Number)
        } else if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
            v.map(Value::Bool)
        } else if let Ok(v) = row.try_get::<Option<Uuid>, _>(index) {
            v.map(|u| Value::String(u.to_string()))
        } else {
            None
        };

        json_row.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }
    json_row
}

#[async_trait]
impl ErpConnector for PgErpConnector {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    async fn connect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.is_none() {
            let conn = PgConnection::connect(&self.url)
                .await
                .map_err(|e| AppError::ExternalSystem(format!("Failed to connect to ERP database: {}", e)))?;
            *session = Some(conn);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(conn) = self.session.lock().await.take() {
            conn.close()
                .await
                .map_err(|e| AppError::ExternalSystem(format!("Failed to close ERP connection: {}", e)))?;
        }
        Ok(())
    }

    async fn execute_query(&self, sql: &str, params: &[Value]) -> Result<Vec<ErpRow>> {
        let mut session = self.session.lock().await;
        let conn = session
            .as_mut()
            .ok_or_else(|| AppError::ExternalSystem("ERP connection is not open".to_string()))?;

        let query = params.iter().fold(sqlx::query(sql), bind_value);
        let rows = query
            .fetch_all(conn)
            .await
            .map_err(|e| AppError::ExternalSystem(format!("ERP query failed: {}", e)))?;

        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn test_connection(&self) -> Result<bool> {
        Ok(self.execute_query("SELECT 1 AS ok", &[]).await.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingConnector {
        connects: AtomicUsize,
        disconnects: AtomicUsize,
        fail_connect: bool,
    }

    #[async_trait]
    impl ErpConnector for CountingConnector {
        fn dialect(&self) -> SqlDialect {
            SqlDialect::MsSql
        }

        async fn connect(&self) -> Result<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect {
                return Err(AppError::ExternalSystem("refused".into()));
            }
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn execute_query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<ErpRow>> {
            Err(AppError::ExternalSystem("query failed".into()))
        }

        async fn test_connection(&self) -> Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_session_released_after_query_error() {
        let connector = Arc::new(CountingConnector::default());
        let result = run_query(connector.clone(), "SELECT 1", &[]).await;
        assert!(result.is_err());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(connector.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_session_released_after_connect_error() {
        let connector = Arc::new(CountingConnector {
            fail_connect: true,
            ..Default::default()
        });
        let outcome = test_connection(connector.clone()).await;
        assert!(!outcome.success);
        assert_eq!(connector.disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_decimal_param() {
        use rust_decimal_macros::dec;
        assert_eq!(decimal_param(dec!(15)), serde_json::json!(15));
        assert_eq!(decimal_param(dec!(15.000)), serde_json::json!(15));
        assert_eq!(decimal_param(dec!(2.50)), serde_json::json!("2.5"));
        assert_eq!(
            decimal_param(dec!(0.1000000000000000000000000001)),
            serde_json::json!("0.1000000000000000000000000001")
        );
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let registry = ConnectionRegistry::new();
        let id = Uuid::new_v4();
        registry.register_shared(id, Arc::new(CountingConnector::default()));

        let connector = registry.connector(Uuid::new_v4(), id).await.unwrap();
        assert_eq!(connector.dialect(), SqlDialect::MsSql);

        let err = registry.connector(Uuid::new_v4(), Uuid::new_v4()).await.err().unwrap();
        assert_eq!(err.kind(), "not_found");
    }
}
