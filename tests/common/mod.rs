#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use stocktake::config::AppConfig;
use stocktake::middleware::error_handling::{AppError, Result};
use stocktake::models::mapping::{CreateMappingRequest, DatasetType, FieldMapping};
use stocktake::services::erp::{ConnectionRegistry, ErpConnector, ErpRow};
use stocktake::services::query::SqlDialect;
use stocktake::AppState;

pub const JWT_SECRET: &str = "integration-test-secret";

/// Connector answering queries from a script of `(sql fragment, rows)`
/// pairs. Writes are recorded; a write whose parameters mention one of
/// `failing_codes` is rejected.
#[derive(Default)]
pub struct ScriptedConnector {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub fail_connect: bool,
    script: Mutex<Vec<(String, Vec<ErpRow>)>>,
    failing_codes: Mutex<Vec<String>>,
    pub executed: Mutex<Vec<(String, Vec<Value>)>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        Self {
            fail_connect: true,
            ..Default::default()
        }
    }

    pub fn answer(self, fragment: &str, rows: Vec<Value>) -> Self {
        let rows = rows
            .into_iter()
            .filter_map(|row| row.as_object().cloned())
            .collect();
        self.script
            .lock()
            .expect("script lock")
            .push((fragment.to_string(), rows));
        self
    }

    pub fn fail_writes_for(self, item_code: &str) -> Self {
        self.failing_codes
            .lock()
            .expect("failing codes lock")
            .push(item_code.to_string());
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.executed.lock().expect("executed lock").clone()
    }
}

#[async_trait]
impl ErpConnector for ScriptedConnector {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(AppError::ExternalSystem("connection refused".to_string()));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute_query(&self, sql: &str, params: &[Value]) -> Result<Vec<ErpRow>> {
        self.executed
            .lock()
            .expect("executed lock")
            .push((sql.to_string(), params.to_vec()));

        if sql.starts_with("UPDATE") {
            let failing = self.failing_codes.lock().expect("failing codes lock");
            if params
                .iter()
                .any(|p| p.as_str().map_or(false, |code| failing.iter().any(|f| f == code)))
            {
                return Err(AppError::ExternalSystem("lock timeout on item row".to_string()));
            }
            return Ok(Vec::new());
        }

        let script = self.script.lock().expect("script lock");
        Ok(script
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn test_connection(&self) -> Result<bool> {
        Ok(true)
    }
}

pub struct TestApp {
    pub state: AppState,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub connection_id: Uuid,
    pub connector: Arc<ScriptedConnector>,
}

impl TestApp {
    pub fn new(connector: ScriptedConnector) -> Self {
        Self::with_config(connector, AppConfig::in_memory(JWT_SECRET))
    }

    pub fn with_config(connector: ScriptedConnector, config: AppConfig) -> Self {
        let connection_id = Uuid::new_v4();
        let connector = Arc::new(connector);
        let registry = ConnectionRegistry::new();
        registry.register_shared(connection_id, connector.clone());

        Self {
            state: AppState::in_memory(config, Arc::new(registry)),
            tenant_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            connection_id,
            connector,
        }
    }

    pub fn mapping_request(&self, dataset_type: DatasetType, table: &str, fields: &[(&str, &str)]) -> CreateMappingRequest {
        CreateMappingRequest {
            erp_connection_id: self.connection_id,
            dataset_type,
            name: format!("{} from {}", dataset_type, table),
            main_table: table.to_string(),
            joins: Vec::new(),
            field_mappings: fields
                .iter()
                .map(|(source, target)| FieldMapping {
                    source: source.to_string(),
                    target: target.to_string(),
                    data_type: Default::default(),
                    transform: None,
                })
                .collect(),
            filters: Vec::new(),
            raw_query: None,
            is_active: true,
        }
    }

    /// Active ITEMS mapping on `items` and STOCK mapping on `stock`.
    pub async fn configure_items_and_stock(&self) {
        let service = self.state.mapping_service();
        service
            .create(
                self.tenant_id,
                self.mapping_request(
                    DatasetType::Items,
                    "items",
                    &[("ItemCode", "itemCode"), ("ItemName", "itemName"), ("Uom", "uom")],
                ),
                self.user_id,
            )
            .await
            .expect("items mapping");
        service
            .create(
                self.tenant_id,
                self.mapping_request(DatasetType::Stock, "stock", &[("ItemCode", "itemCode"), ("OnHand", "systemQty")]),
                self.user_id,
            )
            .await
            .expect("stock mapping");
    }
}

pub fn item_row(code: &str, name: &str) -> Value {
    json!({ "itemCode": code, "itemName": name, "uom": "EA" })
}

pub fn stock_row(code: &str, qty: i64) -> Value {
    json!({ "itemCode": code, "systemQty": qty })
}
