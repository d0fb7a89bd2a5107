// ERP Connection Service
// Connection testing, schema catalog introspection and query preview

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::middleware::error_handling::{AppError, Result};
use crate::repositories::MappingConfigRepository;
use crate::services::erp::connector::{
    run_query, test_connection as check_connection, ConnectionTestResult, ConnectorProvider, ErpRow,
};
use crate::services::query::{CompiledQuery, QueryCompiler, QuerySpec, SchemaCatalog, TemplateQuery};

/// Rows returned by a preview unless the request asks for fewer.
pub const PREVIEW_ROW_LIMIT: u32 = 100;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PreviewRequest {
    /// Required for ad-hoc specs; defaults to the mapping's connection.
    #[serde(default)]
    pub erp_connection_id: Option<Uuid>,
    #[serde(default)]
    pub mapping_id: Option<Uuid>,
    #[serde(default)]
    pub spec: Option<QuerySpec>,
    /// Fixed dataset template over a named table.
    #[serde(default)]
    pub template: Option<TemplateQuery>,
    #[serde(default)]
    pub limit: Option<u32>,
    /// Restricts tables to those found by catalog introspection.
    #[serde(default)]
    pub use_catalog: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryPreview {
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<ErpRow>,
    pub row_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogSnapshot {
    pub erp_connection_id: Uuid,
    pub table_count: usize,
    pub tables: Vec<String>,
}

pub struct ErpConnectionService {
    mappings: Arc<dyn MappingConfigRepository>,
    connectors: Arc<dyn ConnectorProvider>,
}

impl ErpConnectionService {
    pub fn new(mappings: Arc<dyn MappingConfigRepository>, connectors: Arc<dyn ConnectorProvider>) -> Self {
        Self { mappings, connectors }
    }

    pub async fn test_connection(&self, tenant_id: Uuid, connection_id: Uuid) -> Result<ConnectionTestResult> {
        let connector = self.connectors.connector(tenant_id, connection_id).await?;
        let result = check_connection(connector).await;

        if result.success {
            tracing::info!("ERP connection {} test succeeded", connection_id);
        } else {
            tracing::warn!("ERP connection {} test failed: {}", connection_id, result.message);
        }
        Ok(result)
    }

    /// Known tables of the ERP database, read through the connector.
    pub async fn fetch_catalog(&self, tenant_id: Uuid, connection_id: Uuid) -> Result<SchemaCatalog> {
        let connector = self.connectors.connector(tenant_id, connection_id).await?;
        let sql = SchemaCatalog::introspection_sql(connector.dialect());
        let rows = run_query(connector, sql, &[]).await?;

        let catalog = SchemaCatalog::from_rows(&rows);
        tracing::debug!("Introspected {} tables on ERP connection {}", catalog.len(), connection_id);
        Ok(catalog)
    }

    pub async fn catalog_snapshot(&self, tenant_id: Uuid, connection_id: Uuid) -> Result<CatalogSnapshot> {
        let catalog = self.fetch_catalog(tenant_id, connection_id).await?;
        let tables: Vec<String> = catalog.tables().map(str::to_string).collect();
        Ok(CatalogSnapshot {
            erp_connection_id: connection_id,
            table_count: tables.len(),
            tables,
        })
    }

    /// Compiles a stored mapping, an ad-hoc spec or a dataset template and
    /// runs it with a capped row limit.
    pub async fn preview(&self, tenant_id: Uuid, request: PreviewRequest) -> Result<QueryPreview> {
        let limit = Some(request.limit.unwrap_or(PREVIEW_ROW_LIMIT).min(PREVIEW_ROW_LIMIT));

        let mapping = match request.mapping_id {
            Some(id) => Some(
                self.mappings
                    .get(tenant_id, id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Mapping config {} not found", id)))?,
            ),
            None => None,
        };

        let connection_id = request
            .erp_connection_id
            .or_else(|| mapping.as_ref().map(|m| m.erp_connection_id))
            .ok_or_else(|| AppError::InvalidInput("erp_connection_id is required for ad-hoc previews".to_string()))?;

        let connector = self.connectors.connector(tenant_id, connection_id).await?;
        let mut compiler = QueryCompiler::new(connector.dialect());
        if request.use_catalog {
            compiler = compiler.with_catalog(self.fetch_catalog(tenant_id, connection_id).await?);
        }

        let compiled: CompiledQuery = match (&mapping, request.spec, request.template) {
            (Some(mapping), _, _) => compiler.compile_mapping(mapping, limit)?,
            (None, Some(spec), _) => compiler.compile(&QuerySpec { limit, ..spec })?,
            (None, None, Some(template)) => compiler.compile_template(&template, limit)?,
            (None, None, None) => {
                return Err(AppError::InvalidInput(
                    "One of mapping_id, spec or template is required".to_string(),
                ));
            }
        };

        let mut rows = run_query(connector, &compiled.sql, &compiled.values()).await?;
        if let Some(limit) = limit {
            rows.truncate(limit as usize);
        }

        let columns = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();

        Ok(QueryPreview {
            sql: compiled.sql,
            columns,
            row_count: rows.len(),
            rows,
        })
    }
}
