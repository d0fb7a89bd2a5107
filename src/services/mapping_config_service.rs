use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::middleware::error_handling::{AppError, Result};
use crate::models::mapping::{CreateMappingRequest, DatasetType, MappingConfig, UpdateMappingRequest};
use crate::repositories::MappingConfigRepository;
use crate::services::erp::ConnectorProvider;
use crate::services::query::QueryCompiler;
use crate::utils::log_sanitizer::sanitize_for_log;

pub struct MappingConfigService {
    mappings: Arc<dyn MappingConfigRepository>,
    connectors: Arc<dyn ConnectorProvider>,
}

impl MappingConfigService {
    pub fn new(mappings: Arc<dyn MappingConfigRepository>, connectors: Arc<dyn ConnectorProvider>) -> Self {
        Self { mappings, connectors }
    }

    /// A mapping is stored only when it compiles for its connection's
    /// dialect.
    async fn ensure_compiles(&self, config: &MappingConfig) -> Result<()> {
        if config.field_mappings.iter().any(|m| m.target.trim().is_empty()) {
            return Err(AppError::InvalidInput("Field mapping target must not be empty".to_string()));
        }

        let connector = self.connectors.connector(config.tenant_id, config.erp_connection_id).await?;
        QueryCompiler::new(connector.dialect()).compile_mapping(config, None)?;
        Ok(())
    }

    pub async fn create(&self, tenant_id: Uuid, request: CreateMappingRequest, actor: Uuid) -> Result<MappingConfig> {
        request.validate()?;

        let now = Utc::now();
        let config = MappingConfig {
            id: Uuid::new_v4(),
            tenant_id,
            erp_connection_id: request.erp_connection_id,
            dataset_type: request.dataset_type,
            name: request.name,
            main_table: request.main_table,
            joins: request.joins,
            field_mappings: request.field_mappings,
            filters: request.filters,
            raw_query: request.raw_query.filter(|q| !q.trim().is_empty()),
            version: 1,
            is_active: request.is_active,
            created_by: actor,
            created_at: now,
            updated_at: now,
        };
        self.ensure_compiles(&config).await?;

        let created = self.mappings.create(config).await?;
        tracing::info!(
            "Created {} mapping '{}' ({}), active: {}",
            created.dataset_type,
            sanitize_for_log(&created.name),
            created.id,
            created.is_active
        );
        Ok(created)
    }

    pub async fn list(&self, tenant_id: Uuid, dataset_type: Option<DatasetType>) -> Result<Vec<MappingConfig>> {
        self.mappings.list(tenant_id, dataset_type).await
    }

    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<MappingConfig> {
        self.mappings
            .get(tenant_id, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Mapping config {} not found", id)))
    }

    /// Applies the changed fields and bumps the mapping's version.
    pub async fn update(&self, tenant_id: Uuid, id: Uuid, request: UpdateMappingRequest) -> Result<MappingConfig> {
        request.validate()?;
        let mut config = self.get(tenant_id, id).await?;

        if let Some(name) = request.name {
            config.name = name;
        }
        if let Some(main_table) = request.main_table {
            config.main_table = main_table;
        }
        if let Some(joins) = request.joins {
            config.joins = joins;
        }
        if let Some(field_mappings) = request.field_mappings {
            if field_mappings.is_empty() {
                return Err(AppError::InvalidInput("At least one field mapping required".to_string()));
            }
            config.field_mappings = field_mappings;
        }
        if let Some(filters) = request.filters {
            config.filters = filters;
        }
        if let Some(raw_query) = request.raw_query {
            config.raw_query = raw_query.filter(|q| !q.trim().is_empty());
        }

        config.version += 1;
        config.updated_at = Utc::now();
        self.ensure_compiles(&config).await?;

        let updated = self.mappings.update(config).await?;
        tracing::info!("Updated mapping {} to version {}", updated.id, updated.version);
        Ok(updated)
    }

    /// Activates the mapping; the previously active sibling of the same
    /// dataset type is deactivated.
    pub async fn activate(&self, tenant_id: Uuid, id: Uuid) -> Result<MappingConfig> {
        let config = self.mappings.set_active(tenant_id, id, true).await?;
        tracing::info!("Activated {} mapping {}", config.dataset_type, config.id);
        Ok(config)
    }

    pub async fn deactivate(&self, tenant_id: Uuid, id: Uuid) -> Result<MappingConfig> {
        let config = self.mappings.set_active(tenant_id, id, false).await?;
        tracing::info!("Deactivated {} mapping {}", config.dataset_type, config.id);
        Ok(config)
    }
}
