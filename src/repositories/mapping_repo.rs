use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{query, PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::middleware::error_handling::{map_unique_violation, AppError, Result};
use crate::models::mapping::{DatasetType, FieldMapping, FilterSpec, JoinSpec, MappingConfig};
use crate::repositories::MappingConfigRepository;

const MAPPING_COLUMNS: &str = "id, tenant_id, erp_connection_id, dataset_type, name, main_table, joins, \
    field_mappings, filters, raw_query, version, is_active, created_by, created_at, updated_at";

const ACTIVE_CONFLICT: &str = "Another mapping is already active for this dataset type";

fn mapping_from_row(row: &PgRow) -> Result<MappingConfig> {
    let dataset_type: String = row.try_get("dataset_type")?;
    let joins: Json<Vec<JoinSpec>> = row.try_get("joins")?;
    let field_mappings: Json<Vec<FieldMapping>> = row.try_get("field_mappings")?;
    let filters: Json<Vec<FilterSpec>> = row.try_get("filters")?;

    Ok(MappingConfig {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        erp_connection_id: row.try_get("erp_connection_id")?,
        dataset_type: dataset_type
            .parse()
            .map_err(|e: String| AppError::Internal(anyhow::anyhow!(e)))?,
        name: row.try_get("name")?,
        main_table: row.try_get("main_table")?,
        joins: joins.0,
        field_mappings: field_mappings.0,
        filters: filters.0,
        raw_query: row.try_get("raw_query")?,
        version: row.try_get("version")?,
        is_active: row.try_get("is_active")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn deactivate_siblings_on(conn: &mut PgConnection, config: &MappingConfig) -> Result<()> {
    query(
        r#"
        UPDATE mapping_configs SET is_active = FALSE, updated_at = NOW()
        WHERE tenant_id = $1 AND dataset_type = $2 AND id <> $3 AND is_active
        "#,
    )
    .bind(config.tenant_id)
    .bind(config.dataset_type.as_str())
    .bind(config.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub struct PgMappingConfigRepository {
    pool: PgPool,
}

impl PgMappingConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MappingConfigRepository for PgMappingConfigRepository {
    async fn create(&self, config: MappingConfig) -> Result<MappingConfig> {
        let mut tx = self.pool.begin().await?;
        if config.is_active {
            deactivate_siblings_on(&mut tx, &config).await?;
        }

        let row = query(&format!(
            r#"
            INSERT INTO mapping_configs ({MAPPING_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {MAPPING_COLUMNS}
            "#
        ))
        .bind(config.id)
        .bind(config.tenant_id)
        .bind(config.erp_connection_id)
        .bind(config.dataset_type.as_str())
        .bind(&config.name)
        .bind(&config.main_table)
        .bind(Json(&config.joins))
        .bind(Json(&config.field_mappings))
        .bind(Json(&config.filters))
        .bind(&config.raw_query)
        .bind(config.version)
        .bind(config.is_active)
        .bind(config.created_by)
        .bind(config.created_at)
        .bind(config.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, ACTIVE_CONFLICT))?;

        tx.commit().await?;
        mapping_from_row(&row)
    }

    async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<MappingConfig>> {
        let row = query(&format!(
            "SELECT {MAPPING_COLUMNS} FROM mapping_configs WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(mapping_from_row).transpose()
    }

    async fn list(&self, tenant_id: Uuid, dataset_type: Option<DatasetType>) -> Result<Vec<MappingConfig>> {
        let rows = query(&format!(
            r#"
            SELECT {MAPPING_COLUMNS} FROM mapping_configs
            WHERE tenant_id = $1 AND ($2::TEXT IS NULL OR dataset_type = $2)
            ORDER BY updated_at DESC
            "#
        ))
        .bind(tenant_id)
        .bind(dataset_type.map(|d| d.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(mapping_from_row).collect()
    }

    async fn update(&self, config: MappingConfig) -> Result<MappingConfig> {
        let mut tx = self.pool.begin().await?;
        if config.is_active {
            deactivate_siblings_on(&mut tx, &config).await?;
        }

        let row = query(&format!(
            r#"
            UPDATE mapping_configs
            SET name = $1, main_table = $2, joins = $3, field_mappings = $4, filters = $5,
                raw_query = $6, version = $7, is_active = $8, updated_at = $9
            WHERE id = $10 AND tenant_id = $11
            RETURNING {MAPPING_COLUMNS}
            "#
        ))
        .bind(&config.name)
        .bind(&config.main_table)
        .bind(Json(&config.joins))
        .bind(Json(&config.field_mappings))
        .bind(Json(&config.filters))
        .bind(&config.raw_query)
        .bind(config.version)
        .bind(config.is_active)
        .bind(config.updated_at)
        .bind(config.id)
        .bind(config.tenant_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, ACTIVE_CONFLICT))?
        .ok_or_else(|| AppError::NotFound(format!("Mapping config {} not found", config.id)))?;

        tx.commit().await?;
        mapping_from_row(&row)
    }

    async fn set_active(&self, tenant_id: Uuid, id: Uuid, active: bool) -> Result<MappingConfig> {
        let mut tx = self.pool.begin().await?;

        let row = query(&format!(
            "SELECT {MAPPING_COLUMNS} FROM mapping_configs WHERE id = $1 AND tenant_id = $2 FOR UPDATE"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Mapping config {} not found", id)))?;
        let config = mapping_from_row(&row)?;

        if active {
            deactivate_siblings_on(&mut tx, &config).await?;
        }

        let row = query(&format!(
            "UPDATE mapping_configs SET is_active = $1, updated_at = NOW() WHERE id = $2 RETURNING {MAPPING_COLUMNS}"
        ))
        .bind(active)
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, ACTIVE_CONFLICT))?;

        tx.commit().await?;
        mapping_from_row(&row)
    }

    async fn find_active(&self, tenant_id: Uuid, dataset_type: DatasetType) -> Result<Option<MappingConfig>> {
        let row = query(&format!(
            "SELECT {MAPPING_COLUMNS} FROM mapping_configs WHERE tenant_id = $1 AND dataset_type = $2 AND is_active"
        ))
        .bind(tenant_id)
        .bind(dataset_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(mapping_from_row).transpose()
    }
}
