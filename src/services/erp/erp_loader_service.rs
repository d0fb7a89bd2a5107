// ERP Loader Service
// Executes compiled mapping queries, transforms and de-duplicates the rows,
// and upserts them into the current version of a count.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ErpConfig;
use crate::middleware::error_handling::{AppError, Result};
use crate::middleware::metrics;
use crate::models::count::{CountItem, CountItemStatus, CountStatus, InventoryCount, UpsertOutcome};
use crate::models::item_record::{
    ItemRecord, LoadAttempt, LoadItemError, LoadItemsRequest, LoadSource, LoadSummary, RowError,
};
use crate::models::mapping::{DatasetType, MappingConfig};
use crate::repositories::{CountRepository, MappingConfigRepository};
use crate::services::erp::connector::{run_query, ConnectorProvider, ErpRow};
use crate::services::erp::row_transform::{dedupe, RowTransformer};
use crate::services::query::templates::{render_template, TemplateParams, LEGACY_ITEMS_TEMPLATE};
use crate::services::query::compiler::validate_limit;
use crate::services::query::QueryCompiler;
use crate::utils::log_sanitizer::sanitize_for_log;

/// Records transformed from one source, plus rows that could not be used.
#[derive(Debug, Default)]
pub struct TransformedRows {
    pub records: Vec<ItemRecord>,
    pub rows_read: usize,
    pub rows_dropped: usize,
    pub row_errors: Vec<RowError>,
}

impl TransformedRows {
    pub fn from_rows(rows: &[ErpRow], transformer: &RowTransformer) -> Self {
        let mut out = Self {
            rows_read: rows.len(),
            ..Default::default()
        };
        for (i, row) in rows.iter().enumerate() {
            match transformer.transform(row) {
                Ok(Some(record)) => out.records.push(record),
                Ok(None) => out.rows_dropped += 1,
                Err(message) => out.row_errors.push(RowError { row: i + 1, message }),
            }
        }
        out
    }

    fn absorb(&mut self, other: TransformedRows) {
        self.records.extend(other.records);
        self.rows_read += other.rows_read;
        self.rows_dropped += other.rows_dropped;
        self.row_errors.extend(other.row_errors);
    }
}

pub struct ErpLoaderService {
    counts: Arc<dyn CountRepository>,
    mappings: Arc<dyn MappingConfigRepository>,
    connectors: Arc<dyn ConnectorProvider>,
    erp: ErpConfig,
}

impl ErpLoaderService {
    pub fn new(
        counts: Arc<dyn CountRepository>,
        mappings: Arc<dyn MappingConfigRepository>,
        connectors: Arc<dyn ConnectorProvider>,
        erp: ErpConfig,
    ) -> Self {
        Self {
            counts,
            mappings,
            connectors,
            erp,
        }
    }

    fn row_limit(&self, requested: Option<u32>) -> Result<u32> {
        validate_limit(requested)?;
        Ok(requested.unwrap_or(self.erp.default_row_limit))
    }

    /// Count that still accepts item changes.
    pub async fn open_count(&self, tenant_id: Uuid, count_id: Uuid) -> Result<InventoryCount> {
        let count = self
            .counts
            .get_count(tenant_id, count_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Count {} not found", count_id)))?;

        if !count.status.accepts_item_changes() {
            return Err(AppError::invalid_state(
                format!("{} or {}", CountStatus::Draft, CountStatus::Active),
                count.status,
            ));
        }
        Ok(count)
    }

    /// Runs one mapping's compiled query in its own ERP session.
    pub async fn fetch_mapping_rows(&self, tenant_id: Uuid, mapping: &MappingConfig, limit: u32) -> Result<Vec<ErpRow>> {
        let connector = self.connectors.connector(tenant_id, mapping.erp_connection_id).await?;
        let compiled = QueryCompiler::new(connector.dialect()).compile_mapping(mapping, Some(limit))?;

        tracing::debug!("Running {} mapping query: {}", mapping.dataset_type, compiled.sql);
        run_query(connector, &compiled.sql, &compiled.values()).await
    }

    async fn load_mapping(&self, tenant_id: Uuid, mapping: &MappingConfig, limit: u32) -> Result<TransformedRows> {
        let rows = self.fetch_mapping_rows(tenant_id, mapping, limit).await?;
        Ok(TransformedRows::from_rows(&rows, &RowTransformer::new(&mapping.field_mappings)))
    }

    /// ITEMS and STOCK are required; COST and PRICE enrich when active.
    /// System quantities come from STOCK rows only.
    async fn load_configured(&self, tenant_id: Uuid, limit: u32) -> Result<Option<TransformedRows>> {
        let items = self.mappings.find_active(tenant_id, DatasetType::Items).await?;
        let stock = self.mappings.find_active(tenant_id, DatasetType::Stock).await?;
        let (Some(items), Some(stock)) = (items, stock) else {
            return Ok(None);
        };

        let mut combined = TransformedRows::default();
        for mapping in [&items, &stock] {
            let mut loaded = self.load_mapping(tenant_id, mapping, limit).await?;
            if mapping.dataset_type != DatasetType::Stock {
                loaded.records.iter_mut().for_each(|r| r.system_qty = None);
            }
            combined.absorb(loaded);
        }

        for dataset in [DatasetType::Cost, DatasetType::Price] {
            if let Some(mapping) = self.mappings.find_active(tenant_id, dataset).await? {
                let mut loaded = self.load_mapping(tenant_id, &mapping, limit).await?;
                loaded.records.iter_mut().for_each(|r| r.system_qty = None);
                combined.absorb(loaded);
            }
        }

        Ok(Some(combined))
    }

    /// Deprecated direct read of one ERP table through the legacy template.
    async fn load_legacy(&self, tenant_id: Uuid, limit: u32) -> Result<Option<TransformedRows>> {
        let (Some(table), Some(connection)) = (&self.erp.legacy_items_table, &self.erp.default_connection) else {
            return Ok(None);
        };

        let connector = self.connectors.connector(tenant_id, connection.id).await?;
        let sql = render_template(
            LEGACY_ITEMS_TEMPLATE,
            connector.dialect(),
            &TemplateParams {
                table: table.clone(),
                where_clause: None,
                limit: Some(limit),
            },
        )?;

        let rows = run_query(connector, &sql, &[]).await?;
        Ok(Some(TransformedRows::from_rows(&rows, &RowTransformer::default())))
    }

    /// Loads ERP items into the count's current version. With an explicit
    /// mapping only that mapping is tried; otherwise configured mappings,
    /// then the legacy table, then manual entry.
    pub async fn load_items(
        &self,
        tenant_id: Uuid,
        count_id: Uuid,
        request: LoadItemsRequest,
    ) -> Result<LoadSummary> {
        let count = self.open_count(tenant_id, count_id).await?;
        let location_id = request.location_id.unwrap_or(count.warehouse_id);
        let limit = self.row_limit(request.limit)?;

        if let Some(mapping_id) = request.mapping_id {
            let mapping = self
                .mappings
                .get(tenant_id, mapping_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Mapping config {} not found", mapping_id)))?;

            let rows = self.load_mapping(tenant_id, &mapping, limit).await?;
            let mut summary = self.persist(&count, location_id, LoadSource::Mapping, rows).await;
            summary.attempts.push(LoadAttempt {
                source: LoadSource::Mapping,
                success: true,
                message: format!("Loaded with mapping '{}'", sanitize_for_log(&mapping.name)),
            });
            return Ok(summary);
        }

        let mut attempts = Vec::new();

        match self.load_configured(tenant_id, limit).await {
            Ok(Some(rows)) => {
                tracing::info!("Loaded {} rows for {} from configured mappings", rows.rows_read, count.count_number());
                attempts.push(LoadAttempt {
                    source: LoadSource::ConfiguredMappings,
                    success: true,
                    message: format!("{} rows read", rows.rows_read),
                });
                let mut summary = self.persist(&count, location_id, LoadSource::ConfiguredMappings, rows).await;
                summary.attempts = attempts;
                return Ok(summary);
            }
            Ok(None) => {
                tracing::info!("No active ITEMS and STOCK mappings for tenant {}", tenant_id);
                attempts.push(LoadAttempt {
                    source: LoadSource::ConfiguredMappings,
                    success: false,
                    message: "ITEMS and STOCK mappings must both be active".to_string(),
                });
            }
            Err(e) => {
                tracing::warn!("Configured mapping load failed for {}: {}", count.count_number(), e);
                attempts.push(LoadAttempt {
                    source: LoadSource::ConfiguredMappings,
                    success: false,
                    message: e.to_string(),
                });
            }
        }

        match self.load_legacy(tenant_id, limit).await {
            Ok(Some(rows)) => {
                tracing::warn!(
                    "Loaded {} rows for {} through the deprecated direct table query",
                    rows.rows_read,
                    count.count_number()
                );
                attempts.push(LoadAttempt {
                    source: LoadSource::LegacyTable,
                    success: true,
                    message: format!("{} rows read", rows.rows_read),
                });
                let mut summary = self.persist(&count, location_id, LoadSource::LegacyTable, rows).await;
                summary.attempts = attempts;
                return Ok(summary);
            }
            Ok(None) => {
                attempts.push(LoadAttempt {
                    source: LoadSource::LegacyTable,
                    success: false,
                    message: "No legacy items table configured".to_string(),
                });
            }
            Err(e) => {
                tracing::warn!("Legacy table load failed for {}: {}", count.count_number(), e);
                attempts.push(LoadAttempt {
                    source: LoadSource::LegacyTable,
                    success: false,
                    message: e.to_string(),
                });
            }
        }

        tracing::info!("{} falls back to manual item entry", count.count_number());
        attempts.push(LoadAttempt {
            source: LoadSource::ManualEntry,
            success: true,
            message: "Items must be entered manually".to_string(),
        });

        let mut summary = LoadSummary::new(LoadSource::ManualEntry, count.current_version);
        summary.attempts = attempts;
        Ok(summary)
    }

    async fn persist(
        &self,
        count: &InventoryCount,
        location_id: Uuid,
        source: LoadSource,
        rows: TransformedRows,
    ) -> LoadSummary {
        let mut summary = LoadSummary::new(source, count.current_version);
        summary.rows_read = rows.rows_read;
        summary.rows_dropped = rows.rows_dropped;
        summary.row_errors = rows.row_errors;
        self.upsert_records(count, location_id, rows.records, &mut summary).await;
        summary
    }

    /// Idempotent upsert of de-duplicated records into the count's current
    /// version. Per-item failures are collected in the summary.
    pub async fn upsert_records(
        &self,
        count: &InventoryCount,
        location_id: Uuid,
        records: Vec<ItemRecord>,
        summary: &mut LoadSummary,
    ) {
        let merged = dedupe(records);
        summary.items = merged.len();

        for record in merged {
            let item = new_count_item(count, location_id, record);
            let item_code = item.item_code.clone();

            match self.counts.upsert_item(item).await {
                Ok((_, UpsertOutcome::Inserted)) => summary.inserted += 1,
                Ok((_, UpsertOutcome::Updated)) => summary.updated += 1,
                Err(e) => {
                    tracing::warn!("Failed to upsert item {}: {}", sanitize_for_log(&item_code), e);
                    summary.failed += 1;
                    summary.errors.push(LoadItemError {
                        item_code,
                        error: e.to_string(),
                    });
                }
            }
        }

        metrics::record_loaded_items("inserted", summary.inserted);
        metrics::record_loaded_items("updated", summary.updated);
        metrics::record_loaded_items("failed", summary.failed);

        tracing::info!(
            "{} v{}: {} inserted, {} updated, {} failed",
            count.count_number(),
            count.current_version,
            summary.inserted,
            summary.updated,
            summary.failed
        );
    }
}

pub fn new_count_item(count: &InventoryCount, location_id: Uuid, record: ItemRecord) -> CountItem {
    let now = Utc::now();
    let item_name = record.display_name().to_string();
    CountItem {
        id: Uuid::new_v4(),
        count_id: count.id,
        location_id,
        item_code: record.item_code,
        item_name,
        uom: record.uom,
        pack_qty: record.pack_qty,
        system_qty: record.system_qty.unwrap_or(Decimal::ZERO),
        counted_qty: None,
        previous_counted_qty: None,
        version: count.current_version,
        status: CountItemStatus::Pending,
        has_variance: false,
        difference: None,
        variance_percent: None,
        cost: record.cost,
        price: record.price,
        barcodes: record.barcodes,
        category: record.category,
        brand: record.brand,
        counted_by: None,
        counted_at: None,
        created_at: now,
        updated_at: now,
    }
}
