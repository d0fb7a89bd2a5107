// ERP Sync Service
// Writes approved count variances back to the ERP and records every attempt
// as an append-only sync history entry.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::middleware::error_handling::{AppError, Result};
use crate::middleware::metrics;
use crate::models::count::{CountItem, CountStatus, VarianceStatus};
use crate::models::mapping::DatasetType;
use crate::models::sync::{
    SendToErpRequest, SyncHistory, SyncItemDetail, SyncOutcome, SyncStatus, SyncStrategy, WriteBackTarget,
};
use crate::repositories::{CountRepository, MappingConfigRepository, StatusChange, TransitionStamp};
use crate::services::erp::connector::{decimal_param, with_session, ConnectorProvider, ErpConnector};
use crate::services::query::identifier::{validate_alias, validate_table_reference};
use crate::services::query::SqlDialect;
use crate::utils::log_sanitizer::sanitize_for_log;

pub struct ErpSyncService {
    counts: Arc<dyn CountRepository>,
    mappings: Arc<dyn MappingConfigRepository>,
    connectors: Arc<dyn ConnectorProvider>,
    default_connection: Option<Uuid>,
}

/// Last segment of a possibly table-qualified column reference.
fn bare_column(reference: &str) -> &str {
    reference.rsplit('.').next().unwrap_or(reference)
}

impl WriteBackTarget {
    pub fn validate(&self) -> Result<()> {
        validate_table_reference(&self.table)?;
        validate_alias(&self.quantity_column)?;
        validate_alias(&self.key_column)?;
        Ok(())
    }

    /// Statement and parameters writing one item's value.
    pub fn statement(&self, dialect: SqlDialect, strategy: SyncStrategy, item_code: &str, value: Decimal) -> (String, Vec<serde_json::Value>) {
        let value_sql = match strategy {
            SyncStrategy::Replace => dialect.decimal_placeholder(1),
            SyncStrategy::Add => format!("{} + {}", self.quantity_column, dialect.decimal_placeholder(1)),
        };
        let sql = format!(
            "UPDATE {} SET {} = {} WHERE {} = {}",
            self.table,
            self.quantity_column,
            value_sql,
            self.key_column,
            dialect.placeholder(2)
        );
        (sql, vec![decimal_param(value), serde_json::Value::String(item_code.to_string())])
    }
}

/// Value sent for one item: the counted quantity for REPLACE, the variance
/// for ADD.
fn write_value(item: &CountItem, strategy: SyncStrategy) -> Option<Decimal> {
    let counted = item.counted_qty?;
    match strategy {
        SyncStrategy::Replace => Some(counted),
        SyncStrategy::Add => Some(counted - item.system_qty),
    }
}

impl ErpSyncService {
    pub fn new(
        counts: Arc<dyn CountRepository>,
        mappings: Arc<dyn MappingConfigRepository>,
        connectors: Arc<dyn ConnectorProvider>,
        default_connection: Option<Uuid>,
    ) -> Self {
        Self {
            counts,
            mappings,
            connectors,
            default_connection,
        }
    }

    /// Write-back target and connection derived from the request or the
    /// tenant's active STOCK mapping.
    async fn resolve_target(&self, tenant_id: Uuid, request: &SendToErpRequest) -> Result<(WriteBackTarget, Uuid)> {
        let stock = self.mappings.find_active(tenant_id, DatasetType::Stock).await?;

        let target = match (&request.target, &stock) {
            (Some(target), _) => target.clone(),
            (None, Some(mapping)) => {
                let quantity = mapping.source_for("systemQty").ok_or_else(|| {
                    AppError::InvalidInput("Active STOCK mapping has no systemQty field".to_string())
                })?;
                let key = mapping.source_for("itemCode").ok_or_else(|| {
                    AppError::InvalidInput("Active STOCK mapping has no itemCode field".to_string())
                })?;
                WriteBackTarget {
                    table: mapping.main_table.clone(),
                    quantity_column: bare_column(quantity).to_string(),
                    key_column: bare_column(key).to_string(),
                }
            }
            (None, None) => {
                return Err(AppError::InvalidInput(
                    "No write-back target given and no active STOCK mapping".to_string(),
                ))
            }
        };
        target.validate()?;

        let connection_id = request
            .erp_connection_id
            .or_else(|| stock.as_ref().map(|m| m.erp_connection_id))
            .or(self.default_connection)
            .ok_or_else(|| AppError::InvalidInput("No ERP connection available for write-back".to_string()))?;

        Ok((target, connection_id))
    }

    /// Pushes every variant item of the current version to the ERP, except
    /// items whose variance report was rejected. Pending reports count as
    /// signed off by finalization. Items are written independently; one
    /// failure never aborts the rest.
    pub async fn send_to_erp(
        &self,
        tenant_id: Uuid,
        count_id: Uuid,
        request: SendToErpRequest,
        actor: Uuid,
    ) -> Result<SyncOutcome> {
        let count = self
            .counts
            .get_count(tenant_id, count_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Count {} not found", count_id)))?;

        if count.status != CountStatus::Completed {
            return Err(AppError::invalid_state(CountStatus::Completed.as_str(), count.status));
        }

        let (target, connection_id) = self.resolve_target(tenant_id, &request).await?;
        let strategy = request.strategy;

        let rejected: HashSet<Uuid> = self
            .counts
            .list_variances(count_id, Some(count.current_version))
            .await?
            .into_iter()
            .filter(|report| report.status == VarianceStatus::Rejected)
            .map(|report| report.count_item_id)
            .collect();

        let items: Vec<CountItem> = self
            .counts
            .list_items(count_id, Some(count.current_version))
            .await?
            .into_iter()
            .filter(|item| item.has_variance && item.counted_qty.is_some())
            .filter(|item| !rejected.contains(&item.id))
            .collect();

        tracing::info!(
            "Sending {} variant items of {} v{} to ERP table {} ({}), {} rejected variances held back",
            items.len(),
            count.count_number(),
            count.current_version,
            sanitize_for_log(&target.table),
            strategy.as_str(),
            rejected.len()
        );

        let started_at = Utc::now();
        let timer = Instant::now();
        let connector = self.connectors.connector(tenant_id, connection_id).await?;

        let session = with_session(connector, |c| {
            let target = target.clone();
            let items = items.clone();
            async move { Ok::<_, AppError>(write_items(c.as_ref(), &target, strategy, &items).await) }
        })
        .await;

        let (details, session_error) = match session {
            Ok(details) => (details, None),
            Err(e) => {
                tracing::error!("ERP write-back session failed: {}", e);
                let message = e.to_string();
                let details: Vec<SyncItemDetail> = items
                    .iter()
                    .map(|item| SyncItemDetail {
                        count_item_id: item.id,
                        item_code: item.item_code.clone(),
                        value: write_value(item, strategy).unwrap_or_default(),
                        success: false,
                        error: Some(message.clone()),
                    })
                    .collect();
                (details, Some(e))
            }
        };

        let synced = details.iter().filter(|d| d.success).count();
        let failed = details.len() - synced;
        metrics::record_sync_items(synced, failed);

        let history = SyncHistory {
            id: Uuid::new_v4(),
            count_id,
            version: count.current_version,
            status: SyncStatus::from_counts(synced, failed),
            strategy,
            items_synced: synced as i32,
            items_failed: failed as i32,
            details,
            duration_ms: timer.elapsed().as_millis() as i64,
            triggered_by: actor,
            started_at,
            completed_at: Utc::now(),
        };
        self.counts.insert_sync_history(&history).await?;

        if let Some(e) = session_error {
            return Err(e);
        }

        let count = if failed == 0 {
            let change = StatusChange::new(&count, &[CountStatus::Completed], CountStatus::Closed, actor)
                .stamp(TransitionStamp::Closed);
            self.counts.apply_transition(tenant_id, count_id, change.into()).await?
        } else {
            tracing::warn!(
                "Write-back of {} left {} of {} items unsynced",
                count.count_number(),
                failed,
                synced + failed
            );
            count
        };

        tracing::info!(
            "Write-back of {} finished: {} synced, {} failed",
            count.count_number(),
            synced,
            failed
        );

        Ok(SyncOutcome {
            success: failed == 0,
            items_synced: synced as i32,
            items_failed: failed as i32,
            history,
            count,
        })
    }

    pub async fn sync_history(&self, tenant_id: Uuid, count_id: Uuid) -> Result<Vec<SyncHistory>> {
        self.counts
            .get_count(tenant_id, count_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Count {} not found", count_id)))?;
        self.counts.list_sync_history(count_id).await
    }
}

async fn write_items(
    connector: &dyn ErpConnector,
    target: &WriteBackTarget,
    strategy: SyncStrategy,
    items: &[CountItem],
) -> Vec<SyncItemDetail> {
    let mut details = Vec::with_capacity(items.len());

    for item in items {
        let Some(value) = write_value(item, strategy) else {
            continue;
        };
        let (sql, params) = target.statement(connector.dialect(), strategy, &item.item_code, value);

        let result = connector.execute_query(&sql, &params).await;
        metrics::record_erp_query(result.is_ok());

        match result {
            Ok(_) => details.push(SyncItemDetail {
                count_item_id: item.id,
                item_code: item.item_code.clone(),
                value,
                success: true,
                error: None,
            }),
            Err(e) => {
                tracing::warn!("Failed to sync item {}: {}", sanitize_for_log(&item.item_code), e);
                details.push(SyncItemDetail {
                    count_item_id: item.id,
                    item_code: item.item_code.clone(),
                    value,
                    success: false,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn target() -> WriteBackTarget {
        WriteBackTarget {
            table: "OITW".into(),
            quantity_column: "OnHand".into(),
            key_column: "ItemCode".into(),
        }
    }

    #[test]
    fn test_replace_statement() {
        let (sql, params) = target().statement(SqlDialect::Postgres, SyncStrategy::Replace, "SKU-1", dec!(15));
        assert_eq!(sql, "UPDATE OITW SET OnHand = CAST($1 AS NUMERIC) WHERE ItemCode = $2");
        assert_eq!(params, vec![serde_json::json!(15), serde_json::json!("SKU-1")]);
    }

    #[test]
    fn test_fractional_quantity_sent_exactly() {
        let (_, params) = target().statement(SqlDialect::Postgres, SyncStrategy::Replace, "SKU-1", dec!(12.345));
        assert_eq!(params[0], serde_json::json!("12.345"));
    }

    #[test]
    fn test_add_statement_uses_delta() {
        let (sql, params) = target().statement(SqlDialect::MsSql, SyncStrategy::Add, "SKU-1", dec!(-2));
        assert_eq!(sql, "UPDATE OITW SET OnHand = OnHand + CAST(@p1 AS DECIMAL(38, 10)) WHERE ItemCode = @p2");
        assert_eq!(params[0], serde_json::json!(-2));
    }

    #[test]
    fn test_target_identifiers_validated() {
        let mut bad = target();
        bad.quantity_column = "OnHand = 0; --".into();
        assert!(bad.validate().is_err());
        assert!(target().validate().is_ok());
    }

    #[test]
    fn test_bare_column() {
        assert_eq!(bare_column("OITW.OnHand"), "OnHand");
        assert_eq!(bare_column("OnHand"), "OnHand");
    }
}
