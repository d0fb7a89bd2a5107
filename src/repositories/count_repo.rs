use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{query, PgConnection, PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::middleware::error_handling::{map_unique_violation, AppError, Result};
use crate::models::count::{
    apply_counted, settle_items, CountItem, CountStatus, InventoryCount, UpsertOutcome, VarianceReport,
};
use crate::models::sync::{SyncHistory, SyncItemDetail};
use crate::repositories::{
    apply_change, check_change, check_item_write, variance_change_for, CountRepository, CountTransition,
    NewCount, VarianceChange, WAREHOUSE_BUSY,
};

const COUNT_COLUMNS: &str = "id, tenant_id, warehouse_id, sequence_number, name, notes, status, \
    current_version, total_versions, created_by, created_at, started_by, started_at, completed_by, \
    completed_at, approved_by, approved_at, closed_by, closed_at, cancelled_by, cancelled_at, updated_at";

const ITEM_COLUMNS: &str = "id, count_id, location_id, item_code, item_name, uom, pack_qty, system_qty, \
    counted_qty, previous_counted_qty, version, status, has_variance, difference, variance_percent, cost, \
    price, barcodes, category, brand, counted_by, counted_at, created_at, updated_at";

const VARIANCE_COLUMNS: &str = "id, count_id, count_item_id, version, item_code, system_qty, counted_qty, \
    difference, variance_percent, status, resolution, resolved_by, resolved_at, created_at, updated_at";

const SYNC_COLUMNS: &str = "id, count_id, version, status, strategy, items_synced, items_failed, details, \
    duration_ms, triggered_by, started_at, completed_at";

fn parse_column<T: FromStr<Err = String>>(row: &PgRow, column: &str) -> Result<T> {
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: String| AppError::Internal(anyhow::anyhow!(e)))
}

fn count_from_row(row: &PgRow) -> Result<InventoryCount> {
    Ok(InventoryCount {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        warehouse_id: row.try_get("warehouse_id")?,
        sequence_number: row.try_get("sequence_number")?,
        name: row.try_get("name")?,
        notes: row.try_get("notes")?,
        status: parse_column(row, "status")?,
        current_version: row.try_get("current_version")?,
        total_versions: row.try_get("total_versions")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        started_by: row.try_get("started_by")?,
        started_at: row.try_get("started_at")?,
        completed_by: row.try_get("completed_by")?,
        completed_at: row.try_get("completed_at")?,
        approved_by: row.try_get("approved_by")?,
        approved_at: row.try_get("approved_at")?,
        closed_by: row.try_get("closed_by")?,
        closed_at: row.try_get("closed_at")?,
        cancelled_by: row.try_get("cancelled_by")?,
        cancelled_at: row.try_get("cancelled_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<CountItem> {
    Ok(CountItem {
        id: row.try_get("id")?,
        count_id: row.try_get("count_id")?,
        location_id: row.try_get("location_id")?,
        item_code: row.try_get("item_code")?,
        item_name: row.try_get("item_name")?,
        uom: row.try_get("uom")?,
        pack_qty: row.try_get("pack_qty")?,
        system_qty: row.try_get("system_qty")?,
        counted_qty: row.try_get("counted_qty")?,
        previous_counted_qty: row.try_get("previous_counted_qty")?,
        version: row.try_get("version")?,
        status: parse_column(row, "status")?,
        has_variance: row.try_get("has_variance")?,
        difference: row.try_get("difference")?,
        variance_percent: row.try_get("variance_percent")?,
        cost: row.try_get("cost")?,
        price: row.try_get("price")?,
        barcodes: row.try_get("barcodes")?,
        category: row.try_get("category")?,
        brand: row.try_get("brand")?,
        counted_by: row.try_get("counted_by")?,
        counted_at: row.try_get("counted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn variance_from_row(row: &PgRow) -> Result<VarianceReport> {
    Ok(VarianceReport {
        id: row.try_get("id")?,
        count_id: row.try_get("count_id")?,
        count_item_id: row.try_get("count_item_id")?,
        version: row.try_get("version")?,
        item_code: row.try_get("item_code")?,
        system_qty: row.try_get("system_qty")?,
        counted_qty: row.try_get("counted_qty")?,
        difference: row.try_get("difference")?,
        variance_percent: row.try_get("variance_percent")?,
        status: parse_column(row, "status")?,
        resolution: row.try_get("resolution")?,
        resolved_by: row.try_get("resolved_by")?,
        resolved_at: row.try_get("resolved_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn sync_from_row(row: &PgRow) -> Result<SyncHistory> {
    let details: Json<Vec<SyncItemDetail>> = row.try_get("details")?;
    Ok(SyncHistory {
        id: row.try_get("id")?,
        count_id: row.try_get("count_id")?,
        version: row.try_get("version")?,
        status: parse_column(row, "status")?,
        strategy: parse_column(row, "strategy")?,
        items_synced: row.try_get("items_synced")?,
        items_failed: row.try_get("items_failed")?,
        details: details.0,
        duration_ms: row.try_get("duration_ms")?,
        triggered_by: row.try_get("triggered_by")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

async fn insert_item_on(conn: &mut PgConnection, item: &CountItem) -> Result<CountItem> {
    let row = query(&format!(
        r#"
        INSERT INTO count_items ({ITEM_COLUMNS})
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
        RETURNING {ITEM_COLUMNS}
        "#
    ))
    .bind(item.id)
    .bind(item.count_id)
    .bind(item.location_id)
    .bind(&item.item_code)
    .bind(&item.item_name)
    .bind(&item.uom)
    .bind(item.pack_qty)
    .bind(item.system_qty)
    .bind(item.counted_qty)
    .bind(item.previous_counted_qty)
    .bind(item.version)
    .bind(item.status.as_str())
    .bind(item.has_variance)
    .bind(item.difference)
    .bind(item.variance_percent)
    .bind(item.cost)
    .bind(item.price)
    .bind(&item.barcodes)
    .bind(&item.category)
    .bind(&item.brand)
    .bind(item.counted_by)
    .bind(item.counted_at)
    .bind(item.created_at)
    .bind(item.updated_at)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        map_unique_violation(
            e,
            &format!("Item {} already exists at this location in version {}", item.item_code, item.version),
        )
    })?;

    item_from_row(&row)
}

async fn update_counted_fields_on(conn: &mut PgConnection, item: &CountItem) -> Result<CountItem> {
    let row = query(&format!(
        r#"
        UPDATE count_items
        SET counted_qty = $1, previous_counted_qty = $2, status = $3, has_variance = $4,
            difference = $5, variance_percent = $6, counted_by = $7, counted_at = $8, updated_at = NOW()
        WHERE id = $9 AND count_id = $10
        RETURNING {ITEM_COLUMNS}
        "#
    ))
    .bind(item.counted_qty)
    .bind(item.previous_counted_qty)
    .bind(item.status.as_str())
    .bind(item.has_variance)
    .bind(item.difference)
    .bind(item.variance_percent)
    .bind(item.counted_by)
    .bind(item.counted_at)
    .bind(item.id)
    .bind(item.count_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Count item {} not found", item.id)))?;

    item_from_row(&row)
}

async fn upsert_variance_on(conn: &mut PgConnection, report: &VarianceReport) -> Result<VarianceReport> {
    let row = query(&format!(
        r#"
        INSERT INTO variance_reports ({VARIANCE_COLUMNS})
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        ON CONFLICT (count_item_id, version) DO UPDATE
        SET system_qty = EXCLUDED.system_qty,
            counted_qty = EXCLUDED.counted_qty,
            difference = EXCLUDED.difference,
            variance_percent = EXCLUDED.variance_percent,
            status = EXCLUDED.status,
            resolution = EXCLUDED.resolution,
            resolved_by = EXCLUDED.resolved_by,
            resolved_at = EXCLUDED.resolved_at,
            updated_at = NOW()
        RETURNING {VARIANCE_COLUMNS}
        "#
    ))
    .bind(report.id)
    .bind(report.count_id)
    .bind(report.count_item_id)
    .bind(report.version)
    .bind(&report.item_code)
    .bind(report.system_qty)
    .bind(report.counted_qty)
    .bind(report.difference)
    .bind(report.variance_percent)
    .bind(report.status.as_str())
    .bind(&report.resolution)
    .bind(report.resolved_by)
    .bind(report.resolved_at)
    .bind(report.created_at)
    .bind(report.updated_at)
    .fetch_one(&mut *conn)
    .await?;

    variance_from_row(&row)
}

async fn apply_variance_change_on(conn: &mut PgConnection, item: &CountItem, variance: VarianceChange) -> Result<()> {
    match variance {
        VarianceChange::Upsert(report) => {
            upsert_variance_on(conn, &report).await?;
        }
        VarianceChange::Clear => {
            query("DELETE FROM variance_reports WHERE count_item_id = $1 AND version = $2 AND status = 'PENDING'")
                .bind(item.id)
                .bind(item.version)
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(())
}

/// Share-locks the count row for an item write. Transitions take the row
/// `FOR UPDATE`, so item writes and transitions never interleave.
async fn lock_writable_count_on(conn: &mut PgConnection, count_id: Uuid, version: i32) -> Result<()> {
    let row = query(&format!(
        "SELECT {COUNT_COLUMNS} FROM inventory_counts WHERE id = $1 FOR SHARE"
    ))
    .bind(count_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Count {} not found", count_id)))?;

    check_item_write(&count_from_row(&row)?, version)
}

pub struct PgCountRepository {
    pool: PgPool,
}

impl PgCountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CountRepository for PgCountRepository {
    async fn create_count(&self, new: NewCount) -> Result<InventoryCount> {
        let row = query(&format!(
            r#"
            INSERT INTO inventory_counts (id, tenant_id, warehouse_id, sequence_number, name, notes, status, created_by)
            VALUES ($1, $2, $3, nextval('inventory_count_sequence'), $4, $5, 'DRAFT', $6)
            RETURNING {COUNT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new.tenant_id)
        .bind(new.warehouse_id)
        .bind(&new.name)
        .bind(&new.notes)
        .bind(new.created_by)
        .fetch_one(&self.pool)
        .await?;

        count_from_row(&row)
    }

    async fn get_count(&self, tenant_id: Uuid, count_id: Uuid) -> Result<Option<InventoryCount>> {
        let row = query(&format!(
            "SELECT {COUNT_COLUMNS} FROM inventory_counts WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(count_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(count_from_row).transpose()
    }

    async fn list_counts(&self, tenant_id: Uuid, status: Option<CountStatus>) -> Result<Vec<InventoryCount>> {
        let rows = query(&format!(
            r#"
            SELECT {COUNT_COLUMNS} FROM inventory_counts
            WHERE tenant_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY sequence_number DESC
            "#
        ))
        .bind(tenant_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(count_from_row).collect()
    }

    async fn apply_transition(
        &self,
        tenant_id: Uuid,
        count_id: Uuid,
        transition: CountTransition,
    ) -> Result<InventoryCount> {
        let mut tx = self.pool.begin().await?;

        let row = query(&format!(
            "SELECT {COUNT_COLUMNS} FROM inventory_counts WHERE id = $1 AND tenant_id = $2 FOR UPDATE"
        ))
        .bind(count_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Count {} not found", count_id)))?;

        let mut count = count_from_row(&row)?;
        check_change(&count, &transition.change)?;

        let now = Utc::now();
        let mut settled = Vec::new();
        let mut reports = transition.variance_reports;
        if transition.settle_current_version {
            let rows = query(&format!(
                "SELECT {ITEM_COLUMNS} FROM count_items WHERE count_id = $1 AND version = $2 FOR UPDATE"
            ))
            .bind(count.id)
            .bind(count.current_version)
            .fetch_all(&mut *tx)
            .await?;
            settled = rows.iter().map(item_from_row).collect::<Result<Vec<_>>>()?;
            reports.extend(settle_items(&mut settled, transition.change.actor, now));
        }

        apply_change(&mut count, &transition.change, now);

        query(
            r#"
            UPDATE inventory_counts
            SET status = $1, current_version = $2, total_versions = $3,
                started_by = $4, started_at = $5, completed_by = $6, completed_at = $7,
                approved_by = $8, approved_at = $9, closed_by = $10, closed_at = $11,
                cancelled_by = $12, cancelled_at = $13, updated_at = $14
            WHERE id = $15
            "#,
        )
        .bind(count.status.as_str())
        .bind(count.current_version)
        .bind(count.total_versions)
        .bind(count.started_by)
        .bind(count.started_at)
        .bind(count.completed_by)
        .bind(count.completed_at)
        .bind(count.approved_by)
        .bind(count.approved_at)
        .bind(count.closed_by)
        .bind(count.closed_at)
        .bind(count.cancelled_by)
        .bind(count.cancelled_at)
        .bind(count.updated_at)
        .bind(count.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, WAREHOUSE_BUSY))?;

        for item in &settled {
            update_counted_fields_on(&mut tx, item).await?;
        }
        for item in &transition.new_items {
            insert_item_on(&mut tx, item).await?;
        }
        for report in &reports {
            upsert_variance_on(&mut tx, report).await?;
        }

        tx.commit().await?;
        Ok(count)
    }

    async fn delete_count(&self, tenant_id: Uuid, count_id: Uuid, allowed: &[CountStatus]) -> Result<()> {
        let allowed_names: Vec<&str> = allowed.iter().map(|s| s.as_str()).collect();
        let result = query("DELETE FROM inventory_counts WHERE id = $1 AND tenant_id = $2 AND status = ANY($3)")
            .bind(count_id)
            .bind(tenant_id)
            .bind(&allowed_names[..])
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return match self.get_count(tenant_id, count_id).await? {
                Some(count) => Err(AppError::invalid_state(allowed_names.join(" or "), count.status)),
                None => Err(AppError::NotFound(format!("Count {} not found", count_id))),
            };
        }
        Ok(())
    }

    async fn upsert_item(&self, item: CountItem) -> Result<(CountItem, UpsertOutcome)> {
        let mut tx = self.pool.begin().await?;
        lock_writable_count_on(&mut tx, item.count_id, item.version).await?;

        let row = query(&format!(
            r#"
            INSERT INTO count_items ({ITEM_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
            ON CONFLICT (count_id, location_id, item_code, version) DO UPDATE
            SET item_name = EXCLUDED.item_name,
                uom = EXCLUDED.uom,
                pack_qty = EXCLUDED.pack_qty,
                system_qty = EXCLUDED.system_qty,
                cost = EXCLUDED.cost,
                price = EXCLUDED.price,
                barcodes = EXCLUDED.barcodes,
                category = EXCLUDED.category,
                brand = EXCLUDED.brand,
                updated_at = NOW()
            RETURNING {ITEM_COLUMNS}, (xmax = 0) AS inserted
            "#
        ))
        .bind(item.id)
        .bind(item.count_id)
        .bind(item.location_id)
        .bind(&item.item_code)
        .bind(&item.item_name)
        .bind(&item.uom)
        .bind(item.pack_qty)
        .bind(item.system_qty)
        .bind(item.counted_qty)
        .bind(item.previous_counted_qty)
        .bind(item.version)
        .bind(item.status.as_str())
        .bind(item.has_variance)
        .bind(item.difference)
        .bind(item.variance_percent)
        .bind(item.cost)
        .bind(item.price)
        .bind(&item.barcodes)
        .bind(&item.category)
        .bind(&item.brand)
        .bind(item.counted_by)
        .bind(item.counted_at)
        .bind(item.created_at)
        .bind(item.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        let inserted: bool = row.try_get("inserted")?;
        let mut saved = item_from_row(&row)?;
        if let (false, Some(counted_qty)) = (inserted, saved.counted_qty) {
            apply_counted(&mut saved, counted_qty);
            saved = update_counted_fields_on(&mut tx, &saved).await?;
            apply_variance_change_on(&mut tx, &saved, variance_change_for(&saved)).await?;
        }

        tx.commit().await?;
        let outcome = if inserted { UpsertOutcome::Inserted } else { UpsertOutcome::Updated };
        Ok((saved, outcome))
    }

    async fn insert_item(&self, item: CountItem) -> Result<CountItem> {
        let mut tx = self.pool.begin().await?;
        lock_writable_count_on(&mut tx, item.count_id, item.version).await?;
        let saved = insert_item_on(&mut tx, &item).await?;
        tx.commit().await?;
        Ok(saved)
    }

    async fn get_item(&self, count_id: Uuid, item_id: Uuid) -> Result<Option<CountItem>> {
        let row = query(&format!(
            "SELECT {ITEM_COLUMNS} FROM count_items WHERE id = $1 AND count_id = $2"
        ))
        .bind(item_id)
        .bind(count_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn list_items(&self, count_id: Uuid, version: Option<i32>) -> Result<Vec<CountItem>> {
        let rows = query(&format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM count_items
            WHERE count_id = $1 AND ($2::INTEGER IS NULL OR version = $2)
            ORDER BY version, item_code, location_id
            "#
        ))
        .bind(count_id)
        .bind(version)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    async fn record_count(&self, item: CountItem, variance: VarianceChange) -> Result<CountItem> {
        let mut tx = self.pool.begin().await?;
        lock_writable_count_on(&mut tx, item.count_id, item.version).await?;
        let saved = update_counted_fields_on(&mut tx, &item).await?;
        apply_variance_change_on(&mut tx, &saved, variance).await?;

        tx.commit().await?;
        Ok(saved)
    }

    async fn list_variances(&self, count_id: Uuid, version: Option<i32>) -> Result<Vec<VarianceReport>> {
        let rows = query(&format!(
            r#"
            SELECT {VARIANCE_COLUMNS} FROM variance_reports
            WHERE count_id = $1 AND ($2::INTEGER IS NULL OR version = $2)
            ORDER BY version, item_code
            "#
        ))
        .bind(count_id)
        .bind(version)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(variance_from_row).collect()
    }

    async fn get_variance(&self, count_id: Uuid, report_id: Uuid) -> Result<Option<VarianceReport>> {
        let row = query(&format!(
            "SELECT {VARIANCE_COLUMNS} FROM variance_reports WHERE id = $1 AND count_id = $2"
        ))
        .bind(report_id)
        .bind(count_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(variance_from_row).transpose()
    }

    async fn save_variance(&self, report: VarianceReport) -> Result<VarianceReport> {
        let row = query(&format!(
            r#"
            UPDATE variance_reports
            SET status = $1, resolution = $2, resolved_by = $3, resolved_at = $4, updated_at = NOW()
            WHERE id = $5 AND count_id = $6
            RETURNING {VARIANCE_COLUMNS}
            "#
        ))
        .bind(report.status.as_str())
        .bind(&report.resolution)
        .bind(report.resolved_by)
        .bind(report.resolved_at)
        .bind(report.id)
        .bind(report.count_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Variance report {} not found", report.id)))?;

        variance_from_row(&row)
    }

    async fn insert_sync_history(&self, history: &SyncHistory) -> Result<()> {
        query(&format!(
            r#"
            INSERT INTO sync_history ({SYNC_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#
        ))
        .bind(history.id)
        .bind(history.count_id)
        .bind(history.version)
        .bind(history.status.as_str())
        .bind(history.strategy.as_str())
        .bind(history.items_synced)
        .bind(history.items_failed)
        .bind(Json(&history.details))
        .bind(history.duration_ms)
        .bind(history.triggered_by)
        .bind(history.started_at)
        .bind(history.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_sync_history(&self, count_id: Uuid) -> Result<Vec<SyncHistory>> {
        let rows = query(&format!(
            "SELECT {SYNC_COLUMNS} FROM sync_history WHERE count_id = $1 ORDER BY started_at DESC"
        ))
        .bind(count_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(sync_from_row).collect()
    }
}
