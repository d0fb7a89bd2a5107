// Count Service
// Lifecycle state machine, variance computation and recount versioning for
// inventory counts. Every transition is a compare-and-set in the repository.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::middleware::error_handling::{AppError, Result};
use crate::models::count::{
    AddCountItemRequest, CountItem, CountItemStatus, CountStatus, CreateCountRequest, InventoryCount,
    NewVersionOutcome, ResolveVarianceRequest, SubmitCountRequest, SubmitCountSummary, SubmitEntryError,
    UpdateCountItemRequest, VarianceReport, VarianceStatus, VersionHistory, VersionSummary,
};
use crate::repositories::{
    variance_change_for, CountRepository, CountTransition, NewCount, StatusChange, TransitionStamp,
};

pub use crate::models::count::{apply_counted, settle_items, variance_percent, variance_report};

/// Rows of the next version: variant items are queued for recount with
/// their last count kept as reference, the rest are carried as completed.
pub fn next_version_items(items: &[CountItem], next_version: i32) -> Vec<CountItem> {
    let now = Utc::now();
    items
        .iter()
        .map(|item| {
            let mut next = CountItem {
                id: Uuid::new_v4(),
                version: next_version,
                previous_counted_qty: item.counted_qty,
                created_at: now,
                updated_at: now,
                ..item.clone()
            };
            if item.has_variance {
                next.status = CountItemStatus::Pending;
                next.counted_qty = None;
                next.difference = None;
                next.variance_percent = None;
                next.has_variance = false;
                next.counted_by = None;
                next.counted_at = None;
            } else {
                next.status = CountItemStatus::Completed;
            }
            next
        })
        .collect()
}

fn summarize_version(version: i32, items: &[&CountItem], reports: usize) -> VersionSummary {
    VersionSummary {
        version,
        total_items: items.len(),
        counted_items: items.iter().filter(|i| i.counted_qty.is_some()).count(),
        pending_items: items.iter().filter(|i| i.status == CountItemStatus::Pending).count(),
        variance_items: items.iter().filter(|i| i.has_variance).count(),
        variance_reports: reports,
        net_difference: items.iter().filter_map(|i| i.difference).sum(),
    }
}

pub struct CountService {
    counts: Arc<dyn CountRepository>,
}

impl CountService {
    pub fn new(counts: Arc<dyn CountRepository>) -> Self {
        Self { counts }
    }

    pub async fn create_count(&self, tenant_id: Uuid, request: CreateCountRequest, actor: Uuid) -> Result<InventoryCount> {
        request.validate()?;

        let count = self
            .counts
            .create_count(NewCount {
                tenant_id,
                warehouse_id: request.warehouse_id,
                name: request.name,
                notes: request.notes,
                created_by: actor,
            })
            .await?;

        tracing::info!("Created {} for warehouse {}", count.count_number(), count.warehouse_id);
        Ok(count)
    }

    pub async fn list_counts(&self, tenant_id: Uuid, status: Option<CountStatus>) -> Result<Vec<InventoryCount>> {
        self.counts.list_counts(tenant_id, status).await
    }

    pub async fn get_count(&self, tenant_id: Uuid, count_id: Uuid) -> Result<InventoryCount> {
        self.counts
            .get_count(tenant_id, count_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Count {} not found", count_id)))
    }

    async fn transition(
        &self,
        tenant_id: Uuid,
        count_id: Uuid,
        expected: &[CountStatus],
        target: CountStatus,
        stamp: Option<TransitionStamp>,
        actor: Uuid,
    ) -> Result<InventoryCount> {
        let count = self.get_count(tenant_id, count_id).await?;
        let mut change = StatusChange::new(&count, expected, target, actor);
        if let Some(stamp) = stamp {
            change = change.stamp(stamp);
        }

        let updated = self.counts.apply_transition(tenant_id, count_id, change.into()).await?;
        tracing::info!("{}: {} -> {}", updated.count_number(), count.status, updated.status);
        Ok(updated)
    }

    /// DRAFT -> ACTIVE. Fails with a conflict while another count of the
    /// warehouse is ACTIVE or ON_HOLD.
    pub async fn start_count(&self, tenant_id: Uuid, count_id: Uuid, actor: Uuid) -> Result<InventoryCount> {
        self.transition(
            tenant_id,
            count_id,
            &[CountStatus::Draft],
            CountStatus::Active,
            Some(TransitionStamp::Started),
            actor,
        )
        .await
    }

    pub async fn pause_count(&self, tenant_id: Uuid, count_id: Uuid, actor: Uuid) -> Result<InventoryCount> {
        self.transition(tenant_id, count_id, &[CountStatus::Active], CountStatus::OnHold, None, actor)
            .await
    }

    pub async fn resume_count(&self, tenant_id: Uuid, count_id: Uuid, actor: Uuid) -> Result<InventoryCount> {
        self.transition(tenant_id, count_id, &[CountStatus::OnHold], CountStatus::Active, None, actor)
            .await
    }

    /// ACTIVE or DRAFT -> SUBMITTED. Every item of the current version is
    /// marked APPROVED or VARIANCE; uncounted items count as zero.
    pub async fn complete_count(&self, tenant_id: Uuid, count_id: Uuid, actor: Uuid) -> Result<InventoryCount> {
        let count = self.get_count(tenant_id, count_id).await?;
        let change = StatusChange::new(
            &count,
            &[CountStatus::Active, CountStatus::Draft],
            CountStatus::Submitted,
            actor,
        )
        .stamp(TransitionStamp::Completed);

        let transition = CountTransition {
            settle_current_version: true,
            ..CountTransition::from(change)
        };

        let updated = self.counts.apply_transition(tenant_id, count_id, transition).await?;
        let variant = self
            .counts
            .list_variances(count_id, Some(updated.current_version))
            .await?
            .len();
        tracing::info!(
            "{} v{} submitted, {} items with variance",
            updated.count_number(),
            updated.current_version,
            variant
        );
        Ok(updated)
    }

    /// SUBMITTED -> COMPLETED, recording the approver.
    pub async fn finalize_count(&self, tenant_id: Uuid, count_id: Uuid, actor: Uuid) -> Result<InventoryCount> {
        self.transition(
            tenant_id,
            count_id,
            &[CountStatus::Submitted],
            CountStatus::Completed,
            Some(TransitionStamp::Approved),
            actor,
        )
        .await
    }

    pub async fn close_count(&self, tenant_id: Uuid, count_id: Uuid, actor: Uuid) -> Result<InventoryCount> {
        self.transition(
            tenant_id,
            count_id,
            &[CountStatus::Completed],
            CountStatus::Closed,
            Some(TransitionStamp::Closed),
            actor,
        )
        .await
    }

    /// CLOSED -> COMPLETED, so the count can be resubmitted.
    pub async fn reactivate_count(&self, tenant_id: Uuid, count_id: Uuid, actor: Uuid) -> Result<InventoryCount> {
        self.transition(tenant_id, count_id, &[CountStatus::Closed], CountStatus::Completed, None, actor)
            .await
    }

    pub async fn cancel_count(&self, tenant_id: Uuid, count_id: Uuid, actor: Uuid) -> Result<InventoryCount> {
        self.transition(
            tenant_id,
            count_id,
            &[
                CountStatus::Draft,
                CountStatus::Active,
                CountStatus::OnHold,
                CountStatus::Submitted,
                CountStatus::Completed,
            ],
            CountStatus::Cancelled,
            Some(TransitionStamp::Cancelled),
            actor,
        )
        .await
    }

    /// Permanent delete of a DRAFT or CANCELLED count with everything it owns.
    pub async fn delete_count(&self, tenant_id: Uuid, count_id: Uuid) -> Result<()> {
        let count = self.get_count(tenant_id, count_id).await?;
        self.counts
            .delete_count(tenant_id, count_id, &[CountStatus::Draft, CountStatus::Cancelled])
            .await?;
        tracing::info!("Deleted {}", count.count_number());
        Ok(())
    }

    async fn editable_count(&self, tenant_id: Uuid, count_id: Uuid) -> Result<InventoryCount> {
        let count = self.get_count(tenant_id, count_id).await?;
        if !count.status.accepts_item_changes() {
            return Err(AppError::invalid_state(
                format!("{} or {}", CountStatus::Draft, CountStatus::Active),
                count.status,
            ));
        }
        Ok(count)
    }

    pub async fn list_items(&self, tenant_id: Uuid, count_id: Uuid, version: Option<i32>) -> Result<Vec<CountItem>> {
        let count = self.get_count(tenant_id, count_id).await?;
        self.counts
            .list_items(count_id, Some(version.unwrap_or(count.current_version)))
            .await
    }

    /// Manual entry of one item into the current version.
    pub async fn add_item(
        &self,
        tenant_id: Uuid,
        count_id: Uuid,
        request: AddCountItemRequest,
        actor: Uuid,
    ) -> Result<CountItem> {
        request.validate()?;
        let count = self.editable_count(tenant_id, count_id).await?;

        let now = Utc::now();
        let item = CountItem {
            id: Uuid::new_v4(),
            count_id,
            location_id: request.location_id,
            item_code: request.item_code.trim().to_string(),
            item_name: request.item_name.trim().to_string(),
            uom: request.uom,
            pack_qty: request.pack_qty,
            system_qty: request.system_qty,
            counted_qty: None,
            previous_counted_qty: None,
            version: count.current_version,
            status: CountItemStatus::Pending,
            has_variance: false,
            difference: None,
            variance_percent: None,
            cost: None,
            price: None,
            barcodes: None,
            category: None,
            brand: None,
            counted_by: None,
            counted_at: None,
            created_at: now,
            updated_at: now,
        };

        let item = self.counts.insert_item(item).await?;
        tracing::info!("Added item to {} v{}", count.count_number(), count.current_version);

        match request.counted_qty {
            Some(counted_qty) => self.record(item, counted_qty, actor).await,
            None => Ok(item),
        }
    }

    async fn record(&self, mut item: CountItem, counted_qty: Decimal, actor: Uuid) -> Result<CountItem> {
        if counted_qty.is_sign_negative() && !counted_qty.is_zero() {
            return Err(AppError::InvalidInput("Counted quantity must not be negative".to_string()));
        }

        apply_counted(&mut item, counted_qty);
        item.status = CountItemStatus::Counted;
        item.counted_by = Some(actor);
        item.counted_at = Some(Utc::now());

        let variance = variance_change_for(&item);
        self.counts.record_count(item, variance).await
    }

    /// Records a counted quantity on an item of the current version.
    pub async fn update_item(
        &self,
        tenant_id: Uuid,
        count_id: Uuid,
        item_id: Uuid,
        request: UpdateCountItemRequest,
        actor: Uuid,
    ) -> Result<CountItem> {
        request.validate()?;
        let count = self.editable_count(tenant_id, count_id).await?;
        self.update_in_version(&count, item_id, request.counted_qty, actor).await
    }

    async fn update_in_version(
        &self,
        count: &InventoryCount,
        item_id: Uuid,
        counted_qty: Decimal,
        actor: Uuid,
    ) -> Result<CountItem> {
        let item = self
            .counts
            .get_item(count.id, item_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Count item {} not found", item_id)))?;

        if item.version != count.current_version {
            return Err(AppError::InvalidInput(format!(
                "Item belongs to version {}, current version is {}",
                item.version, count.current_version
            )));
        }

        self.record(item, counted_qty, actor).await
    }

    /// Applies a batch of counted quantities to `version`, which must be
    /// the current one. Entries fail independently.
    pub async fn submit_count(
        &self,
        tenant_id: Uuid,
        count_id: Uuid,
        version: i32,
        request: SubmitCountRequest,
        actor: Uuid,
    ) -> Result<SubmitCountSummary> {
        request.validate()?;
        let count = self.editable_count(tenant_id, count_id).await?;
        if version != count.current_version {
            return Err(AppError::InvalidInput(format!(
                "Version {} is not the current version {}",
                version, count.current_version
            )));
        }

        let mut summary = SubmitCountSummary {
            version,
            updated: 0,
            failed: 0,
            errors: Vec::new(),
        };

        for entry in request.entries {
            match self.update_in_version(&count, entry.item_id, entry.counted_qty, actor).await {
                Ok(_) => summary.updated += 1,
                Err(e) => {
                    tracing::warn!("Count entry for item {} rejected: {}", entry.item_id, e);
                    summary.failed += 1;
                    summary.errors.push(SubmitEntryError {
                        item_id: entry.item_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "{} v{}: {} counts recorded, {} rejected",
            count.count_number(),
            version,
            summary.updated,
            summary.failed
        );
        Ok(summary)
    }

    /// Opens a recount version from SUBMITTED or COMPLETED. Without variant
    /// items nothing changes and `new_version` is `None`.
    pub async fn create_new_version(&self, tenant_id: Uuid, count_id: Uuid, actor: Uuid) -> Result<NewVersionOutcome> {
        let count = self.get_count(tenant_id, count_id).await?;
        let change = StatusChange::new(
            &count,
            &[CountStatus::Submitted, CountStatus::Completed],
            CountStatus::Active,
            actor,
        )
        .bump_version();

        if !change.expected.contains(&count.status) {
            return Err(AppError::invalid_state(change.expected_description(), count.status));
        }

        let items = self.counts.list_items(count_id, Some(count.current_version)).await?;
        let pending = items.iter().filter(|i| i.has_variance).count();

        if pending == 0 {
            tracing::info!("{} has no variance, no recount needed", count.count_number());
            return Ok(NewVersionOutcome {
                success: true,
                new_version: None,
                pending_items: 0,
                carried_items: 0,
                count,
            });
        }

        let next_version = count.current_version + 1;
        let new_items = next_version_items(&items, next_version);
        let carried = new_items.len() - pending;

        let transition = CountTransition {
            new_items,
            ..CountTransition::from(change)
        };
        let updated = self.counts.apply_transition(tenant_id, count_id, transition).await?;

        tracing::info!(
            "{} opened version {}: {} items to recount, {} carried",
            updated.count_number(),
            next_version,
            pending,
            carried
        );

        Ok(NewVersionOutcome {
            success: true,
            new_version: Some(updated.current_version),
            pending_items: pending,
            carried_items: carried,
            count: updated,
        })
    }

    pub async fn version_history(&self, tenant_id: Uuid, count_id: Uuid) -> Result<VersionHistory> {
        let count = self.get_count(tenant_id, count_id).await?;
        let items = self.counts.list_items(count_id, None).await?;
        let reports = self.counts.list_variances(count_id, None).await?;

        let mut by_version: BTreeMap<i32, Vec<&CountItem>> = (1..=count.total_versions).map(|v| (v, Vec::new())).collect();
        for item in &items {
            by_version.entry(item.version).or_default().push(item);
        }

        let versions = by_version
            .iter()
            .map(|(version, items)| {
                let report_count = reports.iter().filter(|r| r.version == *version).count();
                summarize_version(*version, items, report_count)
            })
            .collect();

        Ok(VersionHistory { count, versions })
    }

    pub async fn list_variances(&self, tenant_id: Uuid, count_id: Uuid, version: Option<i32>) -> Result<Vec<VarianceReport>> {
        self.get_count(tenant_id, count_id).await?;
        self.counts.list_variances(count_id, version).await
    }

    /// Approves or rejects a pending variance report with a reason.
    pub async fn resolve_variance(
        &self,
        tenant_id: Uuid,
        count_id: Uuid,
        report_id: Uuid,
        request: ResolveVarianceRequest,
        actor: Uuid,
    ) -> Result<VarianceReport> {
        request.validate()?;
        let count = self.get_count(tenant_id, count_id).await?;
        if !matches!(count.status, CountStatus::Submitted | CountStatus::Completed) {
            return Err(AppError::invalid_state(
                format!("{} or {}", CountStatus::Submitted, CountStatus::Completed),
                count.status,
            ));
        }

        let mut report = self
            .counts
            .get_variance(count_id, report_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Variance report {} not found", report_id)))?;

        if report.status != VarianceStatus::Pending {
            return Err(AppError::invalid_state(VarianceStatus::Pending.as_str(), report.status.as_str()));
        }

        report.status = if request.approve {
            VarianceStatus::Approved
        } else {
            VarianceStatus::Rejected
        };
        report.resolution = Some(request.reason);
        report.resolved_by = Some(actor);
        report.resolved_at = Some(Utc::now());

        let saved = self.counts.save_variance(report).await?;
        tracing::info!(
            "Variance report {} of {} {}",
            saved.id,
            count.count_number(),
            saved.status.as_str()
        );
        Ok(saved)
    }
}
