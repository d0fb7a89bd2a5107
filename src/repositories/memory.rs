//! In-process storage backing both repository traits.
//!
//! Every check-and-set runs under a single write lock, mirroring the
//! uniqueness constraints of the Postgres schema.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::middleware::error_handling::{AppError, Result};
use crate::models::count::{
    apply_counted, settle_items, CountItem, CountStatus, InventoryCount, UpsertOutcome, VarianceReport,
    VarianceStatus,
};
use crate::models::mapping::{DatasetType, MappingConfig};
use crate::models::sync::SyncHistory;
use crate::repositories::{
    apply_change, check_change, check_item_write, variance_change_for, CountRepository, CountTransition,
    MappingConfigRepository, NewCount, VarianceChange, WAREHOUSE_BUSY,
};

#[derive(Default)]
struct MemoryState {
    counts: HashMap<Uuid, InventoryCount>,
    items: HashMap<Uuid, CountItem>,
    variances: HashMap<Uuid, VarianceReport>,
    sync_history: Vec<SyncHistory>,
    mappings: HashMap<Uuid, MappingConfig>,
}

impl MemoryState {
    fn count(&self, tenant_id: Uuid, count_id: Uuid) -> Result<&InventoryCount> {
        self.counts
            .get(&count_id)
            .filter(|c| c.tenant_id == tenant_id)
            .ok_or_else(|| AppError::NotFound(format!("Count {} not found", count_id)))
    }

    fn writable_count(&self, count_id: Uuid, version: i32) -> Result<()> {
        let count = self
            .counts
            .get(&count_id)
            .ok_or_else(|| AppError::NotFound(format!("Count {} not found", count_id)))?;
        check_item_write(count, version)
    }

    fn item_by_key(&self, item: &CountItem) -> Option<&CountItem> {
        self.items.values().find(|existing| {
            existing.count_id == item.count_id
                && existing.location_id == item.location_id
                && existing.item_code == item.item_code
                && existing.version == item.version
        })
    }

    fn warehouse_busy(&self, count: &InventoryCount) -> bool {
        self.counts.values().any(|other| {
            other.id != count.id
                && other.tenant_id == count.tenant_id
                && other.warehouse_id == count.warehouse_id
                && other.status.is_open()
        })
    }

    fn upsert_variance(&mut self, mut report: VarianceReport) -> VarianceReport {
        let existing = self
            .variances
            .values()
            .find(|r| r.count_item_id == report.count_item_id && r.version == report.version)
            .map(|r| (r.id, r.created_at));

        if let Some((id, created_at)) = existing {
            report.id = id;
            report.created_at = created_at;
        }
        self.variances.insert(report.id, report.clone());
        report
    }

    fn apply_variance_change(&mut self, item: &CountItem, variance: VarianceChange) {
        match variance {
            VarianceChange::Upsert(report) => {
                self.upsert_variance(report);
            }
            VarianceChange::Clear => {
                self.variances.retain(|_, r| {
                    !(r.count_item_id == item.id && r.version == item.version && r.status == VarianceStatus::Pending)
                });
            }
        }
    }

    fn deactivate_siblings(&mut self, config: &MappingConfig) {
        let now = Utc::now();
        for other in self.mappings.values_mut() {
            if other.id != config.id
                && other.tenant_id == config.tenant_id
                && other.dataset_type == config.dataset_type
                && other.is_active
            {
                other.is_active = false;
                other.updated_at = now;
            }
        }
    }
}

pub struct MemoryStore {
    state: RwLock<MemoryState>,
    sequence: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            sequence: AtomicI64::new(0),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CountRepository for MemoryStore {
    async fn create_count(&self, new: NewCount) -> Result<InventoryCount> {
        let now = Utc::now();
        let count = InventoryCount {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            warehouse_id: new.warehouse_id,
            sequence_number: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            name: new.name,
            notes: new.notes,
            status: CountStatus::Draft,
            current_version: 1,
            total_versions: 1,
            created_by: new.created_by,
            created_at: now,
            started_by: None,
            started_at: None,
            completed_by: None,
            completed_at: None,
            approved_by: None,
            approved_at: None,
            closed_by: None,
            closed_at: None,
            cancelled_by: None,
            cancelled_at: None,
            updated_at: now,
        };

        self.state.write().await.counts.insert(count.id, count.clone());
        Ok(count)
    }

    async fn get_count(&self, tenant_id: Uuid, count_id: Uuid) -> Result<Option<InventoryCount>> {
        let state = self.state.read().await;
        Ok(state.count(tenant_id, count_id).ok().cloned())
    }

    async fn list_counts(&self, tenant_id: Uuid, status: Option<CountStatus>) -> Result<Vec<InventoryCount>> {
        let state = self.state.read().await;
        let mut counts: Vec<InventoryCount> = state
            .counts
            .values()
            .filter(|c| c.tenant_id == tenant_id && status.map_or(true, |s| c.status == s))
            .cloned()
            .collect();
        counts.sort_by(|a, b| b.sequence_number.cmp(&a.sequence_number));
        Ok(counts)
    }

    async fn apply_transition(
        &self,
        tenant_id: Uuid,
        count_id: Uuid,
        transition: CountTransition,
    ) -> Result<InventoryCount> {
        let mut state = self.state.write().await;
        let mut count = state.count(tenant_id, count_id)?.clone();

        check_change(&count, &transition.change)?;
        if transition.change.target.is_open() && state.warehouse_busy(&count) {
            return Err(AppError::Conflict(WAREHOUSE_BUSY.to_string()));
        }
        for item in &transition.new_items {
            if state.item_by_key(item).is_some() {
                return Err(AppError::Conflict(format!(
                    "Item {} already exists in version {}",
                    item.item_code, item.version
                )));
            }
        }

        let now = Utc::now();
        let mut settled = Vec::new();
        let mut reports = transition.variance_reports;
        if transition.settle_current_version {
            settled = state
                .items
                .values()
                .filter(|i| i.count_id == count.id && i.version == count.current_version)
                .cloned()
                .collect();
            reports.extend(settle_items(&mut settled, transition.change.actor, now));
        }

        apply_change(&mut count, &transition.change, now);
        state.counts.insert(count.id, count.clone());

        for mut item in settled {
            item.updated_at = now;
            state.items.insert(item.id, item);
        }
        for mut item in transition.new_items {
            item.updated_at = now;
            state.items.insert(item.id, item);
        }
        for report in reports {
            state.upsert_variance(report);
        }

        Ok(count)
    }

    async fn delete_count(&self, tenant_id: Uuid, count_id: Uuid, allowed: &[CountStatus]) -> Result<()> {
        let mut state = self.state.write().await;
        let status = state.count(tenant_id, count_id)?.status;
        if !allowed.contains(&status) {
            let expected = allowed.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(" or ");
            return Err(AppError::invalid_state(expected, status));
        }

        state.counts.remove(&count_id);
        state.items.retain(|_, item| item.count_id != count_id);
        state.variances.retain(|_, report| report.count_id != count_id);
        state.sync_history.retain(|history| history.count_id != count_id);
        Ok(())
    }

    async fn upsert_item(&self, item: CountItem) -> Result<(CountItem, UpsertOutcome)> {
        let mut state = self.state.write().await;
        state.writable_count(item.count_id, item.version)?;

        let existing = match state.item_by_key(&item).cloned() {
            Some(existing) => existing,
            None => {
                state.items.insert(item.id, item.clone());
                return Ok((item, UpsertOutcome::Inserted));
            }
        };

        let mut refreshed = CountItem {
            item_name: item.item_name,
            uom: item.uom,
            pack_qty: item.pack_qty,
            system_qty: item.system_qty,
            cost: item.cost,
            price: item.price,
            barcodes: item.barcodes,
            category: item.category,
            brand: item.brand,
            updated_at: Utc::now(),
            ..existing
        };
        if let Some(counted_qty) = refreshed.counted_qty {
            apply_counted(&mut refreshed, counted_qty);
            let variance = variance_change_for(&refreshed);
            state.apply_variance_change(&refreshed, variance);
        }
        state.items.insert(refreshed.id, refreshed.clone());
        Ok((refreshed, UpsertOutcome::Updated))
    }

    async fn insert_item(&self, item: CountItem) -> Result<CountItem> {
        let mut state = self.state.write().await;
        state.writable_count(item.count_id, item.version)?;
        if state.item_by_key(&item).is_some() {
            return Err(AppError::Conflict(format!(
                "Item {} already exists at this location in version {}",
                item.item_code, item.version
            )));
        }
        state.items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn get_item(&self, count_id: Uuid, item_id: Uuid) -> Result<Option<CountItem>> {
        let state = self.state.read().await;
        Ok(state.items.get(&item_id).filter(|i| i.count_id == count_id).cloned())
    }

    async fn list_items(&self, count_id: Uuid, version: Option<i32>) -> Result<Vec<CountItem>> {
        let state = self.state.read().await;
        let mut items: Vec<CountItem> = state
            .items
            .values()
            .filter(|i| i.count_id == count_id && version.map_or(true, |v| i.version == v))
            .cloned()
            .collect();
        items.sort_by(|a, b| (a.version, &a.item_code, a.location_id).cmp(&(b.version, &b.item_code, b.location_id)));
        Ok(items)
    }

    async fn record_count(&self, mut item: CountItem, variance: VarianceChange) -> Result<CountItem> {
        let mut state = self.state.write().await;
        let version = match state.items.get(&item.id).filter(|i| i.count_id == item.count_id) {
            Some(stored) => stored.version,
            None => return Err(AppError::NotFound(format!("Count item {} not found", item.id))),
        };
        state.writable_count(item.count_id, version)?;

        item.updated_at = Utc::now();
        state.items.insert(item.id, item.clone());
        state.apply_variance_change(&item, variance);

        Ok(item)
    }

    async fn list_variances(&self, count_id: Uuid, version: Option<i32>) -> Result<Vec<VarianceReport>> {
        let state = self.state.read().await;
        let mut reports: Vec<VarianceReport> = state
            .variances
            .values()
            .filter(|r| r.count_id == count_id && version.map_or(true, |v| r.version == v))
            .cloned()
            .collect();
        reports.sort_by(|a, b| (a.version, &a.item_code).cmp(&(b.version, &b.item_code)));
        Ok(reports)
    }

    async fn get_variance(&self, count_id: Uuid, report_id: Uuid) -> Result<Option<VarianceReport>> {
        let state = self.state.read().await;
        Ok(state.variances.get(&report_id).filter(|r| r.count_id == count_id).cloned())
    }

    async fn save_variance(&self, mut report: VarianceReport) -> Result<VarianceReport> {
        let mut state = self.state.write().await;
        if !state.variances.contains_key(&report.id) {
            return Err(AppError::NotFound(format!("Variance report {} not found", report.id)));
        }
        report.updated_at = Utc::now();
        state.variances.insert(report.id, report.clone());
        Ok(report)
    }

    async fn insert_sync_history(&self, history: &SyncHistory) -> Result<()> {
        self.state.write().await.sync_history.push(history.clone());
        Ok(())
    }

    async fn list_sync_history(&self, count_id: Uuid) -> Result<Vec<SyncHistory>> {
        let state = self.state.read().await;
        let mut history: Vec<SyncHistory> = state
            .sync_history
            .iter()
            .filter(|h| h.count_id == count_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(history)
    }
}

#[async_trait]
impl MappingConfigRepository for MemoryStore {
    async fn create(&self, config: MappingConfig) -> Result<MappingConfig> {
        let mut state = self.state.write().await;
        if config.is_active {
            state.deactivate_siblings(&config);
        }
        state.mappings.insert(config.id, config.clone());
        Ok(config)
    }

    async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<MappingConfig>> {
        let state = self.state.read().await;
        Ok(state.mappings.get(&id).filter(|m| m.tenant_id == tenant_id).cloned())
    }

    async fn list(&self, tenant_id: Uuid, dataset_type: Option<DatasetType>) -> Result<Vec<MappingConfig>> {
        let state = self.state.read().await;
        let mut configs: Vec<MappingConfig> = state
            .mappings
            .values()
            .filter(|m| m.tenant_id == tenant_id && dataset_type.map_or(true, |d| m.dataset_type == d))
            .cloned()
            .collect();
        configs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(configs)
    }

    async fn update(&self, config: MappingConfig) -> Result<MappingConfig> {
        let mut state = self.state.write().await;
        match state.mappings.get(&config.id) {
            Some(existing) if existing.tenant_id == config.tenant_id => {}
            _ => return Err(AppError::NotFound(format!("Mapping config {} not found", config.id))),
        }
        if config.is_active {
            state.deactivate_siblings(&config);
        }
        state.mappings.insert(config.id, config.clone());
        Ok(config)
    }

    async fn set_active(&self, tenant_id: Uuid, id: Uuid, active: bool) -> Result<MappingConfig> {
        let mut state = self.state.write().await;
        let mut config = state
            .mappings
            .get(&id)
            .filter(|m| m.tenant_id == tenant_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Mapping config {} not found", id)))?;

        if active {
            state.deactivate_siblings(&config);
        }
        config.is_active = active;
        config.updated_at = Utc::now();
        state.mappings.insert(config.id, config.clone());
        Ok(config)
    }

    async fn find_active(&self, tenant_id: Uuid, dataset_type: DatasetType) -> Result<Option<MappingConfig>> {
        let state = self.state.read().await;
        Ok(state
            .mappings
            .values()
            .find(|m| m.tenant_id == tenant_id && m.dataset_type == dataset_type && m.is_active)
            .cloned())
    }
}
