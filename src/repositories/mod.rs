pub mod count_repo;
pub mod mapping_repo;
pub mod memory;

pub use count_repo::*;
pub use mapping_repo::*;
pub use memory::*;

use async_trait::async_trait;
use uuid::Uuid;

use crate::middleware::error_handling::Result;
use crate::models::count::{CountItem, CountStatus, InventoryCount, UpsertOutcome, VarianceReport};
use crate::models::mapping::{DatasetType, MappingConfig};
use crate::models::sync::SyncHistory;

/// Actor/timestamp pair set by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionStamp {
    Started,
    Completed,
    Approved,
    Closed,
    Cancelled,
}

/// Compare-and-set on a count's status and version.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub expected: Vec<CountStatus>,
    pub expected_version: i32,
    pub target: CountStatus,
    pub actor: Uuid,
    pub stamp: Option<TransitionStamp>,
    /// Increments `current_version` and `total_versions`.
    pub bump_version: bool,
}

impl StatusChange {
    pub fn new(count: &InventoryCount, expected: &[CountStatus], target: CountStatus, actor: Uuid) -> Self {
        Self {
            expected: expected.to_vec(),
            expected_version: count.current_version,
            target,
            actor,
            stamp: None,
            bump_version: false,
        }
    }

    pub fn stamp(mut self, stamp: TransitionStamp) -> Self {
        self.stamp = Some(stamp);
        self
    }

    pub fn bump_version(mut self) -> Self {
        self.bump_version = true;
        self
    }

    /// `"ACTIVE or DRAFT"` style description for invalid-state errors.
    pub fn expected_description(&self) -> String {
        self.expected
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

/// A status change applied together with its item and variance writes, all
/// or nothing.
#[derive(Debug, Clone)]
pub struct CountTransition {
    pub change: StatusChange,
    pub new_items: Vec<CountItem>,
    pub variance_reports: Vec<VarianceReport>,
    /// Settles the current version's items as stored under the count lock
    /// (see `settle_items`), on behalf of the change's actor.
    pub settle_current_version: bool,
}

impl From<StatusChange> for CountTransition {
    fn from(change: StatusChange) -> Self {
        Self {
            change,
            new_items: Vec::new(),
            variance_reports: Vec::new(),
            settle_current_version: false,
        }
    }
}

/// What happens to an item's variance report when its counted quantity is
/// recorded.
#[derive(Debug, Clone)]
pub enum VarianceChange {
    Upsert(VarianceReport),
    /// Removes a still-pending report once the difference is back to zero.
    Clear,
}

#[derive(Debug, Clone)]
pub struct NewCount {
    pub tenant_id: Uuid,
    pub warehouse_id: Uuid,
    pub name: Option<String>,
    pub notes: Option<String>,
    pub created_by: Uuid,
}

#[async_trait]
pub trait CountRepository: Send + Sync {
    /// Creates a DRAFT count with the next global sequence number.
    async fn create_count(&self, new: NewCount) -> Result<InventoryCount>;

    async fn get_count(&self, tenant_id: Uuid, count_id: Uuid) -> Result<Option<InventoryCount>>;

    async fn list_counts(&self, tenant_id: Uuid, status: Option<CountStatus>) -> Result<Vec<InventoryCount>>;

    /// Fails with `InvalidState` when the stored status is not one of
    /// `expected`, and with `Conflict` when the version moved or another
    /// count already occupies the warehouse.
    async fn apply_transition(
        &self,
        tenant_id: Uuid,
        count_id: Uuid,
        transition: CountTransition,
    ) -> Result<InventoryCount>;

    /// Deletes the count with its items, variance reports and sync history,
    /// provided its status is one of `allowed`.
    async fn delete_count(&self, tenant_id: Uuid, count_id: Uuid, allowed: &[CountStatus]) -> Result<()>;

    /// Insert or refresh keyed by `(count_id, location_id, item_code,
    /// version)`. A recorded `counted_qty` is never overwritten.
    async fn upsert_item(&self, item: CountItem) -> Result<(CountItem, UpsertOutcome)>;

    /// Plain insert; a duplicate key is a `Conflict`.
    async fn insert_item(&self, item: CountItem) -> Result<CountItem>;

    async fn get_item(&self, count_id: Uuid, item_id: Uuid) -> Result<Option<CountItem>>;

    async fn list_items(&self, count_id: Uuid, version: Option<i32>) -> Result<Vec<CountItem>>;

    /// Persists the counted fields of an item together with its variance
    /// report change.
    async fn record_count(&self, item: CountItem, variance: VarianceChange) -> Result<CountItem>;

    async fn list_variances(&self, count_id: Uuid, version: Option<i32>) -> Result<Vec<VarianceReport>>;

    async fn get_variance(&self, count_id: Uuid, report_id: Uuid) -> Result<Option<VarianceReport>>;

    async fn save_variance(&self, report: VarianceReport) -> Result<VarianceReport>;

    async fn insert_sync_history(&self, history: &SyncHistory) -> Result<()>;

    async fn list_sync_history(&self, count_id: Uuid) -> Result<Vec<SyncHistory>>;
}

#[async_trait]
pub trait MappingConfigRepository: Send + Sync {
    /// Inserts a config. When it is active, siblings of the same
    /// `(tenant, dataset_type)` are deactivated in the same step.
    async fn create(&self, config: MappingConfig) -> Result<MappingConfig>;

    async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<MappingConfig>>;

    async fn list(&self, tenant_id: Uuid, dataset_type: Option<DatasetType>) -> Result<Vec<MappingConfig>>;

    async fn update(&self, config: MappingConfig) -> Result<MappingConfig>;

    async fn set_active(&self, tenant_id: Uuid, id: Uuid, active: bool) -> Result<MappingConfig>;

    async fn find_active(&self, tenant_id: Uuid, dataset_type: DatasetType) -> Result<Option<MappingConfig>>;
}

pub(crate) const WAREHOUSE_BUSY: &str = "Another count is already active or on hold for this warehouse";

/// Checks a status change against the stored count.
pub(crate) fn check_change(count: &InventoryCount, change: &StatusChange) -> Result<()> {
    if !change.expected.contains(&count.status) {
        return Err(crate::middleware::error_handling::AppError::invalid_state(
            change.expected_description(),
            count.status,
        ));
    }
    if count.current_version != change.expected_version {
        return Err(crate::middleware::error_handling::AppError::Conflict(format!(
            "Count {} moved to version {} concurrently",
            count.count_number(),
            count.current_version
        )));
    }
    Ok(())
}

/// Item writes need a DRAFT or ACTIVE count and must target its current
/// version.
pub(crate) fn check_item_write(count: &InventoryCount, version: i32) -> Result<()> {
    if !count.status.accepts_item_changes() {
        return Err(crate::middleware::error_handling::AppError::invalid_state(
            format!("{} or {}", CountStatus::Draft, CountStatus::Active),
            count.status,
        ));
    }
    if count.current_version != version {
        return Err(crate::middleware::error_handling::AppError::Conflict(format!(
            "Item belongs to version {}, {} is at version {}",
            version,
            count.count_number(),
            count.current_version
        )));
    }
    Ok(())
}

/// Report change matching an item's freshly computed variance fields.
pub(crate) fn variance_change_for(item: &CountItem) -> VarianceChange {
    match crate::models::count::variance_report(item) {
        Some(report) => VarianceChange::Upsert(report),
        None => VarianceChange::Clear,
    }
}

/// Applies a checked status change to an in-memory snapshot.
pub(crate) fn apply_change(count: &mut InventoryCount, change: &StatusChange, now: chrono::DateTime<chrono::Utc>) {
    count.status = change.target;
    if change.bump_version {
        count.current_version += 1;
        count.total_versions += 1;
    }
    let actor = Some(change.actor);
    match change.stamp {
        Some(TransitionStamp::Started) => {
            count.started_by = actor;
            count.started_at = Some(now);
        }
        Some(TransitionStamp::Completed) => {
            count.completed_by = actor;
            count.completed_at = Some(now);
        }
        Some(TransitionStamp::Approved) => {
            count.approved_by = actor;
            count.approved_at = Some(now);
        }
        Some(TransitionStamp::Closed) => {
            count.closed_by = actor;
            count.closed_at = Some(now);
        }
        Some(TransitionStamp::Cancelled) => {
            count.cancelled_by = actor;
            count.cancelled_at = Some(now);
        }
        None => {}
    }
    count.updated_at = now;
}
