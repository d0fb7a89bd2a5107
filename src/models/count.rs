use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CountStatus {
    Draft,
    Active,
    OnHold,
    Submitted,
    Completed,
    Closed,
    Cancelled,
}

impl CountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CountStatus::Draft => "DRAFT",
            CountStatus::Active => "ACTIVE",
            CountStatus::OnHold => "ON_HOLD",
            CountStatus::Submitted => "SUBMITTED",
            CountStatus::Completed => "COMPLETED",
            CountStatus::Closed => "CLOSED",
            CountStatus::Cancelled => "CANCELLED",
        }
    }

    /// ACTIVE and ON_HOLD counts occupy their warehouse.
    pub fn is_open(&self) -> bool {
        matches!(self, CountStatus::Active | CountStatus::OnHold)
    }

    /// Items may be loaded, added or counted.
    pub fn accepts_item_changes(&self) -> bool {
        matches!(self, CountStatus::Draft | CountStatus::Active)
    }
}

impl fmt::Display for CountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(CountStatus::Draft),
            "ACTIVE" => Ok(CountStatus::Active),
            "ON_HOLD" => Ok(CountStatus::OnHold),
            "SUBMITTED" => Ok(CountStatus::Submitted),
            "COMPLETED" => Ok(CountStatus::Completed),
            "CLOSED" => Ok(CountStatus::Closed),
            "CANCELLED" => Ok(CountStatus::Cancelled),
            other => Err(format!("Unknown count status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CountItemStatus {
    /// Waiting to be counted (fresh load or queued for recount).
    Pending,
    Counted,
    /// Matched the system quantity at completion.
    Approved,
    Variance,
    /// Carried into a recount version without needing a recount.
    Completed,
}

impl CountItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CountItemStatus::Pending => "PENDING",
            CountItemStatus::Counted => "COUNTED",
            CountItemStatus::Approved => "APPROVED",
            CountItemStatus::Variance => "VARIANCE",
            CountItemStatus::Completed => "COMPLETED",
        }
    }
}

impl FromStr for CountItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(CountItemStatus::Pending),
            "COUNTED" => Ok(CountItemStatus::Counted),
            "APPROVED" => Ok(CountItemStatus::Approved),
            "VARIANCE" => Ok(CountItemStatus::Variance),
            "COMPLETED" => Ok(CountItemStatus::Completed),
            other => Err(format!("Unknown count item status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VarianceStatus {
    Pending,
    Approved,
    Rejected,
}

impl VarianceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VarianceStatus::Pending => "PENDING",
            VarianceStatus::Approved => "APPROVED",
            VarianceStatus::Rejected => "REJECTED",
        }
    }
}

impl FromStr for VarianceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(VarianceStatus::Pending),
            "APPROVED" => Ok(VarianceStatus::Approved),
            "REJECTED" => Ok(VarianceStatus::Rejected),
            other => Err(format!("Unknown variance status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryCount {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub warehouse_id: Uuid,
    pub sequence_number: i64,
    pub name: Option<String>,
    pub notes: Option<String>,
    pub status: CountStatus,
    pub current_version: i32,
    pub total_versions: i32,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub started_by: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_by: Option<Uuid>,
    pub completed_at: Option<DateTime<Utc>>,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub closed_by: Option<Uuid>,
    pub closed_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryCount {
    /// Human-readable reference, e.g. `CNT-000042`.
    pub fn count_number(&self) -> String {
        format!("CNT-{:06}", self.sequence_number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountItem {
    pub id: Uuid,
    pub count_id: Uuid,
    pub location_id: Uuid,
    pub item_code: String,
    pub item_name: String,
    pub uom: Option<String>,
    pub pack_qty: Option<Decimal>,
    pub system_qty: Decimal,
    pub counted_qty: Option<Decimal>,
    /// Counted quantity of the previous version, kept as a recount reference.
    pub previous_counted_qty: Option<Decimal>,
    pub version: i32,
    pub status: CountItemStatus,
    pub has_variance: bool,
    pub difference: Option<Decimal>,
    pub variance_percent: Option<Decimal>,
    pub cost: Option<Decimal>,
    pub price: Option<Decimal>,
    pub barcodes: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub counted_by: Option<Uuid>,
    pub counted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceReport {
    pub id: Uuid,
    pub count_id: Uuid,
    pub count_item_id: Uuid,
    pub version: i32,
    pub item_code: String,
    pub system_qty: Decimal,
    pub counted_qty: Decimal,
    pub difference: Decimal,
    pub variance_percent: Decimal,
    pub status: VarianceStatus,
    pub resolution: Option<String>,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of an idempotent item upsert keyed by
/// `(count_id, location_id, item_code, version)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Difference relative to the system quantity, in percent with two
/// decimals. A zero system quantity yields 0 when nothing was counted and
/// 100 otherwise.
pub fn variance_percent(system_qty: Decimal, counted_qty: Decimal) -> Decimal {
    if system_qty.is_zero() {
        return if counted_qty.is_zero() { Decimal::ZERO } else { HUNDRED };
    }
    ((counted_qty - system_qty) / system_qty * HUNDRED).round_dp(2)
}

/// Records `counted_qty` on the item and refreshes its variance fields.
pub fn apply_counted(item: &mut CountItem, counted_qty: Decimal) {
    let difference = counted_qty - item.system_qty;
    item.counted_qty = Some(counted_qty);
    item.difference = Some(difference);
    item.variance_percent = Some(variance_percent(item.system_qty, counted_qty));
    item.has_variance = !difference.is_zero();
}

/// Pending report for a variant item of `version`.
pub fn variance_report(item: &CountItem) -> Option<VarianceReport> {
    if !item.has_variance {
        return None;
    }
    let counted_qty = item.counted_qty?;
    let now = Utc::now();
    Some(VarianceReport {
        id: Uuid::new_v4(),
        count_id: item.count_id,
        count_item_id: item.id,
        version: item.version,
        item_code: item.item_code.clone(),
        system_qty: item.system_qty,
        counted_qty,
        difference: counted_qty - item.system_qty,
        variance_percent: variance_percent(item.system_qty, counted_qty),
        status: VarianceStatus::Pending,
        resolution: None,
        resolved_by: None,
        resolved_at: None,
        created_at: now,
        updated_at: now,
    })
}

/// Closes a version for review: uncounted items count as zero on behalf of
/// `actor`, every item ends APPROVED or VARIANCE, and a pending report is
/// returned for each variant item.
pub fn settle_items(items: &mut [CountItem], actor: Uuid, now: DateTime<Utc>) -> Vec<VarianceReport> {
    let mut reports = Vec::new();
    for item in items.iter_mut() {
        let counted_qty = match item.counted_qty {
            Some(qty) => qty,
            None => {
                item.counted_by = Some(actor);
                item.counted_at = Some(now);
                Decimal::ZERO
            }
        };
        apply_counted(item, counted_qty);
        item.status = if item.has_variance {
            CountItemStatus::Variance
        } else {
            CountItemStatus::Approved
        };
        reports.extend(variance_report(item));
    }
    reports
}

fn validate_non_negative(qty: &Decimal) -> Result<(), ValidationError> {
    if qty.is_sign_negative() && !qty.is_zero() {
        return Err(ValidationError::new("non_negative_quantity"));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateCountRequest {
    pub warehouse_id: Uuid,
    #[validate(length(max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct UpdateCountItemRequest {
    #[validate(custom(function = validate_non_negative))]
    pub counted_qty: Decimal,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AddCountItemRequest {
    pub location_id: Uuid,
    #[validate(length(min = 1, max = 100, message = "Item code required"))]
    pub item_code: String,
    #[validate(length(min = 1, max = 300, message = "Item name required"))]
    pub item_name: String,
    pub uom: Option<String>,
    pub pack_qty: Option<Decimal>,
    #[serde(default)]
    pub system_qty: Decimal,
    pub counted_qty: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubmitCountEntry {
    pub item_id: Uuid,
    pub counted_qty: Decimal,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SubmitCountRequest {
    #[validate(length(min = 1, message = "At least one entry required"))]
    pub entries: Vec<SubmitCountEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitEntryError {
    pub item_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitCountSummary {
    pub version: i32,
    pub updated: usize,
    pub failed: usize,
    pub errors: Vec<SubmitEntryError>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ResolveVarianceRequest {
    pub approve: bool,
    #[validate(length(min = 1, max = 1000, message = "Reason required"))]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVersionOutcome {
    pub success: bool,
    /// `None` when no item had a variance and no recount was needed.
    pub new_version: Option<i32>,
    pub pending_items: usize,
    pub carried_items: usize,
    pub count: InventoryCount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSummary {
    pub version: i32,
    pub total_items: usize,
    pub counted_items: usize,
    pub pending_items: usize,
    pub variance_items: usize,
    pub variance_reports: usize,
    pub net_difference: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionHistory {
    pub count: InventoryCount,
    pub versions: Vec<VersionSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            CountStatus::Draft,
            CountStatus::Active,
            CountStatus::OnHold,
            CountStatus::Submitted,
            CountStatus::Completed,
            CountStatus::Closed,
            CountStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<CountStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_open_statuses() {
        assert!(CountStatus::Active.is_open());
        assert!(CountStatus::OnHold.is_open());
        assert!(!CountStatus::Draft.is_open());
        assert!(!CountStatus::Submitted.is_open());
    }

    #[test]
    fn test_negative_counted_qty_rejected() {
        let request = UpdateCountItemRequest { counted_qty: dec!(-1) };
        assert!(request.validate().is_err());

        let request = UpdateCountItemRequest { counted_qty: dec!(0) };
        assert!(request.validate().is_ok());
    }
}
