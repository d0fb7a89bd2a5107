use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStrategy {
    /// Overwrite the ERP quantity with the counted quantity.
    Replace,
    /// Add the variance to the ERP's current quantity.
    Add,
}

impl SyncStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStrategy::Replace => "REPLACE",
            SyncStrategy::Add => "ADD",
        }
    }
}

impl FromStr for SyncStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REPLACE" => Ok(SyncStrategy::Replace),
            "ADD" => Ok(SyncStrategy::Add),
            other => Err(format!("Unknown sync strategy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Success,
    Partial,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "SUCCESS",
            SyncStatus::Partial => "PARTIAL",
            SyncStatus::Failed => "FAILED",
        }
    }

    pub fn from_counts(synced: usize, failed: usize) -> Self {
        match (synced, failed) {
            (_, 0) => SyncStatus::Success,
            (0, _) => SyncStatus::Failed,
            _ => SyncStatus::Partial,
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(SyncStatus::Success),
            "PARTIAL" => Ok(SyncStatus::Partial),
            "FAILED" => Ok(SyncStatus::Failed),
            other => Err(format!("Unknown sync status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItemDetail {
    pub count_item_id: Uuid,
    pub item_code: String,
    /// Quantity (REPLACE) or delta (ADD) sent to the ERP.
    pub value: Decimal,
    pub success: bool,
    pub error: Option<String>,
}

/// Append-only record of one write-back attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncHistory {
    pub id: Uuid,
    pub count_id: Uuid,
    pub version: i32,
    pub status: SyncStatus,
    pub strategy: SyncStrategy,
    pub items_synced: i32,
    pub items_failed: i32,
    pub details: Vec<SyncItemDetail>,
    pub duration_ms: i64,
    pub triggered_by: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Where approved quantities are written in the ERP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteBackTarget {
    pub table: String,
    pub quantity_column: String,
    pub key_column: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SendToErpRequest {
    pub strategy: SyncStrategy,
    /// Defaults to the target derived from the active STOCK mapping.
    #[serde(default)]
    pub target: Option<WriteBackTarget>,
    /// Defaults to the connection of the active STOCK mapping.
    #[serde(default)]
    pub erp_connection_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub success: bool,
    pub items_synced: i32,
    pub items_failed: i32,
    pub history: SyncHistory,
    pub count: crate::models::count::InventoryCount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_counts() {
        assert_eq!(SyncStatus::from_counts(3, 0), SyncStatus::Success);
        assert_eq!(SyncStatus::from_counts(0, 0), SyncStatus::Success);
        assert_eq!(SyncStatus::from_counts(1, 1), SyncStatus::Partial);
        assert_eq!(SyncStatus::from_counts(0, 2), SyncStatus::Failed);
    }
}
