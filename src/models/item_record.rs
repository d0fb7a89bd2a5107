use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical item produced from an ERP row or an imported file row.
///
/// Empty strings never appear in the optional fields; the transform stage
/// turns them into `None` so "first non-empty" is simply `Option::or`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub item_code: String,
    pub item_name: Option<String>,
    pub system_qty: Option<Decimal>,
    pub uom: Option<String>,
    pub pack_qty: Option<Decimal>,
    pub cost: Option<Decimal>,
    pub price: Option<Decimal>,
    pub barcodes: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
}

impl ItemRecord {
    pub fn new(item_code: impl Into<String>) -> Self {
        Self {
            item_code: item_code.into(),
            ..Default::default()
        }
    }

    /// Folds a second row for the same item into this one: quantities are
    /// summed, descriptive fields keep the first non-empty value.
    ///
    /// The operation is associative, so grouping of a fan-out join never
    /// changes the merged result.
    pub fn merge(self, other: ItemRecord) -> ItemRecord {
        let system_qty = match (self.system_qty, other.system_qty) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };

        ItemRecord {
            item_code: self.item_code,
            item_name: self.item_name.or(other.item_name),
            system_qty,
            uom: self.uom.or(other.uom),
            pack_qty: self.pack_qty.or(other.pack_qty),
            cost: self.cost.or(other.cost),
            price: self.price.or(other.price),
            barcodes: self.barcodes.or(other.barcodes),
            category: self.category.or(other.category),
            brand: self.brand.or(other.brand),
        }
    }

    /// Display name, falling back to the code for items without one.
    pub fn display_name(&self) -> &str {
        self.item_name.as_deref().unwrap_or(&self.item_code)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    /// 1-based row number in the source, header row included.
    pub row: usize,
    pub message: String,
}

/// Where a load took its rows from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    /// A mapping named in the request.
    Mapping,
    /// The tenant's active ITEMS + STOCK (+ COST, PRICE) mappings.
    ConfiguredMappings,
    /// Direct single-table read of `ERP_LEGACY_ITEMS_TABLE`.
    LegacyTable,
    /// Nothing could be loaded; items are entered by hand.
    ManualEntry,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadAttempt {
    pub source: LoadSource,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadItemError {
    pub item_code: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadSummary {
    pub source: LoadSource,
    pub version: i32,
    pub rows_read: usize,
    /// Rows without a usable item code.
    pub rows_dropped: usize,
    pub items: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    pub errors: Vec<LoadItemError>,
    pub row_errors: Vec<RowError>,
    pub attempts: Vec<LoadAttempt>,
}

impl LoadSummary {
    pub fn new(source: LoadSource, version: i32) -> Self {
        Self {
            source,
            version,
            rows_read: 0,
            rows_dropped: 0,
            items: 0,
            inserted: 0,
            updated: 0,
            failed: 0,
            errors: Vec::new(),
            row_errors: Vec::new(),
            attempts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoadItemsRequest {
    /// Loads this mapping only, without falling back.
    #[serde(default)]
    pub mapping_id: Option<Uuid>,
    /// Defaults to the count's warehouse.
    #[serde(default)]
    pub location_id: Option<Uuid>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(qty: Option<Decimal>, cost: Option<Decimal>, category: Option<&str>) -> ItemRecord {
        ItemRecord {
            item_code: "SKU-1".into(),
            system_qty: qty,
            cost,
            category: category.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_sums_quantities() {
        let merged = row(Some(dec!(10)), None, None)
            .merge(row(Some(dec!(5)), None, None))
            .merge(row(Some(dec!(2)), None, None));
        assert_eq!(merged.system_qty, Some(dec!(17)));
    }

    #[test]
    fn test_merge_keeps_first_non_empty() {
        let merged = row(None, None, None)
            .merge(row(None, Some(dec!(3.5)), Some("Dairy")))
            .merge(row(None, Some(dec!(4.0)), Some("Frozen")));
        assert_eq!(merged.cost, Some(dec!(3.5)));
        assert_eq!(merged.category.as_deref(), Some("Dairy"));
        assert_eq!(merged.system_qty, None);
    }

    #[test]
    fn test_merge_is_associative() {
        let a = row(Some(dec!(10)), None, Some("A"));
        let b = row(None, Some(dec!(1.25)), None);
        let c = row(Some(dec!(2)), Some(dec!(9)), Some("C"));

        let left = a.clone().merge(b.clone()).merge(c.clone());
        let right = a.merge(b.merge(c));
        assert_eq!(left, right);
    }
}
