//! Turns raw ERP or file rows into canonical [`ItemRecord`]s and folds the
//! fan-out of joined rows back into one record per item code.

use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

use crate::models::item_record::ItemRecord;
use crate::models::mapping::{FieldDataType, FieldMapping, FieldTransform};
use crate::services::erp::connector::ErpRow;

/// Accepted spellings per canonical field, compared after [`normalize_key`].
const ITEM_CODE: &[&str] = &["itemcode", "code", "sku", "itemno", "itemnumber", "productcode", "article"];
const ITEM_NAME: &[&str] = &["itemname", "name", "description", "itemdescription", "productname", "dscription"];
const SYSTEM_QTY: &[&str] = &["systemqty", "quantity", "qty", "onhand", "stock", "stockqty", "available"];
const UOM: &[&str] = &["uom", "unit", "unitofmeasure", "invntryuom", "salunitmsr"];
const PACK_QTY: &[&str] = &["packqty", "packsize", "numinsale", "casesize"];
const COST: &[&str] = &["cost", "unitcost", "avgprice", "avgcost", "lastpurprc"];
const PRICE: &[&str] = &["price", "unitprice", "saleprice", "listprice"];
const BARCODES: &[&str] = &["barcodes", "barcode", "codebars", "ean", "upc"];
const CATEGORY: &[&str] = &["category", "itemgroup", "group", "itmsgrpnam", "family"];
const BRAND: &[&str] = &["brand", "manufacturer", "firmname", "make"];

/// Canonical field names with their accepted spellings.
const CANONICAL_FIELDS: &[(&str, &[&str])] = &[
    ("itemCode", ITEM_CODE),
    ("itemName", ITEM_NAME),
    ("systemQty", SYSTEM_QTY),
    ("uom", UOM),
    ("packQty", PACK_QTY),
    ("cost", COST),
    ("price", PRICE),
    ("barcodes", BARCODES),
    ("category", CATEGORY),
    ("brand", BRAND),
];

/// Lowercases and drops `_`, `-` and spaces, so `Item_Code`, `item code`
/// and `ITEMCODE` all meet.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Canonical field a column name stands for, e.g. `Item_Code` -> `itemCode`.
pub fn canonical_field(key: &str) -> Option<&'static str> {
    let normalized = normalize_key(key);
    CANONICAL_FIELDS
        .iter()
        .find(|(_, aliases)| aliases.contains(&normalized.as_str()))
        .map(|(field, _)| *field)
}

fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    let cleaned = text.replace(',', "");
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
}

fn apply_transform(value: Value, transform: Option<FieldTransform>) -> Value {
    match (value, transform) {
        (Value::String(s), Some(FieldTransform::Trim)) => Value::String(s.trim().to_string()),
        (Value::String(s), Some(FieldTransform::Uppercase)) => Value::String(s.trim().to_uppercase()),
        (Value::String(s), Some(FieldTransform::Lowercase)) => Value::String(s.trim().to_lowercase()),
        (value, _) => value,
    }
}

fn coerce(value: Value, data_type: FieldDataType, field: &str) -> Result<Value, String> {
    let Some(text) = value_text(&value) else {
        return Ok(Value::Null);
    };

    match data_type {
        FieldDataType::String => Ok(Value::String(text)),
        FieldDataType::Decimal => parse_decimal(&text)
            .map(|d| Value::String(d.normalize().to_string()))
            .ok_or_else(|| format!("Invalid decimal for {}: {}", field, text)),
        FieldDataType::Integer => parse_decimal(&text)
            .filter(|d| d.fract().is_zero())
            .map(|d| Value::String(d.trunc().to_string()))
            .ok_or_else(|| format!("Invalid integer for {}: {}", field, text)),
        FieldDataType::Boolean => match text.to_ascii_lowercase().as_str() {
            "true" | "1" | "y" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "n" | "no" => Ok(Value::Bool(false)),
            _ => Err(format!("Invalid boolean for {}: {}", field, text)),
        },
    }
}

/// Row transform driven by a mapping's field list. Without field mappings
/// only the built-in aliases are used.
#[derive(Debug, Clone, Default)]
pub struct RowTransformer {
    fields: Vec<FieldMapping>,
}

impl RowTransformer {
    pub fn new(fields: &[FieldMapping]) -> Self {
        Self { fields: fields.to_vec() }
    }

    /// `Ok(None)` when the row has no usable item code.
    pub fn transform(&self, row: &ErpRow) -> Result<Option<ItemRecord>, String> {
        let mut values: HashMap<String, Value> =
            row.iter().map(|(k, v)| (normalize_key(k), v.clone())).collect();

        for field in &self.fields {
            let bare_source = field.source.rsplit('.').next().unwrap_or(&field.source);
            let raw = [field.target.as_str(), bare_source, field.source.as_str()]
                .iter()
                .find_map(|key| values.get(&normalize_key(key)).cloned());

            if let Some(raw) = raw {
                let value = coerce(apply_transform(raw, field.transform), field.data_type, &field.target)?;
                values.insert(normalize_key(&field.target), value);
            }
        }

        let text = |aliases: &[&str]| aliases.iter().find_map(|a| values.get(*a).and_then(value_text));
        let decimal = |aliases: &[&str], field: &str| -> Result<Option<Decimal>, String> {
            match text(aliases) {
                Some(t) => parse_decimal(&t)
                    .map(Some)
                    .ok_or_else(|| format!("Invalid number for {}: {}", field, t)),
                None => Ok(None),
            }
        };

        let Some(item_code) = text(ITEM_CODE) else {
            return Ok(None);
        };

        Ok(Some(ItemRecord {
            item_code,
            item_name: text(ITEM_NAME),
            system_qty: decimal(SYSTEM_QTY, "systemQty")?,
            uom: text(UOM),
            pack_qty: decimal(PACK_QTY, "packQty")?,
            cost: decimal(COST, "cost")?,
            price: decimal(PRICE, "price")?,
            barcodes: text(BARCODES),
            category: text(CATEGORY),
            brand: text(BRAND),
        }))
    }
}

/// Merges records sharing an item code, keeping first-seen order.
pub fn dedupe(records: impl IntoIterator<Item = ItemRecord>) -> Vec<ItemRecord> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<ItemRecord> = Vec::new();

    for record in records {
        match index.get(&record.item_code) {
            Some(&i) => {
                let existing = std::mem::take(&mut merged[i]);
                merged[i] = existing.merge(record);
            }
            None => {
                index.insert(record.item_code.clone(), merged.len());
                merged.push(record);
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn row(value: Value) -> ErpRow {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_alias_tolerant_lookup() {
        let transformer = RowTransformer::default();
        let record = transformer
            .transform(&row(json!({"ITEM_CODE": "SKU-1", "Description": "Milk 1L", "OnHand": "12.5", "UOM": "EA"})))
            .unwrap()
            .unwrap();
        assert_eq!(record.item_code, "SKU-1");
        assert_eq!(record.item_name.as_deref(), Some("Milk 1L"));
        assert_eq!(record.system_qty, Some(dec!(12.5)));
        assert_eq!(record.uom.as_deref(), Some("EA"));
    }

    #[test]
    fn test_canonical_field() {
        assert_eq!(canonical_field("Item_Code"), Some("itemCode"));
        assert_eq!(canonical_field("On Hand"), Some("systemQty"));
        assert_eq!(canonical_field("warehouse"), None);
    }

    #[test]
    fn test_rows_without_code_dropped() {
        let transformer = RowTransformer::default();
        assert!(transformer.transform(&row(json!({"itemCode": "  ", "qty": 3}))).unwrap().is_none());
        assert!(transformer.transform(&row(json!({"qty": 3}))).unwrap().is_none());
    }

    #[test]
    fn test_field_mapping_transform_and_type() {
        let fields = vec![
            FieldMapping {
                source: "OITM.ItemCode".into(),
                target: "itemCode".into(),
                data_type: FieldDataType::String,
                transform: Some(FieldTransform::Uppercase),
            },
            FieldMapping {
                source: "OITW.OnHand".into(),
                target: "systemQty".into(),
                data_type: FieldDataType::Decimal,
                transform: None,
            },
        ];
        let transformer = RowTransformer::new(&fields);

        let record = transformer
            .transform(&row(json!({"itemCode": " sku-9 ", "systemQty": 4})))
            .unwrap()
            .unwrap();
        assert_eq!(record.item_code, "SKU-9");
        assert_eq!(record.system_qty, Some(dec!(4)));

        let bad = transformer.transform(&row(json!({"itemCode": "A", "systemQty": "lots"})));
        assert!(bad.is_err());
    }

    #[test]
    fn test_numeric_item_code() {
        let record = RowTransformer::default()
            .transform(&row(json!({"code": 1001, "qty": "1,250"})))
            .unwrap()
            .unwrap();
        assert_eq!(record.item_code, "1001");
        assert_eq!(record.system_qty, Some(dec!(1250)));
    }

    #[test]
    fn test_dedupe_fan_out_join() {
        let transformer = RowTransformer::default();
        let rows = [
            json!({"itemCode": "SKU-1", "itemName": "Widget", "qty": 10}),
            json!({"itemCode": "SKU-2", "qty": 1}),
            json!({"itemCode": "SKU-1", "qty": 5, "category": "Tools"}),
            json!({"itemCode": "SKU-1", "qty": 2, "category": "Other"}),
        ];
        let records = rows
            .into_iter()
            .filter_map(|r| transformer.transform(&row(r)).unwrap());
        let merged = dedupe(records);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].item_code, "SKU-1");
        assert_eq!(merged[0].system_qty, Some(dec!(17)));
        assert_eq!(merged[0].item_name.as_deref(), Some("Widget"));
        assert_eq!(merged[0].category.as_deref(), Some("Tools"));
    }

    #[test]
    fn test_dedupe_order_independent_totals() {
        let a = ItemRecord {
            system_qty: Some(dec!(10)),
            ..ItemRecord::new("X")
        };
        let b = ItemRecord {
            system_qty: Some(dec!(5)),
            ..ItemRecord::new("X")
        };
        let c = ItemRecord {
            system_qty: Some(dec!(2)),
            ..ItemRecord::new("X")
        };

        let forward = dedupe(vec![a.clone(), b.clone(), c.clone()]);
        let backward = dedupe(vec![c, b, a]);
        assert_eq!(forward[0].system_qty, backward[0].system_qty);
    }
}
