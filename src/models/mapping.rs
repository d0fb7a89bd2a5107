use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Category of ERP data, each with its own mapping and query template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatasetType {
    Items,
    Stock,
    Cost,
    Price,
    Destination,
}

impl DatasetType {
    pub const ALL: [DatasetType; 5] = [
        DatasetType::Items,
        DatasetType::Stock,
        DatasetType::Cost,
        DatasetType::Price,
        DatasetType::Destination,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetType::Items => "ITEMS",
            DatasetType::Stock => "STOCK",
            DatasetType::Cost => "COST",
            DatasetType::Price => "PRICE",
            DatasetType::Destination => "DESTINATION",
        }
    }
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ITEMS" => Ok(DatasetType::Items),
            "STOCK" => Ok(DatasetType::Stock),
            "COST" => Ok(DatasetType::Cost),
            "PRICE" => Ok(DatasetType::Price),
            "DESTINATION" => Ok(DatasetType::Destination),
            other => Err(format!("Unknown dataset type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    pub fn keyword(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT",
            JoinType::Right => "RIGHT",
            JoinType::Full => "FULL",
        }
    }
}

/// Equality between two column references, e.g. `OITM.ItemCode = OITW.ItemCode`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinCondition {
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub table: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub join_type: JoinType,
    pub on: Vec<JoinCondition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldDataType {
    #[default]
    String,
    Integer,
    Decimal,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTransform {
    Trim,
    Uppercase,
    Lowercase,
}

/// Maps an ERP column (`source`, optionally table-qualified) onto a
/// canonical item field (`target`, e.g. `itemCode`, `systemQty`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub data_type: FieldDataType,
    #[serde(default)]
    pub transform: Option<FieldTransform>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
    IsNull,
    IsNotNull,
}

impl FilterOperator {
    pub fn sql(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::Ne => "<>",
            FilterOperator::Gt => ">",
            FilterOperator::Gte => ">=",
            FilterOperator::Lt => "<",
            FilterOperator::Lte => "<=",
            FilterOperator::Like => "LIKE",
            FilterOperator::In => "IN",
            FilterOperator::IsNull => "IS NULL",
            FilterOperator::IsNotNull => "IS NOT NULL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub erp_connection_id: Uuid,
    pub dataset_type: DatasetType,
    pub name: String,
    pub main_table: String,
    pub joins: Vec<JoinSpec>,
    pub field_mappings: Vec<FieldMapping>,
    pub filters: Vec<FilterSpec>,
    /// Hand-written SELECT used verbatim instead of the compiled one.
    pub raw_query: Option<String>,
    pub version: i32,
    pub is_active: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MappingConfig {
    /// Source column mapped onto a canonical target field, if any.
    pub fn source_for(&self, target: &str) -> Option<&str> {
        self.field_mappings
            .iter()
            .find(|m| m.target.eq_ignore_ascii_case(target))
            .map(|m| m.source.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateMappingRequest {
    pub erp_connection_id: Uuid,
    pub dataset_type: DatasetType,
    #[validate(length(min = 1, max = 128, message = "Name required"))]
    pub name: String,
    #[validate(length(min = 1, max = 256, message = "Main table required"))]
    pub main_table: String,
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
    #[validate(length(min = 1, message = "At least one field mapping required"))]
    pub field_mappings: Vec<FieldMapping>,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default)]
    pub raw_query: Option<String>,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct UpdateMappingRequest {
    #[validate(length(min = 1, max = 128))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 256))]
    pub main_table: Option<String>,
    pub joins: Option<Vec<JoinSpec>>,
    pub field_mappings: Option<Vec<FieldMapping>>,
    pub filters: Option<Vec<FilterSpec>>,
    /// `Some(None)` clears an existing override.
    #[serde(default, with = "double_option")]
    pub raw_query: Option<Option<String>>,
}

mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Option<String>>, serializer: S) -> Result<S::Ok, S::Error> {
        value.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Option<String>>, D::Error> {
        Option::<String>::deserialize(deserializer).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_type_parse() {
        assert_eq!("stock".parse::<DatasetType>().unwrap(), DatasetType::Stock);
        assert!("inventory".parse::<DatasetType>().is_err());
    }

    #[test]
    fn test_update_request_distinguishes_cleared_raw_query() {
        let cleared: UpdateMappingRequest = serde_json::from_str(r#"{"raw_query": null}"#).unwrap();
        assert_eq!(cleared.raw_query, Some(None));

        let untouched: UpdateMappingRequest = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(untouched.raw_query, None);
    }

    #[test]
    fn test_mapping_json_shape() {
        let json = r#"{
            "table": "OITW",
            "alias": "w",
            "join_type": "LEFT",
            "on": [{"left": "OITM.ItemCode", "right": "OITW.ItemCode"}]
        }"#;
        let join: JoinSpec = serde_json::from_str(json).unwrap();
        assert_eq!(join.join_type, JoinType::Left);
        assert_eq!(join.on.len(), 1);
    }
}
