/// Tabular file import and export for count items
/// Supports: CSV, Excel (XLSX/XLS), JSON with format detection

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use csv::{ReaderBuilder, WriterBuilder};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::middleware::error_handling::{AppError, Result};
use crate::models::count::CountItem;
use crate::models::item_record::{ItemRecord, LoadSource, LoadSummary, RowError};
use crate::models::mapping::{FieldMapping, MappingConfig};
use crate::repositories::{CountRepository, MappingConfigRepository};
use crate::services::erp::row_transform::{canonical_field, normalize_key, RowTransformer};
use crate::services::erp::{ErpLoaderService, ErpRow};
use crate::utils::log_sanitizer::sanitize_for_log;

// ============================================================================
// Parsing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Csv,
    Excel,
    Json,
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileType::Csv => write!(f, "csv"),
            FileType::Excel => write!(f, "xlsx"),
            FileType::Json => write!(f, "json"),
        }
    }
}

/// Raw rows of a file, each tagged with its 1-based source row number.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub file_type: FileType,
    pub file_hash: String,
    pub headers: Vec<String>,
    pub rows: Vec<(usize, ErpRow)>,
    pub warnings: Vec<String>,
}

/// Canonical items of a file plus the rows that could not be used.
#[derive(Debug, Clone)]
pub struct ParsedItems {
    pub file_type: FileType,
    pub file_hash: String,
    pub rows_read: usize,
    pub records: Vec<ItemRecord>,
    pub row_errors: Vec<RowError>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub file_type: FileType,
    pub file_hash: String,
    pub warnings: Vec<String>,
    #[serde(flatten)]
    pub load: LoadSummary,
}

pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn detect_file_type(data: &[u8], filename: &str) -> Result<FileType> {
    let filename_lower = filename.to_lowercase();

    if filename_lower.ends_with(".csv") || filename_lower.ends_with(".txt") {
        return Ok(FileType::Csv);
    }
    if filename_lower.ends_with(".xlsx") || filename_lower.ends_with(".xls") {
        return Ok(FileType::Excel);
    }
    if filename_lower.ends_with(".json") {
        return Ok(FileType::Json);
    }

    // XLSX is a ZIP archive, XLS an OLE compound file
    if data.starts_with(b"PK") || data.starts_with(b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1") {
        return Ok(FileType::Excel);
    }

    match std::str::from_utf8(data).map(str::trim) {
        Ok(text) if text.starts_with('[') || text.starts_with('{') => Ok(FileType::Json),
        Ok(text) if !text.is_empty() => Ok(FileType::Csv),
        _ => Err(AppError::InvalidInput(
            "Unsupported file format. Please upload CSV, Excel (XLSX/XLS), or JSON files.".to_string(),
        )),
    }
}

fn detect_csv_delimiter(text: &str) -> u8 {
    let first_line = text.lines().next().unwrap_or("");
    [b',', b'\t', b';', b'|']
        .into_iter()
        .max_by_key(|d| first_line.matches(*d as char).count())
        .unwrap_or(b',')
}

fn text_row(headers: &[String], cells: Vec<String>) -> ErpRow {
    headers
        .iter()
        .zip(cells)
        .filter(|(header, _)| !header.is_empty())
        .map(|(header, cell)| (header.clone(), Value::String(cell)))
        .collect()
}

fn parse_csv(data: &[u8]) -> Result<(Vec<String>, Vec<(usize, ErpRow)>, Vec<String>)> {
    let text = std::str::from_utf8(data)
        .map_err(|e| AppError::InvalidInput(format!("Invalid UTF-8 encoding: {}", e)))?;
    let text = text.trim_start_matches('\u{feff}');

    let mut reader = ReaderBuilder::new()
        .delimiter(detect_csv_delimiter(text))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::InvalidInput(format!("Failed to read CSV headers: {}", e)))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    let mut warnings = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let row_number = idx + 2;
        match result {
            Ok(record) => {
                let cells: Vec<String> = record.iter().map(str::to_string).collect();
                if cells.iter().all(|c| c.is_empty()) {
                    continue;
                }
                if cells.len() != headers.len() {
                    warnings.push(format!(
                        "Row {} has {} columns, expected {}",
                        row_number,
                        cells.len(),
                        headers.len()
                    ));
                }
                rows.push((row_number, text_row(&headers, cells)));
            }
            Err(e) => warnings.push(format!("Row {} parsing error: {}", row_number, e)),
        }
    }

    Ok((headers, rows, warnings))
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            let s = f.to_string();
            if s.contains('.') {
                s.trim_end_matches('0').trim_end_matches('.').to_string()
            } else {
                s
            }
        }
        Data::String(s) => s.trim().to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("ERROR: {:?}", e),
        Data::Empty => String::new(),
    }
}

/// First worksheet only.
fn parse_excel(data: &[u8]) -> Result<(Vec<String>, Vec<(usize, ErpRow)>, Vec<String>)> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(data))
        .map_err(|e| AppError::InvalidInput(format!("Failed to open Excel file: {}", e)))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| AppError::InvalidInput("Excel file contains no sheets.".to_string()))?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| AppError::InvalidInput(format!("Failed to parse sheet {}: {}", sheet_name, e)))?;

    let mut rows_iter = range.rows();
    let headers: Vec<String> = rows_iter
        .next()
        .map(|row| row.iter().map(cell_to_string).collect())
        .ok_or_else(|| AppError::InvalidInput("Excel sheet is empty.".to_string()))?;

    let rows = rows_iter
        .enumerate()
        .map(|(idx, row)| (idx + 2, row.iter().map(cell_to_string).collect::<Vec<_>>()))
        .filter(|(_, cells)| cells.iter().any(|c| !c.is_empty()))
        .map(|(row_number, cells)| (row_number, text_row(&headers, cells)))
        .collect();

    Ok((headers, rows, Vec::new()))
}

/// Array of objects, or a single object.
fn parse_json(data: &[u8]) -> Result<(Vec<String>, Vec<(usize, ErpRow)>, Vec<String>)> {
    let json: Value =
        serde_json::from_slice(data).map_err(|e| AppError::InvalidInput(format!("Invalid JSON: {}", e)))?;

    let objects = match json {
        Value::Array(items) => items,
        Value::Object(_) => vec![json],
        _ => {
            return Err(AppError::InvalidInput(
                "JSON must be an array of objects or a single object.".to_string(),
            ))
        }
    };

    let mut headers: Vec<String> = Vec::new();
    let mut rows = Vec::new();
    let mut warnings = Vec::new();
    for (idx, object) in objects.into_iter().enumerate() {
        match object {
            Value::Object(map) => {
                for key in map.keys() {
                    if !headers.contains(key) {
                        headers.push(key.clone());
                    }
                }
                rows.push((idx + 1, map));
            }
            _ => warnings.push(format!("Item {} is not a JSON object", idx + 1)),
        }
    }

    Ok((headers, rows, warnings))
}

/// Parses any supported format into raw rows.
pub fn parse_file(data: &[u8], filename: &str) -> Result<ParsedFile> {
    let file_type = detect_file_type(data, filename)?;
    tracing::info!(
        "Parsing file: {} ({} bytes, type: {})",
        sanitize_for_log(filename),
        data.len(),
        file_type
    );

    let (headers, rows, warnings) = match file_type {
        FileType::Csv => parse_csv(data)?,
        FileType::Excel => parse_excel(data)?,
        FileType::Json => parse_json(data)?,
    };

    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(AppError::InvalidInput(
            "File has no headers. Please ensure the first row contains column names.".to_string(),
        ));
    }
    if rows.is_empty() {
        return Err(AppError::InvalidInput("File contains no data rows.".to_string()));
    }

    Ok(ParsedFile {
        file_type,
        file_hash: content_hash(data),
        headers,
        rows,
        warnings,
    })
}

/// Canonical fields the headers provide, directly or through a mapping's
/// field list.
fn provided_fields(headers: &[String], fields: &[FieldMapping]) -> HashSet<&'static str> {
    let mut provided = HashSet::new();
    for header in headers {
        let normalized = normalize_key(header);
        if let Some(field) = canonical_field(header) {
            provided.insert(field);
        }
        for mapping in fields {
            let bare_source = mapping.source.rsplit('.').next().unwrap_or(&mapping.source);
            if normalize_key(bare_source) == normalized || normalize_key(&mapping.target) == normalized {
                if let Some(field) = canonical_field(&mapping.target) {
                    provided.insert(field);
                }
            }
        }
    }
    provided
}

/// Parses a file into canonical items. The item code and item name columns
/// are required; rows lacking either become row errors.
pub fn parse_items(data: &[u8], filename: &str, fields: &[FieldMapping]) -> Result<ParsedItems> {
    let parsed = parse_file(data, filename)?;

    let provided = provided_fields(&parsed.headers, fields);
    let missing: Vec<&str> = ["itemCode", "itemName"]
        .into_iter()
        .filter(|f| !provided.contains(f))
        .collect();
    if !missing.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "Missing required columns: {}",
            missing.join(", ")
        )));
    }

    let transformer = RowTransformer::new(fields);
    let mut records = Vec::new();
    let mut row_errors = Vec::new();
    for (row, values) in &parsed.rows {
        match transformer.transform(values) {
            Ok(Some(record)) if record.item_name.is_some() => records.push(record),
            Ok(Some(record)) => row_errors.push(RowError {
                row: *row,
                message: format!("Item {} has no item name", record.item_code),
            }),
            Ok(None) => row_errors.push(RowError {
                row: *row,
                message: "Missing item code".to_string(),
            }),
            Err(message) => row_errors.push(RowError { row: *row, message }),
        }
    }

    tracing::info!(
        "Parsed {} rows: {} items, {} row errors",
        parsed.rows.len(),
        records.len(),
        row_errors.len()
    );

    Ok(ParsedItems {
        file_type: parsed.file_type,
        file_hash: parsed.file_hash,
        rows_read: parsed.rows.len(),
        records,
        row_errors,
        warnings: parsed.warnings,
    })
}

// ============================================================================
// Export
// ============================================================================

const EXPORT_COLUMNS: &[&str] = &[
    "itemCode",
    "itemName",
    "uom",
    "packQty",
    "systemQty",
    "countedQty",
    "difference",
    "variancePercent",
    "status",
    "version",
    "locationId",
];

fn export_value(item: &CountItem, column: &str) -> String {
    let decimal = |d: Option<rust_decimal::Decimal>| d.map(|d| d.normalize().to_string()).unwrap_or_default();
    match column {
        "itemCode" => item.item_code.clone(),
        "itemName" => item.item_name.clone(),
        "uom" => item.uom.clone().unwrap_or_default(),
        "packQty" => decimal(item.pack_qty),
        "systemQty" => decimal(Some(item.system_qty)),
        "countedQty" => decimal(item.counted_qty),
        "difference" => decimal(item.difference),
        "variancePercent" => decimal(item.variance_percent),
        "status" => item.status.as_str().to_string(),
        "version" => item.version.to_string(),
        "locationId" => item.location_id.to_string(),
        _ => String::new(),
    }
}

/// Column header: the mapping's source column for a mapped field, the
/// canonical name otherwise.
fn export_header(column: &str, mapping: Option<&MappingConfig>) -> String {
    mapping
        .and_then(|m| m.source_for(column))
        .map(|source| source.rsplit('.').next().unwrap_or(source).to_string())
        .unwrap_or_else(|| column.to_string())
}

pub fn export_csv(items: &[CountItem], mapping: Option<&MappingConfig>) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());

    let headers: Vec<String> = EXPORT_COLUMNS.iter().map(|c| export_header(c, mapping)).collect();
    writer
        .write_record(&headers)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("CSV write failed: {}", e)))?;

    for item in items {
        let record: Vec<String> = EXPORT_COLUMNS.iter().map(|c| export_value(item, c)).collect();
        writer
            .write_record(&record)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("CSV write failed: {}", e)))?;
    }

    writer
        .into_inner()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("CSV flush failed: {}", e)))
}

// ============================================================================
// File Import Service
// ============================================================================

pub struct FileImportService {
    counts: Arc<dyn CountRepository>,
    mappings: Arc<dyn MappingConfigRepository>,
    loader: Arc<ErpLoaderService>,
}

impl FileImportService {
    pub fn new(
        counts: Arc<dyn CountRepository>,
        mappings: Arc<dyn MappingConfigRepository>,
        loader: Arc<ErpLoaderService>,
    ) -> Self {
        Self {
            counts,
            mappings,
            loader,
        }
    }

    async fn mapping(&self, tenant_id: Uuid, mapping_id: Option<Uuid>) -> Result<Option<MappingConfig>> {
        match mapping_id {
            Some(id) => self
                .mappings
                .get(tenant_id, id)
                .await?
                .map(Some)
                .ok_or_else(|| AppError::NotFound(format!("Mapping config {} not found", id))),
            None => Ok(None),
        }
    }

    /// Imports file rows into the count's current version through the same
    /// transform and upsert as ERP rows.
    pub async fn import_items(
        &self,
        tenant_id: Uuid,
        count_id: Uuid,
        data: &[u8],
        filename: &str,
        location_id: Option<Uuid>,
        mapping_id: Option<Uuid>,
    ) -> Result<ImportSummary> {
        let count = self.loader.open_count(tenant_id, count_id).await?;
        let mapping = self.mapping(tenant_id, mapping_id).await?;
        let fields = mapping.as_ref().map(|m| m.field_mappings.as_slice()).unwrap_or(&[]);

        let parsed = parse_items(data, filename, fields)?;

        let mut load = LoadSummary::new(LoadSource::File, count.current_version);
        load.rows_read = parsed.rows_read;
        load.row_errors = parsed.row_errors;
        self.loader
            .upsert_records(&count, location_id.unwrap_or(count.warehouse_id), parsed.records, &mut load)
            .await;

        Ok(ImportSummary {
            file_type: parsed.file_type,
            file_hash: parsed.file_hash,
            warnings: parsed.warnings,
            load,
        })
    }

    /// CSV of one version's items (the current one by default).
    pub async fn export_items(
        &self,
        tenant_id: Uuid,
        count_id: Uuid,
        version: Option<i32>,
        mapping_id: Option<Uuid>,
    ) -> Result<Vec<u8>> {
        let count = self
            .counts
            .get_count(tenant_id, count_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Count {} not found", count_id)))?;
        let mapping = self.mapping(tenant_id, mapping_id).await?;

        let version = version.unwrap_or(count.current_version);
        let items = self.counts.list_items(count_id, Some(version)).await?;
        tracing::info!("Exporting {} items of {} v{}", items.len(), count.count_number(), version);

        export_csv(&items, mapping.as_ref())
    }
}
