// File Import/Export API Handlers

use axum::{
    extract::{Multipart, Path, Query, State},
    http::header,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::middleware::auth::Claims;
use crate::middleware::error_handling::{AppError, Result};
use crate::services::file_import_service::ImportSummary;
use crate::AppState;

/// Upload limit for import files.
pub const MAX_IMPORT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub version: Option<i32>,
    pub mapping_id: Option<Uuid>,
}

fn parse_uuid_field(name: &str, value: &str) -> Result<Option<Uuid>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| AppError::InvalidInput(format!("{} must be a UUID", name)))
}

/// Multipart fields: `file` (required), `location_id`, `mapping_id`.
pub async fn import_items(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(count_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<ImportSummary>> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut location_id = None;
    let mut mapping_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::InvalidInput(format!("Failed to read upload: {}", e)))?;
                if data.len() > MAX_IMPORT_BYTES {
                    return Err(AppError::InvalidInput(format!(
                        "File exceeds the {} byte upload limit",
                        MAX_IMPORT_BYTES
                    )));
                }
                file = Some((filename, data.to_vec()));
            }
            "location_id" | "mapping_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::InvalidInput(format!("Invalid {} field: {}", name, e)))?;
                let parsed = parse_uuid_field(&name, &text)?;
                if name == "location_id" {
                    location_id = parsed;
                } else {
                    mapping_id = parsed;
                }
            }
            _ => {}
        }
    }

    let (filename, data) = file.ok_or_else(|| AppError::InvalidInput("Missing file field".to_string()))?;

    let summary = state
        .import_service()
        .import_items(claims.tenant_id, count_id, &data, &filename, location_id, mapping_id)
        .await?;
    Ok(Json(summary))
}

pub async fn export_items(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(count_id): Path<Uuid>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse> {
    let csv = state
        .import_service()
        .export_items(claims.tenant_id, count_id, query.version, query.mapping_id)
        .await?;

    let disposition = format!("attachment; filename=\"count-{}.csv\"", count_id);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    ))
}
