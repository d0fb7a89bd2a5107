// ERP Connection API Handlers
// Connection test, schema catalog and query preview

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use uuid::Uuid;

use crate::middleware::auth::Claims;
use crate::middleware::error_handling::Result;
use crate::services::erp::{CatalogSnapshot, ConnectionTestResult, PreviewRequest, QueryPreview};
use crate::AppState;

pub async fn test_connection(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(connection_id): Path<Uuid>,
) -> Result<Json<ConnectionTestResult>> {
    let result = state
        .connection_service()
        .test_connection(claims.tenant_id, connection_id)
        .await?;
    Ok(Json(result))
}

pub async fn get_catalog(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(connection_id): Path<Uuid>,
) -> Result<Json<CatalogSnapshot>> {
    let snapshot = state
        .connection_service()
        .catalog_snapshot(claims.tenant_id, connection_id)
        .await?;
    Ok(Json(snapshot))
}

pub async fn preview_query(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<PreviewRequest>,
) -> Result<Json<QueryPreview>> {
    let preview = state.connection_service().preview(claims.tenant_id, request).await?;
    Ok(Json(preview))
}
