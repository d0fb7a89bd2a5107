// Count API Handlers
// Lifecycle, items, versions, variances and ERP write-back of inventory counts

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::middleware::auth::Claims;
use crate::middleware::error_handling::Result;
use crate::models::count::{
    AddCountItemRequest, CountItem, CountStatus, CreateCountRequest, InventoryCount, NewVersionOutcome,
    ResolveVarianceRequest, SubmitCountRequest, SubmitCountSummary, UpdateCountItemRequest, VarianceReport,
    VersionHistory,
};
use crate::models::item_record::{LoadItemsRequest, LoadSummary};
use crate::models::sync::{SendToErpRequest, SyncHistory, SyncOutcome};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListCountsQuery {
    pub status: Option<CountStatus>,
}

#[derive(Debug, Deserialize)]
pub struct VersionQuery {
    pub version: Option<i32>,
}

pub async fn create_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<CreateCountRequest>,
) -> Result<(StatusCode, Json<InventoryCount>)> {
    let count = state
        .count_service()
        .create_count(claims.tenant_id, request, claims.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(count)))
}

pub async fn list_counts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ListCountsQuery>,
) -> Result<Json<Vec<InventoryCount>>> {
    let counts = state.count_service().list_counts(claims.tenant_id, query.status).await?;
    Ok(Json(counts))
}

pub async fn get_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(count_id): Path<Uuid>,
) -> Result<Json<InventoryCount>> {
    let count = state.count_service().get_count(claims.tenant_id, count_id).await?;
    Ok(Json(count))
}

pub async fn delete_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(count_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.count_service().delete_count(claims.tenant_id, count_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(count_id): Path<Uuid>,
) -> Result<Json<InventoryCount>> {
    let count = state
        .count_service()
        .start_count(claims.tenant_id, count_id, claims.user_id)
        .await?;
    Ok(Json(count))
}

pub async fn pause_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(count_id): Path<Uuid>,
) -> Result<Json<InventoryCount>> {
    let count = state
        .count_service()
        .pause_count(claims.tenant_id, count_id, claims.user_id)
        .await?;
    Ok(Json(count))
}

pub async fn resume_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(count_id): Path<Uuid>,
) -> Result<Json<InventoryCount>> {
    let count = state
        .count_service()
        .resume_count(claims.tenant_id, count_id, claims.user_id)
        .await?;
    Ok(Json(count))
}

pub async fn complete_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(count_id): Path<Uuid>,
) -> Result<Json<InventoryCount>> {
    let count = state
        .count_service()
        .complete_count(claims.tenant_id, count_id, claims.user_id)
        .await?;
    Ok(Json(count))
}

pub async fn finalize_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(count_id): Path<Uuid>,
) -> Result<Json<InventoryCount>> {
    let count = state
        .count_service()
        .finalize_count(claims.tenant_id, count_id, claims.user_id)
        .await?;
    Ok(Json(count))
}

pub async fn close_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(count_id): Path<Uuid>,
) -> Result<Json<InventoryCount>> {
    let count = state
        .count_service()
        .close_count(claims.tenant_id, count_id, claims.user_id)
        .await?;
    Ok(Json(count))
}

pub async fn cancel_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(count_id): Path<Uuid>,
) -> Result<Json<InventoryCount>> {
    let count = state
        .count_service()
        .cancel_count(claims.tenant_id, count_id, claims.user_id)
        .await?;
    Ok(Json(count))
}

pub async fn reactivate_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(count_id): Path<Uuid>,
) -> Result<Json<InventoryCount>> {
    let count = state
        .count_service()
        .reactivate_count(claims.tenant_id, count_id, claims.user_id)
        .await?;
    Ok(Json(count))
}

pub async fn load_items(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(count_id): Path<Uuid>,
    Json(request): Json<LoadItemsRequest>,
) -> Result<Json<LoadSummary>> {
    let summary = state
        .loader_service()
        .load_items(claims.tenant_id, count_id, request)
        .await?;
    Ok(Json(summary))
}

pub async fn list_items(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(count_id): Path<Uuid>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<Vec<CountItem>>> {
    let items = state
        .count_service()
        .list_items(claims.tenant_id, count_id, query.version)
        .await?;
    Ok(Json(items))
}

pub async fn add_item(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(count_id): Path<Uuid>,
    Json(request): Json<AddCountItemRequest>,
) -> Result<(StatusCode, Json<CountItem>)> {
    let item = state
        .count_service()
        .add_item(claims.tenant_id, count_id, request, claims.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn update_item(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((count_id, item_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateCountItemRequest>,
) -> Result<Json<CountItem>> {
    let item = state
        .count_service()
        .update_item(claims.tenant_id, count_id, item_id, request, claims.user_id)
        .await?;
    Ok(Json(item))
}

pub async fn submit_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((count_id, version)): Path<(Uuid, i32)>,
    Json(request): Json<SubmitCountRequest>,
) -> Result<Json<SubmitCountSummary>> {
    let summary = state
        .count_service()
        .submit_count(claims.tenant_id, count_id, version, request, claims.user_id)
        .await?;
    Ok(Json(summary))
}

pub async fn version_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(count_id): Path<Uuid>,
) -> Result<Json<VersionHistory>> {
    let history = state.count_service().version_history(claims.tenant_id, count_id).await?;
    Ok(Json(history))
}

pub async fn create_new_version(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(count_id): Path<Uuid>,
) -> Result<Json<NewVersionOutcome>> {
    let outcome = state
        .count_service()
        .create_new_version(claims.tenant_id, count_id, claims.user_id)
        .await?;
    Ok(Json(outcome))
}

pub async fn list_variances(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(count_id): Path<Uuid>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<Vec<VarianceReport>>> {
    let reports = state
        .count_service()
        .list_variances(claims.tenant_id, count_id, query.version)
        .await?;
    Ok(Json(reports))
}

pub async fn resolve_variance(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((count_id, report_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<ResolveVarianceRequest>,
) -> Result<Json<VarianceReport>> {
    let report = state
        .count_service()
        .resolve_variance(claims.tenant_id, count_id, report_id, request, claims.user_id)
        .await?;
    Ok(Json(report))
}

pub async fn send_to_erp(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(count_id): Path<Uuid>,
    Json(request): Json<SendToErpRequest>,
) -> Result<Json<SyncOutcome>> {
    let outcome = state
        .sync_service()
        .send_to_erp(claims.tenant_id, count_id, request, claims.user_id)
        .await?;
    Ok(Json(outcome))
}

pub async fn sync_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(count_id): Path<Uuid>,
) -> Result<Json<Vec<SyncHistory>>> {
    let history = state.sync_service().sync_history(claims.tenant_id, count_id).await?;
    Ok(Json(history))
}
