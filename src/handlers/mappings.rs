// Mapping Configuration API Handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::middleware::auth::Claims;
use crate::middleware::error_handling::Result;
use crate::models::mapping::{CreateMappingRequest, DatasetType, MappingConfig, UpdateMappingRequest};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListMappingsQuery {
    pub dataset_type: Option<DatasetType>,
}

pub async fn create_mapping(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<CreateMappingRequest>,
) -> Result<(StatusCode, Json<MappingConfig>)> {
    let config = state
        .mapping_service()
        .create(claims.tenant_id, request, claims.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(config)))
}

pub async fn list_mappings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ListMappingsQuery>,
) -> Result<Json<Vec<MappingConfig>>> {
    let configs = state.mapping_service().list(claims.tenant_id, query.dataset_type).await?;
    Ok(Json(configs))
}

pub async fn get_mapping(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<MappingConfig>> {
    let config = state.mapping_service().get(claims.tenant_id, id).await?;
    Ok(Json(config))
}

pub async fn update_mapping(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateMappingRequest>,
) -> Result<Json<MappingConfig>> {
    let config = state.mapping_service().update(claims.tenant_id, id, request).await?;
    Ok(Json(config))
}

pub async fn activate_mapping(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<MappingConfig>> {
    let config = state.mapping_service().activate(claims.tenant_id, id).await?;
    Ok(Json(config))
}

pub async fn deactivate_mapping(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<MappingConfig>> {
    let config = state.mapping_service().deactivate(claims.tenant_id, id).await?;
    Ok(Json(config))
}
