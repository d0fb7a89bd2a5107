pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod services;
pub mod utils;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::handlers::{counts, erp, imports, mappings};
use crate::middleware::auth_middleware;
use crate::middleware::metrics::{metrics_handler, metrics_middleware};
use crate::repositories::{CountRepository, MappingConfigRepository, MemoryStore};
use crate::services::erp::ConnectorProvider;
use crate::services::{
    CountService, ErpConnectionService, ErpLoaderService, ErpSyncService, FileImportService, MappingConfigService,
};

/// Shared handles passed to every handler. Services are cheap to build and
/// are constructed per request from these.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub counts: Arc<dyn CountRepository>,
    pub mappings: Arc<dyn MappingConfigRepository>,
    pub connectors: Arc<dyn ConnectorProvider>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        counts: Arc<dyn CountRepository>,
        mappings: Arc<dyn MappingConfigRepository>,
        connectors: Arc<dyn ConnectorProvider>,
    ) -> Self {
        Self {
            config,
            counts,
            mappings,
            connectors,
        }
    }

    /// State backed by a single in-memory store.
    pub fn in_memory(config: AppConfig, connectors: Arc<dyn ConnectorProvider>) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(config, store.clone(), store, connectors)
    }

    pub fn count_service(&self) -> CountService {
        CountService::new(self.counts.clone())
    }

    pub fn mapping_service(&self) -> MappingConfigService {
        MappingConfigService::new(self.mappings.clone(), self.connectors.clone())
    }

    pub fn connection_service(&self) -> ErpConnectionService {
        ErpConnectionService::new(self.mappings.clone(), self.connectors.clone())
    }

    pub fn loader_service(&self) -> ErpLoaderService {
        ErpLoaderService::new(
            self.counts.clone(),
            self.mappings.clone(),
            self.connectors.clone(),
            self.config.erp.clone(),
        )
    }

    pub fn sync_service(&self) -> ErpSyncService {
        ErpSyncService::new(
            self.counts.clone(),
            self.mappings.clone(),
            self.connectors.clone(),
            self.config.erp.default_connection.as_ref().map(|c| c.id),
        )
    }

    pub fn import_service(&self) -> FileImportService {
        FileImportService::new(self.counts.clone(), self.mappings.clone(), Arc::new(self.loader_service()))
    }
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "stocktake",
        "timestamp": chrono::Utc::now(),
    }))
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}", origin, e);
                None
            }
        })
        .collect();

    tracing::info!("CORS configured with {} allowed origins", origins.len());

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
}

pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    let mapping_routes = Router::new()
        .route("/", post(mappings::create_mapping).get(mappings::list_mappings))
        .route("/:id", get(mappings::get_mapping).put(mappings::update_mapping))
        .route("/:id/activate", post(mappings::activate_mapping))
        .route("/:id/deactivate", post(mappings::deactivate_mapping));

    let erp_routes = Router::new()
        .route("/connections/:id/test", post(erp::test_connection))
        .route("/catalog/:id", get(erp::get_catalog))
        .route("/preview", post(erp::preview_query));

    let count_routes = Router::new()
        .route("/", post(counts::create_count).get(counts::list_counts))
        .route("/:id", get(counts::get_count).delete(counts::delete_count))
        .route("/:id/start", post(counts::start_count))
        .route("/:id/pause", post(counts::pause_count))
        .route("/:id/resume", post(counts::resume_count))
        .route("/:id/complete", post(counts::complete_count))
        .route("/:id/finalize", post(counts::finalize_count))
        .route("/:id/close", post(counts::close_count))
        .route("/:id/cancel", post(counts::cancel_count))
        .route("/:id/reactivate", post(counts::reactivate_count))
        .route("/:id/load", post(counts::load_items))
        .route("/:id/items", get(counts::list_items).post(counts::add_item))
        .route("/:id/items/:item_id", put(counts::update_item))
        .route("/:id/versions", get(counts::version_history).post(counts::create_new_version))
        .route("/:id/versions/:version/submit", post(counts::submit_count))
        .route("/:id/variances", get(counts::list_variances))
        .route("/:id/variances/:report_id/resolve", post(counts::resolve_variance))
        .route("/:id/sync", post(counts::send_to_erp).get(counts::sync_history))
        .route(
            "/:id/import",
            post(imports::import_items).layer(DefaultBodyLimit::max(imports::MAX_IMPORT_BYTES + 64 * 1024)),
        )
        .route("/:id/export", get(imports::export_items));

    let api = Router::new()
        .nest("/mappings", mapping_routes)
        .nest("/erp", erp_routes)
        .nest("/counts", count_routes)
        .layer(axum_middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api", api)
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum_middleware::from_fn(metrics_middleware))
                .layer(cors),
        )
        .with_state(state)
}
