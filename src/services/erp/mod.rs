// ERP Integration Module
// Exports the connector contract, loader, sync writer and connection tooling

pub mod connector;
pub mod erp_connection_service;
pub mod erp_loader_service;
pub mod erp_sync_service;
pub mod row_transform;

pub use connector::{
    decimal_param, run_query, test_connection, with_session, ConnectionRegistry, ConnectionTestResult,
    ConnectorProvider, ErpConnector, ErpRow, PgErpConnector,
};
pub use erp_connection_service::{CatalogSnapshot, ErpConnectionService, PreviewRequest, QueryPreview};
pub use erp_loader_service::{ErpLoaderService, TransformedRows};
pub use erp_sync_service::ErpSyncService;
pub use row_transform::{canonical_field, dedupe, normalize_key, RowTransformer};
