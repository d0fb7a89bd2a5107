pub mod count_service;
pub mod erp;
pub mod file_import_service;
pub mod mapping_config_service;
pub mod query;

pub use count_service::CountService;
pub use erp::{ErpConnectionService, ErpLoaderService, ErpSyncService};
pub use file_import_service::FileImportService;
pub use mapping_config_service::MappingConfigService;
