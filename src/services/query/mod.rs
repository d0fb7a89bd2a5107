//! Declarative query compilation against external ERP databases.

pub mod catalog;
pub mod compiler;
pub mod dialect;
pub mod identifier;
pub mod templates;

pub use catalog::SchemaCatalog;
pub use compiler::{CompiledQuery, QueryCompiler, QueryParam, QuerySpec, SelectColumn, TableAliases};
pub use dialect::SqlDialect;
pub use templates::{render_template, QueryTemplate, TemplateParams, TemplateQuery};

/// Hard ceiling on rows fetched by any single ERP query.
pub const MAX_ROW_LIMIT: u32 = 10_000;
