pub mod counts;
pub mod erp;
pub mod imports;
pub mod mappings;
