//! Import queries

pub mod get;
pub mod list;

pub use get::GetImportQuery;
pub use list::{ListImportsQuery, ListImportsResponse};
