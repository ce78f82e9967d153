//! Imports feature module
//!
//! Submission of bulk imports and read access to their job records.

pub mod commands;
pub mod queries;
pub mod routes;

pub use routes::imports_routes;
