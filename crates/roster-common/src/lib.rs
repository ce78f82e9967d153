//! Roster Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, error handling and logging for the Roster workspace.
//!
//! # Overview
//!
//! - **Types**: the import job record and its progress/result payloads, as
//!   persisted by the server and returned by the status API
//! - **Error Handling**: the shared [`RosterError`] and [`Result`] alias
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` variables
//!
//! # Example
//!
//! ```no_run
//! use roster_common::logging::{init_logging, LogConfig};
//! use roster_common::types::{JobKind, JobStatus};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     assert!(JobKind::RegistryImport.is_exclusive());
//!     assert!(JobStatus::Completed.is_terminal());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, RosterError};
