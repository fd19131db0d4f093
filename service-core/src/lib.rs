//! service-core: Shared infrastructure for the ledger-sync workspace.
pub mod config;
pub mod error;
pub mod observability;

pub use serde;
pub use serde_json;
pub use tracing;
