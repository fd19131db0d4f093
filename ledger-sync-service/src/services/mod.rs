//! Store adapters and metrics.

pub mod database;
pub mod memory;
pub mod metrics;
pub mod store;

pub use database::Database;
pub use memory::InMemoryStore;
pub use store::{ExistingMovement, LedgerStore, UnitOfWork};
