//! Ledger Sync Service - reconciles bank statements into the accounting ledger.

pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod services;
