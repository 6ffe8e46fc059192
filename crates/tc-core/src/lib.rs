//! # tc-core
//!
//! Core crate for the trust-core trading runner, providing:
//!
//! - **Types** (`types`) — trading enums, ledger entities, exchange snapshots
//! - **Configuration** (`config`) — JSON config deserialization
//! - **Error types** (`error`) — domain-specific `TrustError` via thiserror
//! - **Time utilities** (`time_util`) — epoch timestamps and ISO-8601 helpers
//! - **Logging** (`logging`) — tracing-based structured logging

pub mod config;
pub mod error;
pub mod logging;
pub mod time_util;
pub mod types;

// Re-export types at crate root for convenience.
pub use types::*;
