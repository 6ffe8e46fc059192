//! Typed error definitions for the trust core.
//!
//! Provides [`TrustError`] for domain-specific errors that are more
//! informative than plain `anyhow::Error` strings. All variants implement
//! `std::error::Error` via `thiserror`, so they integrate seamlessly with
//! `anyhow::Result`.
//!
//! Note the deliberate asymmetry in the error policy: genuine I/O failures
//! (a ledger append that cannot reach disk) surface as [`TrustError::Storage`]
//! and propagate, while "missing entity" conditions (closing a position that
//! does not exist, updating an unknown order) are *not* errors — the ledger
//! logs a warning and continues, because a restart-time race such as a late
//! order callback is expected and must never crash the process.

use thiserror::Error;

/// Domain-specific errors for the trust core.
#[derive(Debug, Error)]
pub enum TrustError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Ledger persistence error (append, fsync, manifest write).
    #[error("storage error: {0}")]
    Storage(String),

    /// Exchange query or order request error.
    #[error("exchange error: {0}")]
    Exchange(String),

    /// On-disk record or exchange response parsing error.
    #[error("parse error: {0}")]
    Parse(String),

    /// Trading operation error (order placement, position sizing, etc.).
    #[error("trading error: {0}")]
    Trading(String),
}
