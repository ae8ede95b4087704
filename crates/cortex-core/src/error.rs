//! Error kinds consumed/emitted by the core.
//!
//! Callers should match on kind rather than message text. The one
//! exception is the store boundary, which must still recognize a raw
//! driver error as a unique-constraint violation before it has been
//! reclassified — see [`CortexError::classify_store_error`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CortexError {
    /// Provider/connector config failed validation. User-visible, never retried.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// 401/403 from a provider. Sync aborts the connector; error is recorded.
    #[error("auth error: {0}")]
    Auth(String),

    /// 429 or explicit remaining=0 surviving all retry attempts.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Connection reset, EOF, DNS failure, timeout.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Malformed provider response; caller should skip the record and continue.
    #[error("parse error: {0}")]
    Parse(String),

    /// Dedup hit. Not a failure — counted as skipped by the sync engine.
    #[error("duplicate record")]
    Duplicate,

    /// Surfaced store failure that is not a duplicate-key hit.
    #[error("store error: {0}")]
    Store(String),

    /// Cancelled via `CancellationToken` or a deadline elapsed.
    #[error("cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl CortexError {
    /// Reclassify a raw store error as [`CortexError::Duplicate`] when its
    /// message matches the unique-constraint substrings the store driver is
    /// known to emit. This is a safety net, not the primary mechanism —
    /// prefer a store implementation that returns a typed error directly.
    pub fn classify_store_error(raw: impl std::fmt::Display) -> Self {
        let msg = raw.to_string();
        if msg.contains("UNIQUE constraint failed") || msg.contains("duplicate") {
            CortexError::Duplicate
        } else {
            CortexError::Store(msg)
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, CortexError::Duplicate)
    }
}

pub type Result<T> = std::result::Result<T, CortexError>;
