//! Error taxonomy for the store.
//!
//! Persistence failures are non-fatal to the host: items affected by a
//! failed flush simply stay dirty and are retried on the next pass. A
//! coalesced (skipped) save is *not* an error; it is reported as
//! [`FlushOutcome::Skipped`](crate::store::FlushOutcome).

use thiserror::Error;

/// All failures surfaced by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A requested block or item key does not exist.
    #[error("key not found: {key}")]
    NotFound { key: String },

    /// One shard line failed to parse. Contained to that line; sibling
    /// keys in the same shard still load.
    #[error("corrupt fragment in shard '{shard}' at line {line}")]
    CorruptFragment { shard: String, line: usize },

    /// A full-file rewrite produced an implausibly small result and was
    /// not committed. The original file is untouched; the rejected bytes
    /// are preserved at `preserved` for inspection. No automatic retry.
    #[error(
        "rewrite of shard '{shard}' rejected: {attempted} bytes against \
         previous {previous} (rejected copy kept at {preserved})"
    )]
    ValidationFailed {
        shard: String,
        previous: u64,
        attempted: u64,
        preserved: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
