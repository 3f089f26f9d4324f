//! Error types for channel operations.
//!
//! Every error here is deterministic: retrying the same call against the
//! same graph produces the same failure, so nothing in the crate retries.

use thiserror::Error;

use crate::channel::ChannelId;
use crate::path::Path;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Failures surfaced by sources, derived nodes and listeners.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// A path does not resolve to a structural address in a value.
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: Path, reason: String },

    /// A derived node received a structural event it has no reaction for.
    #[error("channel {node} cannot handle modification `{event}`")]
    UnsupportedModification { node: ChannelId, event: String },

    /// A cache read happened while the address was still marked dirty.
    ///
    /// Reads always resolve dirt first, so this indicates a bug in a
    /// `DerivedKind` implementation rather than a caller mistake.
    #[error("channel {node} read stale cache at `{path}`")]
    StaleCacheRead { node: ChannelId, path: Path },

    /// Conversion between typed Rust values and channel values failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A user-supplied callback reported a failure.
    #[error("callback failed: {0}")]
    Callback(String),
}

impl ChannelError {
    pub(crate) fn invalid_path(path: &Path, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.clone(),
            reason: reason.into(),
        }
    }
}
