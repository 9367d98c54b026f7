//! Error types for the blob cache.
//!
//! All cache-local operations return a [`Result<T>`] which is an alias for
//! `Result<T, CacheError>`.  Operations that are delegated to the wrapped remote
//! reference return [`anyhow::Result`] instead, since their failure modes belong to
//! the remote side.
//!
//! # Error Categories
//!
//! - **Configuration**: [`Configuration`], raised when building a cache
//! - **Input validation**: [`InvalidDigest`], [`InvalidVariantLink`]
//! - **Filesystem**: [`Io`], and [`Clear`] for a partially completed sweep
//! - **Integrity**: [`DigestMismatch`]
//!
//! A blob that is simply absent is never an error; probes report it as `Ok(None)`.
//!
//! [`Configuration`]: CacheError::Configuration
//! [`InvalidDigest`]: CacheError::InvalidDigest
//! [`InvalidVariantLink`]: CacheError::InvalidVariantLink
//! [`Io`]: CacheError::Io
//! [`Clear`]: CacheError::Clear
//! [`DigestMismatch`]: CacheError::DigestMismatch

use std::path::PathBuf;

use crate::digest::ContentDigest;

/// Result type alias for operations that may return a CacheError.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error types for cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache could not be constructed from the given settings.
    #[error("invalid cache configuration: {0}")]
    Configuration(String),

    /// A string could not be parsed as a content digest.
    #[error("invalid digest {digest:?}: {reason}")]
    InvalidDigest {
        /// The rejected input.
        digest: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A variant link side file holds something other than a digest.
    #[error("invalid variant link at {}", path.display())]
    InvalidVariantLink {
        /// The side file.
        path: PathBuf,
        /// The parse failure.
        #[source]
        source: Box<CacheError>,
    },

    /// A filesystem operation other than "does not exist" failed.
    #[error("{op} {}", path.display())]
    Io {
        /// What was being attempted.
        op: &'static str,
        /// The path it was attempted on.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// Removing an entry during a cache clear failed.  Entries removed before the
    /// failure stay removed, so the directory is in an indeterminate state.
    #[error("clearing cache entry {}", path.display())]
    Clear {
        /// The entry that could not be removed.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// Written content does not hash to the digest it was stored under.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The digest the content was declared to have.
        expected: ContentDigest,
        /// The digest of the bytes actually written.
        actual: ContentDigest,
    },
}

impl CacheError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            op,
            path: path.into(),
            source,
        }
    }
}
