//! Error types for dub-player
//!
//! Only session start can fail hard. Everything that goes wrong after the
//! manifest is loaded is absorbed by the session (retried, skipped or logged),
//! so these variants describe start-up failures.

use thiserror::Error;

/// Main error type for dub-player
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(#[from] dub_common::Error),

    /// The manifest could not be obtained, so no session can start
    #[error("Manifest unavailable for {media_id}: {source}")]
    ManifestUnavailable {
        media_id: String,
        #[source]
        source: crate::segment::ProviderError,
    },

    /// Session task failed
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using dub-player Error
pub type Result<T> = std::result::Result<T, Error>;
