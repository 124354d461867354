//! Segment and manifest provider interfaces
//!
//! The transport is an external collaborator. The session only relies on
//! these traits; `HttpBackend` is the shipped implementation.

use super::types::{Manifest, MediaId, SegmentBuffer, SegmentId};
use async_trait::async_trait;
use thiserror::Error;

/// Provider-side failures
///
/// Cloneable so one whole-call failure can be attributed to every id of the
/// batch it covered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Connection, timeout or other transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend answered with a non-success status
    #[error("Backend returned status {0}")]
    Status(u16),

    /// Response body could not be understood
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Backend did not return data for this segment
    #[error("No data returned for segment {0}")]
    Missing(String),

    /// Backend explicitly failed this segment
    #[error("Segment failed: {0}")]
    Failed(String),
}

/// Per-id result of a batched segment request
#[derive(Debug)]
pub struct SegmentFetch {
    pub id: SegmentId,
    pub outcome: std::result::Result<SegmentBuffer, ProviderError>,
}

impl SegmentFetch {
    pub fn ready(id: SegmentId, buffer: SegmentBuffer) -> Self {
        Self {
            id,
            outcome: Ok(buffer),
        }
    }

    pub fn failed(id: SegmentId, error: ProviderError) -> Self {
        Self {
            id,
            outcome: Err(error),
        }
    }
}

/// Source of the segment manifest
#[async_trait]
pub trait ManifestProvider: Send + Sync {
    /// Fetch the ordered segment list for `media_id`
    async fn fetch_manifest(&self, media_id: &MediaId) -> std::result::Result<Manifest, ProviderError>;
}

/// Source of segment bytes
#[async_trait]
pub trait SegmentProvider: Send + Sync {
    /// Fetch a batch of segments
    ///
    /// Results may come back in any order and need not cover every requested
    /// id; ids without a result are treated as failed. `Err` fails the whole
    /// batch.
    async fn fetch_segments(
        &self,
        media_id: &MediaId,
        ids: &[SegmentId],
        needs_translation: bool,
    ) -> std::result::Result<Vec<SegmentFetch>, ProviderError>;
}
