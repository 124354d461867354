//! Per-segment status ledger
//!
//! Every segment id of the manifest is in exactly one status at any instant.
//! The ledger is the single source of truth for that status; cache, append
//! queue and sink contents follow it.

use crate::segment::SegmentId;
use std::collections::HashMap;
use tracing::debug;

/// Segment lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentStatus {
    /// Never requested
    NotStarted,
    /// Provider call outstanding (including retry back-off)
    Requested,
    /// Bytes held in the cache, waiting for their turn
    Cached,
    /// In the feeder's append queue
    Queued,
    /// Submitted to the sink, awaiting completion
    Appending,
    /// In the sink
    Appended,
    /// Fetch attempts exhausted; permanently skipped
    Failed,
}

impl SegmentStatus {
    /// Counts against the prefetch window
    pub fn is_outstanding(self) -> bool {
        matches!(
            self,
            SegmentStatus::Requested
                | SegmentStatus::Cached
                | SegmentStatus::Queued
                | SegmentStatus::Appending
        )
    }

    /// No further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, SegmentStatus::Appended | SegmentStatus::Failed)
    }

    fn can_become(self, next: SegmentStatus) -> bool {
        use SegmentStatus::*;
        matches!(
            (self, next),
            (NotStarted, Requested)
                | (Requested, Cached)
                | (Requested, Failed)
                | (Cached, Queued)
                | (Queued, Appending)
                | (Appending, Queued)
                | (Appending, Appended)
        )
    }
}

impl std::fmt::Display for SegmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentStatus::NotStarted => write!(f, "NotStarted"),
            SegmentStatus::Requested => write!(f, "Requested"),
            SegmentStatus::Cached => write!(f, "Cached"),
            SegmentStatus::Queued => write!(f, "Queued"),
            SegmentStatus::Appending => write!(f, "Appending"),
            SegmentStatus::Appended => write!(f, "Appended"),
            SegmentStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Status of every segment touched so far
///
/// Ids absent from the map are `NotStarted`.
#[derive(Debug, Default)]
pub struct SegmentLedger {
    statuses: HashMap<SegmentId, SegmentStatus>,
}

impl SegmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, id: &SegmentId) -> SegmentStatus {
        self.statuses
            .get(id)
            .copied()
            .unwrap_or(SegmentStatus::NotStarted)
    }

    /// Move `id` to `next` if that is a legal transition
    ///
    /// Returns false (and leaves the status unchanged) otherwise.
    pub fn transition(&mut self, id: &SegmentId, next: SegmentStatus) -> bool {
        let current = self.status(id);
        if !current.can_become(next) {
            debug!("Ignoring illegal transition for {}: {} -> {}", id, current, next);
            return false;
        }
        self.statuses.insert(id.clone(), next);
        true
    }

    pub fn count(&self, status: SegmentStatus) -> usize {
        self.statuses.values().filter(|s| **s == status).count()
    }

    /// Segments counting against the window
    pub fn outstanding(&self) -> usize {
        self.statuses.values().filter(|s| s.is_outstanding()).count()
    }
}
