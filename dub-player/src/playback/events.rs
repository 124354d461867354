//! Internal session events and event bus emission
//!
//! `SessionEvent` is the single input type of a session: everything that can
//! change session state arrives as one of these through one mpsc channel and
//! is handled to completion before the next. `SessionEmitter` converts
//! session milestones into `DubEvent`s on the shared bus.

use crate::playback::clock::ClockEvent;
use crate::playback::scheduler::FetchBatch;
use crate::playback::sink::SinkEvent;
use crate::segment::{ProviderError, SegmentFetch};
use dub_common::events::{ClockRole, DubEvent, EventBus, MediaErrorKind, UserNotice};
use std::sync::Arc;
use uuid::Uuid;

/// Inputs to the session state machine
#[derive(Debug)]
pub enum SessionEvent {
    /// A provider call returned
    FetchResolved {
        batch: FetchBatch,
        result: std::result::Result<Vec<SegmentFetch>, ProviderError>,
    },

    /// Back-off elapsed for a failed batch
    FetchRetryDue(FetchBatch),

    /// Sink reported open, append completion or append error
    Sink(SinkEvent),

    /// Back-off elapsed for a failed append
    AppendRetryDue,

    /// Periodic wake-up; the pump that follows every event re-runs the
    /// look-ahead, so a tick only catches up if an earlier pass was missed
    Tick,

    /// Host reported a clock event
    Clock { role: ClockRole, event: ClockEvent },

    /// Stop the session loop
    Shutdown,
}

/// Publishes session milestones on the event bus
#[derive(Debug, Clone)]
pub struct SessionEmitter {
    session_id: Uuid,
    bus: Arc<EventBus>,
}

impl SessionEmitter {
    pub fn new(session_id: Uuid, bus: Arc<EventBus>) -> Self {
        Self { session_id, bus }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn now() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }

    pub fn session_started(&self, media_id: &str, segment_count: usize) {
        self.bus.emit_lossy(DubEvent::SessionStarted {
            session_id: self.session_id,
            media_id: media_id.to_string(),
            segment_count,
            timestamp: Self::now(),
        });
    }

    pub fn segments_requested(&self, batch: &FetchBatch) {
        self.bus.emit_lossy(DubEvent::SegmentsRequested {
            session_id: self.session_id,
            segment_ids: batch.ids.iter().map(|id| id.to_string()).collect(),
            attempt: batch.attempt,
            timestamp: Self::now(),
        });
    }

    pub fn segment_skipped(&self, segment_id: &str, attempts: u32, reason: &str) {
        self.bus.emit_lossy(DubEvent::SegmentSkipped {
            session_id: self.session_id,
            segment_id: segment_id.to_string(),
            attempts,
            reason: reason.to_string(),
            timestamp: Self::now(),
        });
    }

    pub fn segment_appended(&self, segment_id: &str, manifest_index: usize, bytes: usize) {
        self.bus.emit_lossy(DubEvent::SegmentAppended {
            session_id: self.session_id,
            segment_id: segment_id.to_string(),
            manifest_index,
            bytes,
            timestamp: Self::now(),
        });
    }

    pub fn append_retry(&self, segment_id: &str, reason: &str) {
        self.bus.emit_lossy(DubEvent::AppendRetry {
            session_id: self.session_id,
            segment_id: segment_id.to_string(),
            reason: reason.to_string(),
            timestamp: Self::now(),
        });
    }

    pub fn stream_ended(&self, appended: usize, skipped: usize, buffered_bytes: u64) {
        self.bus.emit_lossy(DubEvent::StreamEnded {
            session_id: self.session_id,
            appended,
            skipped,
            buffered_bytes,
            timestamp: Self::now(),
        });
    }

    pub fn stream_aborted(&self, reason: &str) {
        self.bus.emit_lossy(DubEvent::StreamAborted {
            session_id: self.session_id,
            reason: reason.to_string(),
            timestamp: Self::now(),
        });
    }

    pub fn playback_started(&self, position_ms: u64) {
        self.bus.emit_lossy(DubEvent::PlaybackStarted {
            session_id: self.session_id,
            position_ms,
            timestamp: Self::now(),
        });
    }

    pub fn notice(&self, notice: UserNotice) {
        self.bus.emit_lossy(DubEvent::Notice {
            session_id: self.session_id,
            notice,
            timestamp: Self::now(),
        });
    }

    pub fn playback_error(&self, clock: ClockRole, kind: MediaErrorKind, code: u16) {
        self.bus.emit_lossy(DubEvent::PlaybackError {
            session_id: self.session_id,
            clock,
            kind,
            code,
            timestamp: Self::now(),
        });
    }

    pub fn session_closed(&self) {
        self.bus.emit_lossy(DubEvent::SessionClosed {
            session_id: self.session_id,
            timestamp: Self::now(),
        });
    }
}
