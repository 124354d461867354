//! Event types for the dub player event system
//!
//! Provides the published event definitions and the EventBus. Events are
//! observability output: emitting one never changes session behavior, and a
//! bus with no subscribers silently drops them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Which playback clock an event refers to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClockRole {
    /// The host video element
    Primary,
    /// The dub track
    Secondary,
}

impl std::fmt::Display for ClockRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClockRole::Primary => write!(f, "primary"),
            ClockRole::Secondary => write!(f, "secondary"),
        }
    }
}

/// Coarse classification of a platform playback error
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaErrorKind {
    /// Fetching was aborted by the user agent
    Aborted,
    /// Network error while loading media
    Network,
    /// Media data could not be decoded
    Decode,
    /// Source or format not supported
    Unsupported,
    /// Any code outside the table
    Unknown,
}

impl MediaErrorKind {
    /// Classify a platform media error code
    ///
    /// Codes follow the media element convention: 1 aborted, 2 network,
    /// 3 decode, 4 source not supported.
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => MediaErrorKind::Aborted,
            2 => MediaErrorKind::Network,
            3 => MediaErrorKind::Decode,
            4 => MediaErrorKind::Unsupported,
            _ => MediaErrorKind::Unknown,
        }
    }
}

impl std::fmt::Display for MediaErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaErrorKind::Aborted => write!(f, "aborted"),
            MediaErrorKind::Network => write!(f, "network"),
            MediaErrorKind::Decode => write!(f, "decode"),
            MediaErrorKind::Unsupported => write!(f, "unsupported"),
            MediaErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// User-visible notices
///
/// These replace the on-page alerts of a browser host; a UI subscribes to the
/// bus and renders them however it likes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UserNotice {
    /// The platform refused to start dub playback without a user gesture
    PlaybackBlocked,
    /// A seek was undone because the stream cannot reposition mid-stream
    SeekUnsupported,
    /// Segments were dropped after exhausting their fetch attempts
    SegmentsSkipped { segment_ids: Vec<String> },
}

/// Dub player event types
///
/// Every variant carries the session it belongs to so that concurrent
/// sessions can share one subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DubEvent {
    /// Manifest loaded and streaming began
    SessionStarted {
        session_id: Uuid,
        media_id: String,
        segment_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A batch of segments was sent to the provider
    SegmentsRequested {
        session_id: Uuid,
        segment_ids: Vec<String>,
        attempt: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A segment exhausted its fetch attempts and will never be appended
    SegmentSkipped {
        session_id: Uuid,
        segment_id: String,
        attempts: u32,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A segment finished appending to the sink
    SegmentAppended {
        session_id: Uuid,
        segment_id: String,
        manifest_index: usize,
        bytes: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An append failed and will be resubmitted
    AppendRetry {
        session_id: Uuid,
        segment_id: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The last segment was appended and end-of-stream signalled
    StreamEnded {
        session_id: Uuid,
        appended: usize,
        skipped: usize,
        /// Bytes the sink reports as buffered
        buffered_bytes: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The sink became unusable; nothing more will be appended
    StreamAborted {
        session_id: Uuid,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// First buffer became ready and the clocks were started together
    PlaybackStarted {
        session_id: Uuid,
        position_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Something the user should be told about
    Notice {
        session_id: Uuid,
        notice: UserNotice,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A clock reported a playback error (non-fatal)
    PlaybackError {
        session_id: Uuid,
        clock: ClockRole,
        kind: MediaErrorKind,
        code: u16,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Session loop exited
    SessionClosed {
        session_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl DubEvent {
    /// Session this event belongs to
    pub fn session_id(&self) -> Uuid {
        match self {
            DubEvent::SessionStarted { session_id, .. }
            | DubEvent::SegmentsRequested { session_id, .. }
            | DubEvent::SegmentSkipped { session_id, .. }
            | DubEvent::SegmentAppended { session_id, .. }
            | DubEvent::AppendRetry { session_id, .. }
            | DubEvent::StreamEnded { session_id, .. }
            | DubEvent::StreamAborted { session_id, .. }
            | DubEvent::PlaybackStarted { session_id, .. }
            | DubEvent::Notice { session_id, .. }
            | DubEvent::PlaybackError { session_id, .. }
            | DubEvent::SessionClosed { session_id, .. } => *session_id,
        }
    }

    /// Short name used for log lines
    pub fn event_type(&self) -> &'static str {
        match self {
            DubEvent::SessionStarted { .. } => "SessionStarted",
            DubEvent::SegmentsRequested { .. } => "SegmentsRequested",
            DubEvent::SegmentSkipped { .. } => "SegmentSkipped",
            DubEvent::SegmentAppended { .. } => "SegmentAppended",
            DubEvent::AppendRetry { .. } => "AppendRetry",
            DubEvent::StreamEnded { .. } => "StreamEnded",
            DubEvent::StreamAborted { .. } => "StreamAborted",
            DubEvent::PlaybackStarted { .. } => "PlaybackStarted",
            DubEvent::Notice { .. } => "Notice",
            DubEvent::PlaybackError { .. } => "PlaybackError",
            DubEvent::SessionClosed { .. } => "SessionClosed",
        }
    }
}

/// Central event distribution bus
///
/// Thin wrapper over `tokio::sync::broadcast`. Slow subscribers lag and lose
/// the oldest events rather than applying backpressure to sessions.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<DubEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use dub_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<DubEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: DubEvent) -> Result<usize, broadcast::error::SendError<DubEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: DubEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_error_code_table() {
        assert_eq!(MediaErrorKind::from_code(1), MediaErrorKind::Aborted);
        assert_eq!(MediaErrorKind::from_code(2), MediaErrorKind::Network);
        assert_eq!(MediaErrorKind::from_code(3), MediaErrorKind::Decode);
        assert_eq!(MediaErrorKind::from_code(4), MediaErrorKind::Unsupported);
        assert_eq!(MediaErrorKind::from_code(0), MediaErrorKind::Unknown);
        assert_eq!(MediaErrorKind::from_code(99), MediaErrorKind::Unknown);
    }

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let session_id = Uuid::new_v4();

        bus.emit(DubEvent::SessionClosed {
            session_id,
            timestamp: chrono::Utc::now(),
        })
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id(), session_id);
        assert_eq!(event.event_type(), "SessionClosed");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);

        let event = DubEvent::SessionClosed {
            session_id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
        };
        assert!(bus.emit(event.clone()).is_err());
        bus.emit_lossy(event);
    }

    #[test]
    fn test_notice_serialization() {
        let event = DubEvent::Notice {
            session_id: Uuid::nil(),
            notice: UserNotice::SeekUnsupported,
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Notice");
        assert_eq!(json["notice"]["kind"], "seek_unsupported");
    }
}
