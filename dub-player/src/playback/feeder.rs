//! Buffer Feeder
//!
//! Owns the media sink and the append queue. Submits queued segments to the
//! sink one at a time, in queue order, and keeps a failed entry at the head
//! of the queue until the sink accepts it.
//!
//! **State machine:**
//! ```text
//! Closed ──open──> Idle ──submit──> Updating ──update end──> Idle
//!                   ^                  │
//!                   │             append error
//!                   │                  v
//!                   └──retry due──── Backoff
//!
//! Idle + drained + manifest exhausted ──finish──> Ended
//! any submission with a dead sink ──────────────> Errored
//! ```
//!
//! At most one append is in flight: `try_submit()` only acts in `Idle`.

use crate::playback::sink::{MediaSink, SinkError, SinkEvents, SinkState};
use crate::segment::{SegmentBuffer, SegmentId};
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};

/// One segment waiting to be appended
#[derive(Debug)]
pub struct AppendQueueEntry {
    pub id: SegmentId,
    /// Position in the manifest
    pub index: usize,
    pub buffer: SegmentBuffer,
}

impl AppendQueueEntry {
    pub fn new(id: SegmentId, index: usize, buffer: SegmentBuffer) -> Self {
        Self { id, index, buffer }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeederState {
    /// Sink not open yet
    Closed,
    Idle,
    /// Append outstanding
    Updating,
    /// Last append failed; waiting to resubmit the head entry
    Backoff,
    /// End of stream signalled
    Ended,
    /// Sink unusable (terminal)
    Errored,
}

impl std::fmt::Display for FeederState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeederState::Closed => write!(f, "Closed"),
            FeederState::Idle => write!(f, "Idle"),
            FeederState::Updating => write!(f, "Updating"),
            FeederState::Backoff => write!(f, "Backoff"),
            FeederState::Ended => write!(f, "Ended"),
            FeederState::Errored => write!(f, "Errored"),
        }
    }
}

/// Result of `try_submit()`
#[derive(Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Head entry handed to the sink
    Submitted(SegmentId),
    /// Not idle, or nothing queued
    Nothing,
    /// Sink refused the bytes; entry stays at the head, feeder in Backoff
    Rejected { id: SegmentId, reason: String },
    /// Sink is ended or errored; feeder is now Errored
    Terminal { reason: String },
}

pub struct BufferFeeder {
    sink: Box<dyn MediaSink>,
    state: FeederState,
    queue: VecDeque<AppendQueueEntry>,
    in_flight: Option<AppendQueueEntry>,
    /// Why the feeder entered Errored
    failure: Option<String>,
}

impl BufferFeeder {
    pub fn new(sink: Box<dyn MediaSink>) -> Self {
        Self {
            sink,
            state: FeederState::Closed,
            queue: VecDeque::new(),
            in_flight: None,
            failure: None,
        }
    }

    /// Hand the sink its event channel
    pub fn attach(&mut self, events: SinkEvents) {
        self.sink.attach(events);
        if self.sink.state() == SinkState::Errored {
            error!("Sink failed to open; no segments will be appended");
            self.fail("sink failed to open".to_string());
        }
    }

    pub fn state(&self) -> FeederState {
        self.state
    }

    pub fn sink(&self) -> &dyn MediaSink {
        self.sink.as_ref()
    }

    /// Ended or Errored
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, FeederState::Ended | FeederState::Errored)
    }

    /// Nothing queued and nothing in flight
    pub fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_none()
    }

    /// Reason the feeder is Errored, if it is
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn fail(&mut self, reason: String) {
        self.state = FeederState::Errored;
        self.failure = Some(reason);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight(&self) -> Option<&SegmentId> {
        self.in_flight.as_ref().map(|entry| &entry.id)
    }

    /// Sink reported open
    pub fn on_open(&mut self) -> bool {
        if self.state != FeederState::Closed {
            debug!("Ignoring sink open in state {}", self.state);
            return false;
        }
        info!("Sink open, feeder idle");
        self.state = FeederState::Idle;
        true
    }

    pub fn enqueue(&mut self, entry: AppendQueueEntry) {
        self.queue.push_back(entry);
    }

    /// Submit the head entry if idle
    pub fn try_submit(&mut self) -> SubmitOutcome {
        if self.state != FeederState::Idle {
            return SubmitOutcome::Nothing;
        }
        let Some(entry) = self.queue.pop_front() else {
            return SubmitOutcome::Nothing;
        };

        // Enter Updating before the call: a sink may report completion from
        // inside append()
        self.state = FeederState::Updating;
        match self.sink.append(entry.buffer.as_slice()) {
            Ok(()) => {
                debug!(
                    "Submitted {} ({} bytes, index {})",
                    entry.id,
                    entry.buffer.len(),
                    entry.index
                );
                let id = entry.id.clone();
                self.in_flight = Some(entry);
                SubmitOutcome::Submitted(id)
            }
            Err(e) if e.is_terminal() => {
                error!("Sink can no longer accept appends: {}", e);
                self.queue.push_front(entry);
                self.fail(e.to_string());
                SubmitOutcome::Terminal {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                warn!("Append of {} rejected: {}", entry.id, e);
                let id = entry.id.clone();
                self.queue.push_front(entry);
                self.state = FeederState::Backoff;
                SubmitOutcome::Rejected {
                    id,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// The in-flight append completed; returns its entry
    pub fn on_update_end(&mut self) -> Option<AppendQueueEntry> {
        if self.state != FeederState::Updating {
            debug!("Ignoring update end in state {}", self.state);
            return None;
        }
        self.state = FeederState::Idle;
        self.in_flight.take()
    }

    /// The in-flight append failed; the entry goes back to the head
    ///
    /// Returns the id of the entry to retry.
    pub fn on_append_error(&mut self, reason: &str) -> Option<SegmentId> {
        if self.state != FeederState::Updating {
            debug!("Ignoring append error in state {}: {}", self.state, reason);
            return None;
        }
        let entry = self.in_flight.take()?;
        warn!("Append of {} failed: {}", entry.id, reason);
        let id = entry.id.clone();
        self.queue.push_front(entry);
        self.state = FeederState::Backoff;
        Some(id)
    }

    /// Back-off elapsed
    pub fn on_retry_due(&mut self) {
        if self.state == FeederState::Backoff {
            self.state = FeederState::Idle;
        }
    }

    /// Signal end of stream on the sink
    ///
    /// Only valid when idle and drained.
    pub fn finish(&mut self) -> std::result::Result<(), SinkError> {
        if self.state != FeederState::Idle || !self.is_drained() {
            return Err(SinkError::Busy);
        }
        match self.sink.end_of_stream() {
            Ok(()) => {
                self.state = FeederState::Ended;
                Ok(())
            }
            Err(e) => {
                error!("End of stream failed: {}", e);
                self.fail(e.to_string());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::sink::BufferedRange;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Script {
        appended: Vec<Vec<u8>>,
        reject_next: Option<SinkError>,
        ended: bool,
    }

    struct ScriptedSink {
        script: Arc<Mutex<Script>>,
        state: SinkState,
    }

    impl MediaSink for ScriptedSink {
        fn attach(&mut self, _events: SinkEvents) {
            self.state = SinkState::Open;
        }

        fn state(&self) -> SinkState {
            self.state
        }

        fn append(&mut self, data: &[u8]) -> std::result::Result<(), SinkError> {
            let mut script = self.script.lock().unwrap();
            if let Some(e) = script.reject_next.take() {
                return Err(e);
            }
            script.appended.push(data.to_vec());
            Ok(())
        }

        fn end_of_stream(&mut self) -> std::result::Result<(), SinkError> {
            self.script.lock().unwrap().ended = true;
            self.state = SinkState::Ended;
            Ok(())
        }

        fn buffered(&self) -> Vec<BufferedRange> {
            Vec::new()
        }
    }

    fn feeder() -> (BufferFeeder, Arc<Mutex<Script>>) {
        let script = Arc::new(Mutex::new(Script::default()));
        let sink = ScriptedSink {
            script: Arc::clone(&script),
            state: SinkState::Closed,
        };
        let mut feeder = BufferFeeder::new(Box::new(sink));
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        feeder.attach(SinkEvents::new(tx));
        (feeder, script)
    }

    fn entry(name: &str, index: usize) -> AppendQueueEntry {
        AppendQueueEntry::new(
            SegmentId::from_raw(name),
            index,
            SegmentBuffer::new(name.as_bytes().to_vec()),
        )
    }

    #[test]
    fn test_closed_until_open() {
        let (mut feeder, script) = feeder();
        feeder.enqueue(entry("a", 0));
        assert_eq!(feeder.try_submit(), SubmitOutcome::Nothing);

        assert!(feeder.on_open());
        assert!(!feeder.on_open());
        assert_eq!(
            feeder.try_submit(),
            SubmitOutcome::Submitted(SegmentId::from_raw("a"))
        );
        assert_eq!(script.lock().unwrap().appended, vec![b"a".to_vec()]);
    }

    #[test]
    fn test_single_append_in_flight() {
        let (mut feeder, script) = feeder();
        feeder.on_open();
        feeder.enqueue(entry("a", 0));
        feeder.enqueue(entry("b", 1));

        assert!(matches!(feeder.try_submit(), SubmitOutcome::Submitted(_)));
        assert_eq!(feeder.state(), FeederState::Updating);
        assert_eq!(feeder.try_submit(), SubmitOutcome::Nothing);
        assert_eq!(script.lock().unwrap().appended.len(), 1);

        let done = feeder.on_update_end().unwrap();
        assert_eq!(done.id.as_str(), "a");
        assert_eq!(
            feeder.try_submit(),
            SubmitOutcome::Submitted(SegmentId::from_raw("b"))
        );
    }

    #[test]
    fn test_append_error_keeps_entry_at_head() {
        let (mut feeder, script) = feeder();
        feeder.on_open();
        feeder.enqueue(entry("a", 0));
        feeder.enqueue(entry("b", 1));
        feeder.try_submit();

        assert_eq!(
            feeder.on_append_error("quota exceeded"),
            Some(SegmentId::from_raw("a"))
        );
        assert_eq!(feeder.state(), FeederState::Backoff);
        assert_eq!(feeder.try_submit(), SubmitOutcome::Nothing);

        feeder.on_retry_due();
        assert_eq!(
            feeder.try_submit(),
            SubmitOutcome::Submitted(SegmentId::from_raw("a"))
        );
        assert_eq!(script.lock().unwrap().appended.len(), 2);
    }

    #[test]
    fn test_submission_rejection_backs_off() {
        let (mut feeder, script) = feeder();
        feeder.on_open();
        feeder.enqueue(entry("a", 0));
        script.lock().unwrap().reject_next = Some(SinkError::Rejected("busy decoder".to_string()));

        assert!(matches!(
            feeder.try_submit(),
            SubmitOutcome::Rejected { .. }
        ));
        assert_eq!(feeder.state(), FeederState::Backoff);
        assert_eq!(feeder.queue_len(), 1);
        assert!(feeder.in_flight().is_none());
    }

    #[test]
    fn test_terminal_sink_error() {
        let (mut feeder, script) = feeder();
        feeder.on_open();
        feeder.enqueue(entry("a", 0));
        script.lock().unwrap().reject_next = Some(SinkError::Ended);

        assert!(matches!(
            feeder.try_submit(),
            SubmitOutcome::Terminal { .. }
        ));
        assert_eq!(feeder.state(), FeederState::Errored);
        assert!(feeder.is_terminal());
        assert_eq!(feeder.failure(), Some("Sink already ended"));
    }

    #[test]
    fn test_finish_requires_drained() {
        let (mut feeder, script) = feeder();
        feeder.on_open();
        feeder.enqueue(entry("a", 0));
        assert!(matches!(feeder.finish(), Err(SinkError::Busy)));
        assert_eq!(feeder.state(), FeederState::Idle);

        feeder.try_submit();
        feeder.on_update_end();
        feeder.finish().unwrap();
        assert_eq!(feeder.state(), FeederState::Ended);
        assert!(script.lock().unwrap().ended);
    }
}
