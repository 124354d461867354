//! Media sink interface
//!
//! A sink incrementally builds a playable stream from appended segment bytes.
//! It accepts one append at a time: `append()` only submits, and completion is
//! reported later as `SinkEvent::UpdateEnd` (or `SinkEvent::Error`) through
//! the `SinkEvents` handle given to `attach()`.

use crate::playback::events::SessionEvent;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Sink lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Not yet open
    Closed,
    /// Open and idle
    Open,
    /// An append is being processed
    Updating,
    /// End of stream signalled
    Ended,
    /// Unusable
    Errored,
}

impl std::fmt::Display for SinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkState::Closed => write!(f, "closed"),
            SinkState::Open => write!(f, "open"),
            SinkState::Updating => write!(f, "updating"),
            SinkState::Ended => write!(f, "ended"),
            SinkState::Errored => write!(f, "errored"),
        }
    }
}

/// Notifications from the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// Sink is ready for appends (emitted once)
    Open,
    /// The outstanding append completed
    UpdateEnd,
    /// The outstanding append failed
    Error(String),
}

/// Submission-level sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    /// An append is already outstanding
    #[error("Sink is busy with another append")]
    Busy,

    /// Sink has not been opened
    #[error("Sink is not open")]
    NotOpen,

    /// End of stream was already signalled
    #[error("Sink already ended")]
    Ended,

    /// Sink is permanently broken
    #[error("Sink errored: {0}")]
    Errored(String),

    /// Sink refused the data
    #[error("Append rejected: {0}")]
    Rejected(String),

    /// Underlying I/O failure
    #[error("Sink I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SinkError {
    /// Whether no later append can ever succeed
    pub fn is_terminal(&self) -> bool {
        matches!(self, SinkError::Ended | SinkError::Errored(_))
    }
}

/// Buffered region of the sink, in sink-defined units (diagnostics only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferedRange {
    pub start: u64,
    pub end: u64,
}

impl BufferedRange {
    pub fn byte_len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

/// Handle a sink uses to report events back to its session
#[derive(Debug, Clone)]
pub struct SinkEvents {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SinkEvents {
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: SinkEvent) {
        if self.tx.send(SessionEvent::Sink(event)).is_err() {
            debug!("Sink event dropped: session closed");
        }
    }
}

/// Append-only media destination
pub trait MediaSink: Send {
    /// Hand the sink its event channel; the sink emits `Open` when ready
    fn attach(&mut self, events: SinkEvents);

    fn state(&self) -> SinkState;

    /// Submit one segment's bytes
    ///
    /// Must not be called while an append is outstanding.
    fn append(&mut self, data: &[u8]) -> std::result::Result<(), SinkError>;

    /// Signal that no more data will be appended
    fn end_of_stream(&mut self) -> std::result::Result<(), SinkError>;

    /// Buffered ranges, diagnostics only
    fn buffered(&self) -> Vec<BufferedRange>;
}

/// Sink writing the dub stream into a file
///
/// Appends are written synchronously; completion is still reported through
/// the event channel so the session sees the same flow as with an
/// asynchronous sink.
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
    state: SinkState,
    events: Option<SinkEvents>,
    written: u64,
}

impl FileSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
            state: SinkState::Closed,
            events: None,
            written: 0,
        }
    }

    fn emit(&self, event: SinkEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

impl MediaSink for FileSink {
    fn attach(&mut self, events: SinkEvents) {
        self.events = Some(events);

        match File::create(&self.path) {
            Ok(file) => {
                info!("File sink opened: {}", self.path.display());
                self.file = Some(file);
                self.state = SinkState::Open;
                self.emit(SinkEvent::Open);
            }
            Err(e) => {
                error!("Failed to open file sink {}: {}", self.path.display(), e);
                self.state = SinkState::Errored;
            }
        }
    }

    fn state(&self) -> SinkState {
        self.state
    }

    fn append(&mut self, data: &[u8]) -> std::result::Result<(), SinkError> {
        match self.state {
            SinkState::Open => {}
            SinkState::Updating => return Err(SinkError::Busy),
            SinkState::Closed => return Err(SinkError::NotOpen),
            SinkState::Ended => return Err(SinkError::Ended),
            SinkState::Errored => {
                return Err(SinkError::Errored(format!(
                    "{} could not be opened",
                    self.path.display()
                )))
            }
        }

        let file = self.file.as_mut().ok_or(SinkError::NotOpen)?;
        file.write_all(data)?;
        self.written += data.len() as u64;
        debug!("File sink appended {} bytes (total {})", data.len(), self.written);

        self.emit(SinkEvent::UpdateEnd);
        Ok(())
    }

    fn end_of_stream(&mut self) -> std::result::Result<(), SinkError> {
        match self.state {
            SinkState::Open => {}
            SinkState::Ended => return Err(SinkError::Ended),
            SinkState::Closed => return Err(SinkError::NotOpen),
            SinkState::Updating => return Err(SinkError::Busy),
            SinkState::Errored => return Err(SinkError::Errored("end of stream on broken sink".to_string())),
        }

        if let Some(mut file) = self.file.take() {
            file.flush()?;
            file.sync_all()?;
        }
        self.state = SinkState::Ended;
        info!(
            "File sink ended: {} ({} bytes)",
            self.path.display(),
            self.written
        );
        Ok(())
    }

    fn buffered(&self) -> Vec<BufferedRange> {
        if self.written == 0 {
            Vec::new()
        } else {
            vec![BufferedRange {
                start: 0,
                end: self.written,
            }]
        }
    }
}
