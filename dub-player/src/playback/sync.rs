//! Dual-Clock Synchronizer
//!
//! Keeps the secondary (dub) clock following the primary (video) clock:
//! play, pause and position. The primary is driven by the user; the
//! secondary is only ever driven from here.
//!
//! Seeks on the primary are rejected while the dub stream is still being
//! built, because the secondary only has the segments appended so far. The
//! rejection moves the primary back to the secondary's position; the host
//! may report that correction as another `Seeked`, which is absorbed if it
//! arrives within `CORRECTION_WINDOW` and lands on the secondary's current
//! position. Any other primary event disarms the absorb. Once the stream has
//! ended the whole dub track is buffered and seeks are followed.

use crate::playback::clock::{ClockEvent, PlayError, PlaybackClock};
use crate::playback::events::SessionEmitter;
use dub_common::events::{ClockRole, MediaErrorKind, UserNotice};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Echoed correction seeks within this distance of the secondary are absorbed
const CORRECTION_TOLERANCE: Duration = Duration::from_millis(250);

/// How long after a rejection its echo is still expected
const CORRECTION_WINDOW: Duration = Duration::from_millis(500);

/// What happened to a primary seek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    /// Echo of our own correcting seek
    Absorbed,
    /// Playback has not started; nothing to keep in step
    Ignored,
    /// Secondary moved to the primary's new position
    Followed,
    /// Primary moved back to the secondary's position
    Rejected,
}

pub struct ClockSync {
    primary: Box<dyn PlaybackClock>,
    secondary: Box<dyn PlaybackClock>,
    emitter: SessionEmitter,
    secondary_active: bool,
    /// First append completed and initial play issued
    started: bool,
    /// Whole dub track is in the sink
    stream_complete: bool,
    /// Deadline for the echo of our last correcting seek
    pending_correction: Option<Instant>,
}

impl ClockSync {
    pub fn new(
        primary: Box<dyn PlaybackClock>,
        secondary: Box<dyn PlaybackClock>,
        emitter: SessionEmitter,
    ) -> Self {
        Self {
            primary,
            secondary,
            emitter,
            secondary_active: false,
            started: false,
            stream_complete: false,
            pending_correction: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_secondary_active(&self) -> bool {
        self.secondary_active
    }

    /// First segment is in the sink: start both clocks together
    pub fn on_buffer_ready(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        if let Err(e) = self.primary.play() {
            match e {
                PlayError::NotAllowed(reason) => {
                    warn!("Primary playback blocked: {}", reason);
                    self.emitter.notice(UserNotice::PlaybackBlocked);
                }
                other => warn!("Primary failed to start: {}", other),
            }
            return;
        }

        if self.play_secondary() {
            let position = self.secondary.position();
            info!("▶️  Dub playback started at {:.3}s", position.as_secs_f64());
            self.emitter.playback_started(position.as_millis() as u64);
        }
    }

    /// Stream fully appended; seeks are followed from now on
    pub fn on_stream_complete(&mut self) {
        self.stream_complete = true;
    }

    pub fn handle_clock_event(&mut self, role: ClockRole, event: ClockEvent) {
        if role == ClockRole::Primary && event != ClockEvent::Seeked {
            self.pending_correction = None;
        }

        match (role, event) {
            (ClockRole::Primary, ClockEvent::Play) => self.on_primary_play(),
            (ClockRole::Primary, ClockEvent::Pause) => self.on_primary_pause(),
            (ClockRole::Primary, ClockEvent::Seeked) => {
                self.on_primary_seeked();
            }
            (ClockRole::Primary, ClockEvent::Ended) => self.on_primary_ended(),
            (ClockRole::Secondary, ClockEvent::Pause | ClockEvent::Ended) => {
                self.secondary_active = false;
            }
            (ClockRole::Secondary, ClockEvent::Play | ClockEvent::Seeked) => {
                debug!("Secondary {:?} (driven by us)", event);
            }
            (role, ClockEvent::Error { code }) => self.on_error(role, code),
        }
    }

    pub fn on_primary_play(&mut self) {
        if !self.started {
            debug!("Primary play before first buffer; deferring dub start");
            return;
        }
        if self.secondary_active {
            return;
        }
        self.play_secondary();
    }

    pub fn on_primary_pause(&mut self) {
        if self.secondary_active {
            self.secondary.pause();
        }
        self.secondary_active = false;
    }

    pub fn on_primary_seeked(&mut self) -> SeekOutcome {
        let position = self.primary.position();

        if let Some(deadline) = self.pending_correction.take() {
            let target = self.secondary.position();
            let distance = if position > target {
                position - target
            } else {
                target - position
            };
            if Instant::now() <= deadline && distance <= CORRECTION_TOLERANCE {
                debug!("Absorbed correcting seek to {:.3}s", position.as_secs_f64());
                return SeekOutcome::Absorbed;
            }
        }

        if !self.started {
            debug!("Seek before playback start ignored");
            return SeekOutcome::Ignored;
        }

        if self.stream_complete {
            debug!("Following seek to {:.3}s", position.as_secs_f64());
            self.secondary.set_position(position);
            return SeekOutcome::Followed;
        }

        let target = self.secondary.position();
        warn!(
            "Seek to {:.3}s rejected while streaming; returning to {:.3}s",
            position.as_secs_f64(),
            target.as_secs_f64()
        );
        self.primary.set_position(target);
        self.pending_correction = Some(Instant::now() + CORRECTION_WINDOW);
        self.emitter.notice(UserNotice::SeekUnsupported);
        SeekOutcome::Rejected
    }

    pub fn on_primary_ended(&mut self) {
        if self.secondary_active {
            self.secondary.pause();
        }
        self.secondary_active = false;
    }

    fn on_error(&mut self, role: ClockRole, code: u16) {
        let kind = MediaErrorKind::from_code(code);
        warn!("{} clock error: {} (code {})", role, kind, code);
        self.emitter.playback_error(role, kind, code);
    }

    /// Align and start the secondary; returns whether it is now playing
    fn play_secondary(&mut self) -> bool {
        self.secondary.set_position(self.primary.position());
        match self.secondary.play() {
            Ok(()) => {
                self.secondary_active = true;
                true
            }
            Err(PlayError::NotAllowed(reason)) => {
                warn!("Dub playback blocked: {}", reason);
                self.emitter.notice(UserNotice::PlaybackBlocked);
                self.secondary_active = false;
                false
            }
            Err(e) => {
                warn!("Dub playback failed: {}", e);
                self.secondary_active = false;
                false
            }
        }
    }
}
