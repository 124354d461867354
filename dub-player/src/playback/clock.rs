//! Playback clock interface
//!
//! Both the primary (video) and the secondary (dub) clock expose the same
//! control surface. Hosts report what happened to a clock with `ClockEvent`s;
//! the synchronizer reacts by driving the other clock through this trait.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Events a host reports for a clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    Play,
    Pause,
    /// Position changed by a seek (user scrub or programmatic)
    Seeked,
    Ended,
    /// Platform media error with its numeric code
    Error { code: u16 },
}

/// Why a clock refused to start
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayError {
    /// Platform policy forbids starting without a user gesture
    #[error("Playback not allowed: {0}")]
    NotAllowed(String),

    /// Any other start failure
    #[error("Playback failed: {0}")]
    Failed(String),
}

/// Controllable playback clock
pub trait PlaybackClock: Send {
    fn position(&self) -> Duration;

    fn set_position(&mut self, position: Duration);

    fn play(&mut self) -> std::result::Result<(), PlayError>;

    fn pause(&mut self);

    fn is_playing(&self) -> bool;
}

#[derive(Debug)]
struct SimulatedInner {
    base: Duration,
    playing_since: Option<Instant>,
    play_allowed: bool,
}

impl SimulatedInner {
    fn position(&self) -> Duration {
        match self.playing_since {
            Some(since) => self.base + since.elapsed(),
            None => self.base,
        }
    }
}

/// Wall-clock driven clock
///
/// Used by the headless binary in place of a real media element. Clones share
/// state, so a host can keep a handle while the session owns another.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    inner: Arc<Mutex<SimulatedInner>>,
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimulatedInner {
                base: Duration::ZERO,
                playing_since: None,
                play_allowed: true,
            })),
        }
    }

    /// Emulate an autoplay policy that rejects `play()`
    pub fn set_play_allowed(&self, allowed: bool) {
        self.lock().play_allowed = allowed;
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PlaybackClock for SimulatedClock {
    fn position(&self) -> Duration {
        self.lock().position()
    }

    fn set_position(&mut self, position: Duration) {
        let mut inner = self.lock();
        inner.base = position;
        if inner.playing_since.is_some() {
            inner.playing_since = Some(Instant::now());
        }
    }

    fn play(&mut self) -> std::result::Result<(), PlayError> {
        let mut inner = self.lock();
        if !inner.play_allowed {
            return Err(PlayError::NotAllowed("autoplay blocked".to_string()));
        }
        if inner.playing_since.is_none() {
            inner.playing_since = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&mut self) {
        let mut inner = self.lock();
        inner.base = inner.position();
        inner.playing_since = None;
    }

    fn is_playing(&self) -> bool {
        self.lock().playing_since.is_some()
    }
}
