//! # Dub Player Library (dub-player)
//!
//! Streams a segmented dub audio track into an append-only media sink and
//! keeps its playback clock locked to an independently controlled video clock.
//!
//! **Architecture:** one session task per media item. The task owns the
//! prefetch scheduler, the buffer feeder and the clock synchronizer, and is
//! driven by a single event queue (provider results, sink events, clock events,
//! timers). Transport, sink and clocks are traits so hosts can plug in their
//! own implementations; an HTTP backend client, a file sink and a simulated
//! clock ship with the crate.

pub mod config;
pub mod error;
pub mod playback;
pub mod segment;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use playback::{Session, SessionHandle, SessionParams};
