//! # Dub Common Library
//!
//! Shared code for the dub track player including:
//! - Error types
//! - TOML configuration loading
//! - Event types (DubEvent enum) and the EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{DubEvent, EventBus};
