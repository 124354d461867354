//! Dub session engine: scheduling, feeding and clock sync

pub mod clock;
pub mod driver;
pub mod events;
pub mod feeder;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod state;
pub mod sync;

pub use clock::{ClockEvent, PlayError, PlaybackClock, SimulatedClock};
pub use driver::{Session, SessionHandle, SessionParams};
pub use events::SessionEvent;
pub use sink::{BufferedRange, FileSink, MediaSink, SinkError, SinkEvent, SinkEvents, SinkState};
pub use state::SegmentStatus;
