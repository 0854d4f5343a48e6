//! Buffering and playback control
//!
//! - [`ring_buffer`]: byte ring buffer absorbing irregular producer writes
//! - [`staging`]: round-robin slots holding units while hardware reads them
//! - [`engine`]: write, drain and latency accounting under one lock
//! - [`callback_monitor`]: lock-free completion tracking and stall detection
//! - [`lifecycle`]: open/start/pause/flush/stop/close plus background tasks

pub mod callback_monitor;
pub mod engine;
pub mod lifecycle;
pub mod ring_buffer;
pub mod staging;

pub use callback_monitor::{CallbackMonitor, CallbackStats};
pub use engine::{DrainOutcome, Drift, SinkEngine};
pub use lifecycle::{spawn_drain_task, AudioSink};
pub use ring_buffer::{ByteRingBuffer, RingBufferStats};
pub use staging::StagingArea;
