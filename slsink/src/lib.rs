//! # slsink: fixed-unit audio output sink
//!
//! Buffering and latency engine between a PCM producer writing chunks of any
//! size and a hardware output that only accepts fixed-size buffers through an
//! asynchronous completion callback.
//!
//! **Data flow:** producer → ring buffer → fixed-size units → hardware queue →
//! completion callback → `started` flag used by latency math
//!
//! **Architecture:**
//! - [`playback::SinkEngine`]: write/drain/latency under a single mutex
//! - [`playback::AudioSink`]: lifecycle controller and background tasks
//! - [`hw`]: hardware queue contract and the simulated backend
//! - [`audio`]: PCM format, unit geometry and volume conversion

pub mod audio;
pub mod error;
pub mod hw;
pub mod playback;
pub mod state;

pub use error::{Error, Result};
pub use playback::{AudioSink, DrainOutcome, Drift, SinkEngine};
pub use state::{SinkCounters, SinkSnapshot, SinkState};
