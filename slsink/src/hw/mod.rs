//! Hardware buffer queue abstraction
//!
//! The platform audio layer is modeled as a sink that, once opened, hands back a
//! queue of `N` fixed-size slots. The engine enqueues one unit per free slot and
//! the hardware calls back, on its own thread, once per unit it has played.
//!
//! Implementations:
//! - [`simulated`]: in-process queue with a manual or real-time consumer, used by
//!   tests and the simulation binary

pub mod simulated;

use crate::audio::PcmFormat;
use crate::error::Result;
use serde::{Deserialize, Serialize};

pub use simulated::{SimulatedHardware, SimulatedSink};

/// Completion notification, invoked once per unit fully consumed by hardware
///
/// Runs on a thread the caller does not control. It must not block.
pub type CompletionCallback = Box<dyn Fn() + Send + Sync + 'static>;

/// Hardware player state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayState {
    Playing,
    Paused,
    Stopped,
}

/// Fixed-capacity, fixed-unit-size hardware buffer queue
pub trait HardwareQueue: Send {
    /// Number of slots
    fn capacity(&self) -> usize;

    /// Units enqueued and not yet consumed
    ///
    /// Fails with `Error::HardwareQuery` once the queue is torn down.
    fn query_depth(&self) -> Result<usize>;

    /// Hand one unit to the hardware
    ///
    /// Fails with `Error::EnqueueRejected` when all slots are in use or the
    /// hardware refuses the buffer. Callers do not retry.
    fn enqueue(&mut self, unit: &[u8]) -> Result<()>;

    /// Register the per-unit completion callback, replacing any previous one
    fn set_completion_callback(&mut self, callback: CompletionCallback) -> Result<()>;

    fn set_play_state(&mut self, state: PlayState) -> Result<()>;

    /// Drop every pending, unconsumed unit immediately
    fn clear_queue(&mut self) -> Result<()>;

    /// Set output attenuation in millibels (0 = unity)
    ///
    /// Queues without a volume interface ignore the call.
    fn set_volume_level(&mut self, _millibels: i16) -> Result<()> {
        Ok(())
    }

    /// Mute or unmute output; ignored without a volume interface
    fn set_mute(&mut self, _mute: bool) -> Result<()> {
        Ok(())
    }

    /// Release the player; the queue is unusable afterwards
    fn destroy(&mut self);
}

/// Platform audio output that can create buffer queues
pub trait HardwareSink: Send {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Create a player for `format` with `pool_capacity` slots
    ///
    /// Fails with `Error::Initialization`; no partially-open state survives.
    fn open(&mut self, format: &PcmFormat, pool_capacity: usize) -> Result<Box<dyn HardwareQueue>>;

    /// Release engine-level resources after every queue is destroyed
    fn close(&mut self);
}
