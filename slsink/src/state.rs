//! Sink state and snapshot types
//!
//! There is no process-wide playback state: the engine owns its accounting and
//! hands out copies. [`SinkState`] is the latency accounting, [`SinkSnapshot`]
//! the full telemetry view for UI and logging layers.

use crate::playback::callback_monitor::CallbackStats;
use serde::Serialize;
use slsink_common::LifecycleState;
use uuid::Uuid;

/// Latency accounting owned by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SinkState {
    /// Configured sample rate
    pub rate: u32,

    /// channels × bit depth / 8
    pub bytes_per_sample: usize,

    /// Samples accepted from the producer and not yet handed to hardware
    pub samples_in_flight: i64,

    /// Hardware has acknowledged at least one unit
    pub started: bool,

    /// Next staging slot to fill
    pub next_slot_index: usize,
}

/// Running totals since start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkCounters {
    /// Writes fully or partly accepted
    pub writes_accepted: u64,
    /// Writes dropped for lack of ring space
    pub writes_dropped: u64,
    pub bytes_accepted: u64,
    pub bytes_dropped: u64,
    /// Units handed to hardware
    pub units_enqueued: u64,
    /// Units staged but refused by hardware (bytes lost)
    pub units_rejected: u64,
    /// Drain attempts skipped because every slot was in use
    pub drains_backpressured: u64,
}

/// Point-in-time view of one sink
#[derive(Debug, Clone, Serialize)]
pub struct SinkSnapshot {
    pub sink_id: Uuid,
    pub lifecycle: LifecycleState,
    pub state: SinkState,
    pub ring_level: usize,
    pub ring_capacity: usize,
    /// None if the hardware could not be queried
    pub hardware_depth: Option<usize>,
    pub pool_capacity: usize,
    /// None until the hardware has started
    pub drift_us: Option<i64>,
    pub volume: f32,
    pub muted: bool,
    pub counters: SinkCounters,
    pub callbacks: CallbackStats,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
