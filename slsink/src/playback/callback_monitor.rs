//! Hardware completion callback monitor
//!
//! The completion callback runs on the platform's audio thread, so the only
//! thing it does is bump atomics here: the `started` flag that makes latency
//! measurable, a completion counter and interval timing. A tokio monitoring
//! task polls these counters and turns them into log lines and events.
//!
//! Every callback built by [`CallbackMonitor::completion_callback`] carries
//! the generation current at the time it was built. [`CallbackMonitor::reset`]
//! advances the generation, so a completion that was already on its way when
//! the hardware queue was cleared is counted as stale and cannot mark the
//! fresh queue as started.

use crate::hw::CompletionCallback;
use crate::playback::engine::SinkEngine;
use slsink_common::events::SinkEvent;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Minimum silence before a playing sink with queued units counts as stalled
const MIN_STALL_THRESHOLD: Duration = Duration::from_millis(500);

/// Polling period of the monitoring task
const MONITOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lock-free record of hardware completions
///
/// Methods called from the completion callback touch only atomics.
pub struct CallbackMonitor {
    /// Start time for monotonic elapsed time calculation
    start_time: Instant,

    /// Hardware has consumed at least one unit since start or last reset
    started: AtomicBool,

    /// Bumped on every reset; callbacks from older generations are ignored
    generation: AtomicU64,

    /// Completions that arrived from a callback of an older generation
    stale_completions: AtomicU64,

    /// Total completions since creation
    completion_count: AtomicU64,

    /// Last completion elapsed time (nanoseconds since start_time, 0 = none yet)
    last_completion_ns: AtomicU64,

    /// Count of intervals deviating more than 20% from one unit's duration
    irregular_intervals: AtomicU64,

    /// Expected interval between completions (one time quantum)
    expected_interval_ns: u64,
}

impl CallbackMonitor {
    /// Create a monitor expecting one completion per `unit_duration`
    pub fn new(unit_duration: Duration) -> Self {
        Self {
            start_time: Instant::now(),
            started: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            stale_completions: AtomicU64::new(0),
            completion_count: AtomicU64::new(0),
            last_completion_ns: AtomicU64::new(0),
            irregular_intervals: AtomicU64::new(0),
            expected_interval_ns: unit_duration.as_nanos() as u64,
        }
    }

    /// Record one consumed unit (call from the completion callback)
    ///
    /// `generation` is the value of [`Self::generation`] when the callback was
    /// registered. Completions from before the last reset are only counted
    /// as stale.
    ///
    /// **REAL-TIME SAFE**: Only atomic operations
    pub fn record_completion(&self, generation: u64) {
        if generation != self.generation.load(Ordering::Acquire) {
            self.stale_completions.fetch_add(1, Ordering::Relaxed);
            return;
        }

        // Nudge by one so a completion at t=0 is distinguishable from "none yet"
        let now_ns = self.start_time.elapsed().as_nanos() as u64 + 1;
        let last_ns = self.last_completion_ns.swap(now_ns, Ordering::Relaxed);
        self.completion_count.fetch_add(1, Ordering::Relaxed);
        self.started.store(true, Ordering::Release);

        if last_ns == 0 {
            return;
        }

        // Completions may legitimately arrive in bursts when the hardware
        // drains several units at once; only count long gaps as irregular
        let interval_ns = now_ns.saturating_sub(last_ns);
        if interval_ns > self.expected_interval_ns + self.expected_interval_ns / 5 {
            self.irregular_intervals.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Whether latency can be measured
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Current callback generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Forget that the hardware started (after a hard flush or stop)
    ///
    /// Callbacks built before this call stop counting. Register a fresh
    /// [`Self::completion_callback`] afterwards.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.started.store(false, Ordering::Release);
    }

    /// Build the callback to register with the hardware queue
    pub fn completion_callback(self: &Arc<Self>) -> CompletionCallback {
        let monitor = Arc::clone(self);
        let generation = monitor.generation();
        Box::new(move || monitor.record_completion(generation))
    }

    /// Time since the last completion, if any completion happened
    pub fn since_last_completion(&self) -> Option<Duration> {
        match self.last_completion_ns.load(Ordering::Relaxed) {
            0 => None,
            last_ns => {
                let now_ns = self.start_time.elapsed().as_nanos() as u64 + 1;
                Some(Duration::from_nanos(now_ns.saturating_sub(last_ns)))
            }
        }
    }

    /// Get current statistics
    pub fn stats(&self) -> CallbackStats {
        CallbackStats {
            completion_count: self.completion_count.load(Ordering::Relaxed),
            irregular_intervals: self.irregular_intervals.load(Ordering::Relaxed),
            stale_completions: self.stale_completions.load(Ordering::Relaxed),
            started: self.is_started(),
            expected_interval_ms: self.expected_interval_ns / 1_000_000,
        }
    }

    /// Silence threshold for stall detection
    fn stall_threshold(&self) -> Duration {
        Duration::from_nanos(self.expected_interval_ns * 4).max(MIN_STALL_THRESHOLD)
    }

    /// Spawn monitoring task that polls stats and emits events/logs
    ///
    /// Runs on the supplied tokio runtime, never on the audio thread. The task
    /// ends when the returned flag is set or the engine is dropped.
    pub fn spawn_monitoring_task(
        self: Arc<Self>,
        engine: Weak<SinkEngine>,
        rt_handle: tokio::runtime::Handle,
    ) -> Arc<AtomicBool> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let monitor = self;

        rt_handle.spawn(async move {
            let mut announced_start = false;
            let mut last_completion_count = 0u64;
            let mut last_irregular_count = 0u64;
            let mut last_stall_event: Option<Instant> = None;

            debug!("CallbackMonitor: Monitoring task started");

            while !shutdown_clone.load(Ordering::Relaxed) {
                tokio::time::sleep(MONITOR_POLL_INTERVAL).await;

                let Some(engine) = engine.upgrade() else {
                    break;
                };
                let stats = monitor.stats();

                if stats.started && !announced_start {
                    info!("Hardware acknowledged first buffer, latency now measurable");
                    engine.events().emit_lossy(SinkEvent::HardwareStarted {
                        sink_id: engine.id(),
                        timestamp: chrono::Utc::now(),
                    });
                }
                announced_start = stats.started;

                if stats.irregular_intervals > last_irregular_count {
                    trace!(
                        "Completion interval irregularities: {} total (+{})",
                        stats.irregular_intervals,
                        stats.irregular_intervals - last_irregular_count
                    );
                    last_irregular_count = stats.irregular_intervals;
                }

                // Stall: running, units queued, yet no completions for a while
                let depth = engine.hardware_depth().unwrap_or(0);
                let idle = monitor.since_last_completion();
                let stalled = engine.lifecycle().is_running()
                    && depth > 0
                    && stats.completion_count == last_completion_count
                    && idle.is_some_and(|idle| idle > monitor.stall_threshold());

                if stalled && last_stall_event.map_or(true, |t| t.elapsed().as_secs() >= 5) {
                    let idle_ms = idle.map_or(0, |d| d.as_millis() as u64);
                    warn!(
                        "No hardware completion for {}ms with {} units queued",
                        idle_ms, depth
                    );
                    engine.events().emit_lossy(SinkEvent::CallbackStalled {
                        sink_id: engine.id(),
                        completions: stats.completion_count,
                        idle_ms,
                        timestamp: chrono::Utc::now(),
                    });
                    last_stall_event = Some(Instant::now());
                }

                last_completion_count = stats.completion_count;
            }

            debug!("CallbackMonitor: Monitoring task stopped");
        });

        shutdown
    }
}

/// Callback statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CallbackStats {
    pub completion_count: u64,
    pub irregular_intervals: u64,
    pub stale_completions: u64,
    pub started: bool,
    pub expected_interval_ms: u64,
}
