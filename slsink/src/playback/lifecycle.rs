//! Lifecycle controller
//!
//! [`AudioSink`] owns the hardware backend and the shared [`SinkEngine`], and
//! drives the engine state machine:
//!
//! ```text
//! Closed → Opened → Started → { Playing ⇄ Paused } → Stopped → Closed
//! ```
//!
//! When a tokio runtime handle is supplied, starting the sink also spawns the
//! callback monitoring task and, if configured, a periodic drain task. Both
//! are shut down on stop.

use crate::error::Result;
use crate::hw::HardwareSink;
use crate::playback::engine::{DrainOutcome, SinkEngine};
use crate::state::SinkSnapshot;
use slsink_common::events::{EventBus, LifecycleState, SinkEvent};
use slsink_common::SinkConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// One audio output: engine plus the backend it was opened on
pub struct AudioSink {
    engine: Arc<SinkEngine>,
    backend: Box<dyn HardwareSink>,
    runtime: Option<tokio::runtime::Handle>,
    drain_poll_interval: Option<Duration>,
    /// Shutdown flags of spawned background tasks
    tasks: Vec<Arc<AtomicBool>>,
}

impl AudioSink {
    /// Validate `config`, create the engine and open the hardware player
    ///
    /// # Errors
    /// `Error::Config` for an invalid configuration, `Error::Initialization`
    /// if the backend cannot create a player.
    pub fn open(config: &SinkConfig, mut backend: Box<dyn HardwareSink>) -> Result<Self> {
        let events = EventBus::new(config.event_capacity);
        let engine = Arc::new(SinkEngine::new(config, events)?);
        engine.open(backend.as_mut())?;

        Ok(Self {
            engine,
            backend,
            runtime: None,
            drain_poll_interval: config.drain_poll_interval_ms.map(Duration::from_millis),
            tasks: Vec::new(),
        })
    }

    /// Run background tasks on `handle` once started
    pub fn with_runtime(mut self, handle: tokio::runtime::Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn engine(&self) -> &Arc<SinkEngine> {
        &self.engine
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.engine.lifecycle()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SinkEvent> {
        self.engine.events().subscribe()
    }

    /// Start playback and spawn background tasks
    pub fn start(&mut self) -> Result<()> {
        self.engine.start()?;

        if let Some(handle) = self.runtime.clone() {
            let monitor = Arc::clone(self.engine.monitor());
            self.tasks.push(monitor.spawn_monitoring_task(
                Arc::downgrade(&self.engine),
                handle.clone(),
            ));

            if let Some(interval) = self.drain_poll_interval {
                self.tasks.push(spawn_drain_task(
                    Arc::downgrade(&self.engine),
                    interval,
                    handle,
                ));
            }
        }
        Ok(())
    }

    /// Accept PCM bytes; returns how many were taken (possibly 0)
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.engine.write_samples(data)
    }

    pub fn pause(&self) -> Result<()> {
        self.engine.pause(true)
    }

    pub fn resume(&self) -> Result<()> {
        self.engine.pause(false)
    }

    /// Let buffered audio play out (`drain`) or discard it
    pub fn flush(&self, drain: bool) -> Result<()> {
        self.engine.flush(drain)
    }

    pub fn stop(&mut self) -> Result<()> {
        self.shutdown_tasks();
        self.engine.stop()
    }

    pub fn close(&mut self) -> Result<()> {
        self.shutdown_tasks();
        self.engine.close(self.backend.as_mut())
    }

    /// Output latency, or None while it cannot be measured
    pub fn latency(&self) -> Option<Duration> {
        self.engine.drift().ok().map(|drift| drift.as_duration())
    }

    /// Output latency in 90 kHz ticks, or None while it cannot be measured
    pub fn latency_pts(&self) -> Option<i64> {
        self.engine.latency_pts().ok()
    }

    /// Bytes buffered in software and hardware, or None if the hardware
    /// depth cannot be read
    pub fn buffered_level(&self) -> Option<usize> {
        self.engine.buffered_level().ok()
    }

    pub fn set_volume(&self, volume: f32) -> Result<()> {
        self.engine.set_volume(volume)
    }

    pub fn set_mute(&self, mute: bool) -> Result<()> {
        self.engine.set_mute(mute)
    }

    pub fn snapshot(&self) -> SinkSnapshot {
        self.engine.snapshot()
    }

    fn shutdown_tasks(&mut self) {
        for flag in self.tasks.drain(..) {
            flag.store(true, Ordering::Relaxed);
        }
    }
}

impl Drop for AudioSink {
    fn drop(&mut self) {
        self.shutdown_tasks();
        if self.engine.lifecycle().accepts_audio() {
            if let Err(e) = self.engine.stop() {
                warn!("Failed to stop sink on drop: {}", e);
            }
        }
        if let Err(e) = self.engine.close(self.backend.as_mut()) {
            warn!("Failed to close sink on drop: {}", e);
        }
    }
}

/// Spawn a task that drains the ring buffer every `interval`
///
/// Each tick moves as many whole units as the hardware will take, bounded by
/// the pool capacity. The task ends when the returned flag is set or the
/// engine is dropped.
pub fn spawn_drain_task(
    engine: Weak<SinkEngine>,
    interval: Duration,
    rt_handle: tokio::runtime::Handle,
) -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);

    rt_handle.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        debug!("Drain task started ({:?} interval)", interval);

        while !shutdown_clone.load(Ordering::Relaxed) {
            ticker.tick().await;

            let Some(engine) = engine.upgrade() else {
                break;
            };
            if !engine.lifecycle().accepts_audio() {
                continue;
            }

            let mut moved = 0;
            while moved < engine.geometry().pool_capacity {
                match engine.drain_to_hardware() {
                    Ok(DrainOutcome::Enqueued) => moved += 1,
                    Ok(_) => break,
                    Err(e) if e.is_transient() => {
                        trace!("Drain tick skipped: {}", e);
                        break;
                    }
                    Err(e) => {
                        debug!("Drain tick failed: {}", e);
                        break;
                    }
                }
            }
            if moved > 0 {
                trace!("Drain tick moved {} units", moved);
            }
        }

        debug!("Drain task stopped");
    });

    shutdown
}
