//! Sink engine: ring buffer → fixed-size units → hardware queue
//!
//! Accepts producer writes of any size into the byte ring buffer, then moves
//! whole units into the hardware queue whenever a slot is free. All mutable
//! state (ring, staging area, accounting, queue handle, lifecycle) sits behind
//! one mutex. The hardware completion callback never takes that lock; it only
//! sets the `started` flag in the [`CallbackMonitor`].
//!
//! ## Latency model
//!
//! ```text
//! drift = time_quantum × hardware_depth + samples_in_flight / rate
//!         └── queued in hardware ──────┘  └── still in software ──┘
//! ```
//!
//! `samples_in_flight` grows on every accepted write and shrinks by one unit's
//! worth of samples on every drain, while the hardware depth grows by one unit.
//! A drain therefore moves time between the two terms without changing the sum.

use crate::audio::{linear_to_millibels, PcmFormat, UnitGeometry, CLOCK_FREQ, PTS_FREQ};
use crate::error::{Error, Result};
use crate::hw::{CompletionCallback, HardwareQueue, HardwareSink, PlayState};
use crate::playback::callback_monitor::CallbackMonitor;
use crate::playback::ring_buffer::ByteRingBuffer;
use crate::playback::staging::StagingArea;
use crate::state::{SinkCounters, SinkSnapshot, SinkState};
use slsink_common::events::{EventBus, LifecycleState, SinkEvent};
use slsink_common::{SinkConfig, WritePolicy};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Result of one drain attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// One unit moved from the ring buffer into the hardware queue
    Enqueued,
    /// Less than one unit buffered; partial units are never sent
    InsufficientData,
    /// Every hardware slot is in use; data stays in the ring buffer
    Backpressure,
    /// Hardware refused the staged unit; its bytes are dropped, not retried
    Rejected,
}

/// Estimated output latency, split by where the audio currently sits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Drift {
    /// Audio enqueued to hardware and not yet consumed (microseconds)
    pub hardware_us: i64,
    /// Audio accepted but still in the software ring buffer (microseconds)
    pub software_us: i64,
}

impl Drift {
    /// Total drift in microseconds
    pub fn total_micros(&self) -> i64 {
        self.hardware_us + self.software_us
    }

    /// Total drift as a duration (negative totals clamp to zero)
    pub fn as_duration(&self) -> Duration {
        Duration::from_micros(self.total_micros().max(0) as u64)
    }

    /// Total drift in 90 kHz presentation ticks
    pub fn as_pts(&self) -> i64 {
        self.total_micros() * PTS_FREQ / CLOCK_FREQ
    }
}

struct EngineInner {
    lifecycle: LifecycleState,
    /// Allocated at open, released at close
    ring: Option<ByteRingBuffer>,
    /// Allocated at start, released at stop
    staging: Option<StagingArea>,
    /// Present from open until stop (or close from Opened)
    queue: Option<Box<dyn HardwareQueue>>,
    samples_in_flight: i64,
    /// Bytes of a sample frame split across writes, not yet counted
    pending_frame_bytes: usize,
    counters: SinkCounters,
    /// Currently inside a run of dropped writes
    dropping: bool,
    volume: f32,
    muted: bool,
}

/// Buffering and latency engine for one output sink
pub struct SinkEngine {
    id: Uuid,
    format: PcmFormat,
    geometry: UnitGeometry,
    write_policy: WritePolicy,
    inner: Mutex<EngineInner>,
    monitor: Arc<CallbackMonitor>,
    events: EventBus,
}

impl SinkEngine {
    /// Create an engine in the `Closed` state
    ///
    /// # Errors
    /// `Error::Config` if the configuration fails validation.
    pub fn new(config: &SinkConfig, events: EventBus) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;

        let geometry = UnitGeometry::from_config(config);
        let unit_duration = Duration::from_millis(config.time_quantum_ms as u64);

        debug!(
            "Sink geometry: {} samples/unit, {} bytes/unit, {} slots ({} staging bytes, up to {}ms queued), ring {} bytes",
            geometry.samples_per_unit,
            geometry.unit_size,
            geometry.pool_capacity,
            geometry.staging_size(),
            geometry.max_hardware_micros() / 1000,
            geometry.ring_capacity
        );

        Ok(Self {
            id: Uuid::new_v4(),
            format: PcmFormat::from_config(config),
            geometry,
            write_policy: config.write_policy,
            inner: Mutex::new(EngineInner {
                lifecycle: LifecycleState::Closed,
                ring: None,
                staging: None,
                queue: None,
                samples_in_flight: 0,
                pending_frame_bytes: 0,
                counters: SinkCounters::default(),
                dropping: false,
                volume: 1.0,
                muted: false,
            }),
            monitor: Arc::new(CallbackMonitor::new(unit_duration)),
            events,
        })
    }

    fn lock(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn geometry(&self) -> UnitGeometry {
        self.geometry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn monitor(&self) -> &Arc<CallbackMonitor> {
        &self.monitor
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lock().lifecycle
    }

    fn transition(&self, inner: &mut EngineInner, new_state: LifecycleState) {
        let old_state = inner.lifecycle;
        if old_state == new_state {
            return;
        }
        inner.lifecycle = new_state;
        info!("Sink {}: {} -> {}", self.id, old_state, new_state);
        self.events.emit_lossy(SinkEvent::StateChanged {
            sink_id: self.id,
            old_state,
            new_state,
            timestamp: chrono::Utc::now(),
        });
    }

    fn require(inner: &EngineInner, allowed: &[LifecycleState], operation: &str) -> Result<()> {
        if allowed.contains(&inner.lifecycle) {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "{} not allowed while {}",
                operation, inner.lifecycle
            )))
        }
    }

    fn require_audio(inner: &EngineInner, operation: &str) -> Result<()> {
        if inner.lifecycle.accepts_audio() {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "{} not allowed while {}",
                operation, inner.lifecycle
            )))
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Create the hardware player and allocate the ring buffer
    ///
    /// `Closed → Opened`. Any backend failure is reported as
    /// `Error::Initialization` and leaves the engine `Closed`.
    pub fn open(&self, backend: &mut dyn HardwareSink) -> Result<()> {
        let mut inner = self.lock();
        Self::require(&inner, &[LifecycleState::Closed], "open")?;

        let queue = backend
            .open(&self.format, self.geometry.pool_capacity)
            .map_err(|e| match e {
                Error::Initialization(_) => e,
                other => Error::Initialization(other.to_string()),
            })?;

        if queue.capacity() < self.geometry.pool_capacity {
            return Err(Error::Initialization(format!(
                "player has {} slots, {} required",
                queue.capacity(),
                self.geometry.pool_capacity
            )));
        }

        info!(
            "Opened {} output: {} Hz, {} ch, {} bit",
            backend.name(),
            self.format.sample_rate,
            self.format.channels,
            self.format.bit_depth
        );

        inner.queue = Some(queue);
        inner.ring = Some(ByteRingBuffer::new(self.geometry.ring_capacity));
        self.transition(&mut inner, LifecycleState::Opened);
        Ok(())
    }

    /// Register the completion callback, start the player, allocate staging
    ///
    /// `Opened → Started`. On hardware failure the player is destroyed and the
    /// engine returns to `Closed`.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.lock();
        Self::require(&inner, &[LifecycleState::Opened], "start")?;

        self.monitor.reset();
        let callback = self.monitor.completion_callback();
        let started = match inner.queue.as_mut() {
            Some(queue) => start_queue(queue.as_mut(), callback),
            None => Err(Error::Initialization("no hardware player".to_string())),
        };

        if let Err(e) = started {
            warn!("Failed to start hardware player: {}", e);
            if let Some(mut queue) = inner.queue.take() {
                queue.destroy();
            }
            inner.ring = None;
            self.transition(&mut inner, LifecycleState::Closed);
            return Err(match e {
                Error::Initialization(_) => e,
                other => Error::Initialization(other.to_string()),
            });
        }

        inner.staging = Some(StagingArea::new(
            self.geometry.pool_capacity,
            self.geometry.unit_size,
        ));
        inner.samples_in_flight = 0;
        inner.pending_frame_bytes = 0;
        inner.counters = SinkCounters::default();
        inner.dropping = false;
        self.transition(&mut inner, LifecycleState::Started);
        Ok(())
    }

    /// Toggle the hardware between playing and paused
    ///
    /// Buffered content is untouched, so resuming loses nothing.
    pub fn pause(&self, pause: bool) -> Result<()> {
        let mut inner = self.lock();
        Self::require_audio(&inner, if pause { "pause" } else { "resume" })?;

        let play_state = if pause {
            PlayState::Paused
        } else {
            PlayState::Playing
        };
        if let Some(queue) = inner.queue.as_mut() {
            queue.set_play_state(play_state)?;
        }

        let new_state = if pause {
            LifecycleState::Paused
        } else {
            LifecycleState::Playing
        };
        self.transition(&mut inner, new_state);
        Ok(())
    }

    /// Stop the player, discard queued audio and release the hardware queue
    ///
    /// `Started | Playing | Paused → Stopped`. The ring buffer is emptied but
    /// kept until [`close`](Self::close).
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.lock();
        Self::require_audio(&inner, "stop")?;

        if let Some(mut queue) = inner.queue.take() {
            if let Err(e) = queue.set_play_state(PlayState::Stopped) {
                warn!("Failed to stop hardware player: {}", e);
            }
            if let Err(e) = queue.clear_queue() {
                warn!("Failed to clear hardware queue: {}", e);
            }
            queue.destroy();
        }

        inner.staging = None;
        if let Some(ring) = inner.ring.as_mut() {
            let stats = ring.stats();
            debug!(
                "Ring buffer at stop: {} bytes in, {} bytes out, {:.1}% full",
                stats.total_put,
                stats.total_got,
                stats.fill_ratio() * 100.0
            );
            ring.clear();
        }
        inner.samples_in_flight = 0;
        inner.pending_frame_bytes = 0;
        self.monitor.reset();
        self.transition(&mut inner, LifecycleState::Stopped);
        Ok(())
    }

    /// Release the ring buffer and the backend's engine resources
    ///
    /// `Opened | Stopped → Closed`. Closing an already closed engine is a no-op.
    pub fn close(&self, backend: &mut dyn HardwareSink) -> Result<()> {
        let mut inner = self.lock();
        if inner.lifecycle == LifecycleState::Closed {
            return Ok(());
        }
        Self::require(
            &inner,
            &[LifecycleState::Opened, LifecycleState::Stopped],
            "close",
        )?;

        if let Some(mut queue) = inner.queue.take() {
            queue.destroy();
        }
        inner.ring = None;
        inner.staging = None;
        backend.close();
        self.transition(&mut inner, LifecycleState::Closed);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Data path
    // ------------------------------------------------------------------

    /// Accept producer bytes, then attempt one drain cycle
    ///
    /// Returns the number of bytes accepted, which may be 0 when the ring
    /// buffer lacks space. Never blocks. With [`WritePolicy::Whole`] a chunk is
    /// accepted only if the free space strictly exceeds its size; with
    /// [`WritePolicy::Partial`] as many whole sample frames as fit are taken.
    pub fn write_samples(&self, data: &[u8]) -> Result<usize> {
        let mut inner = self.lock();
        Self::require_audio(&inner, "write")?;

        let bytes_per_sample = self.geometry.bytes_per_sample;
        let (written, space) = {
            let ring = inner
                .ring
                .as_mut()
                .ok_or_else(|| Error::InvalidState("ring buffer not allocated".to_string()))?;
            let space = ring.space();
            let written = match self.write_policy {
                WritePolicy::Whole if space > data.len() => ring.put(data),
                WritePolicy::Whole => 0,
                WritePolicy::Partial => {
                    let fit = data.len().min(space) / bytes_per_sample * bytes_per_sample;
                    ring.put(&data[..fit])
                }
            };
            (written, space)
        };

        if written > 0 {
            // Only whole frames count; a split frame completes on a later write
            let bytes = inner.pending_frame_bytes + written;
            inner.samples_in_flight += self.geometry.bytes_to_samples(bytes);
            inner.pending_frame_bytes = bytes % bytes_per_sample;
            inner.counters.writes_accepted += 1;
            inner.counters.bytes_accepted += written as u64;
            inner.dropping = false;
            trace!(
                "Accepted {} of {} bytes, samples in flight {}",
                written,
                data.len(),
                inner.samples_in_flight
            );
        } else if !data.is_empty() {
            inner.counters.writes_dropped += 1;
            inner.counters.bytes_dropped += data.len() as u64;
            let dropped = inner.counters.writes_dropped;
            if dropped % 1000 == 1 {
                let reason = Error::CapacityExceeded {
                    requested: data.len(),
                    space,
                };
                warn!("Write dropped: {} (total dropped writes: {})", reason, dropped);
            }
            if !inner.dropping {
                inner.dropping = true;
                self.events.emit_lossy(SinkEvent::WriteRejected {
                    sink_id: self.id,
                    requested: data.len(),
                    space,
                    timestamp: chrono::Utc::now(),
                });
            }
        }

        // Queue failures here only mean the unit waits for the next drain
        if let Err(e) = self.drain_locked(&mut inner) {
            trace!("Drain after write skipped: {}", e);
        }

        Ok(written)
    }

    /// Move exactly one unit from the ring buffer to the hardware, if possible
    ///
    /// No-op when less than one unit is buffered or every slot is in use.
    ///
    /// # Errors
    /// - `Error::InvalidState` outside `Started | Playing | Paused`
    /// - `Error::HardwareQuery` if the queue depth cannot be read
    pub fn drain_to_hardware(&self) -> Result<DrainOutcome> {
        let mut inner = self.lock();
        Self::require_audio(&inner, "drain")?;
        self.drain_locked(&mut inner)
    }

    fn drain_locked(&self, inner: &mut EngineInner) -> Result<DrainOutcome> {
        let geometry = &self.geometry;
        let EngineInner {
            ring,
            staging,
            queue,
            samples_in_flight,
            counters,
            ..
        } = inner;

        let (Some(ring), Some(staging), Some(queue)) =
            (ring.as_mut(), staging.as_mut(), queue.as_mut())
        else {
            return Err(Error::InvalidState("sink not started".to_string()));
        };

        if ring.level() < geometry.unit_size {
            return Ok(DrainOutcome::InsufficientData);
        }

        let depth = queue.query_depth()?;
        if depth >= geometry.pool_capacity {
            counters.drains_backpressured += 1;
            return Ok(DrainOutcome::Backpressure);
        }

        let read = ring.get(staging.next_slot_mut());
        debug_assert_eq!(read, geometry.unit_size);

        // The bytes have left the ring buffer whether or not the hardware takes them
        *samples_in_flight -= geometry.samples_per_unit as i64;

        match queue.enqueue(staging.next_slot()) {
            Ok(()) => {
                staging.advance();
                counters.units_enqueued += 1;
                trace!(
                    "Enqueued unit ({} bytes), depth now {}, slot {}",
                    geometry.unit_size,
                    depth + 1,
                    staging.next_index()
                );
                Ok(DrainOutcome::Enqueued)
            }
            Err(e) => {
                counters.units_rejected += 1;
                if counters.units_rejected % 1000 == 1 {
                    warn!(
                        "Hardware rejected unit, {} bytes dropped (total rejected: {}): {}",
                        geometry.unit_size, counters.units_rejected, e
                    );
                }
                self.events.emit_lossy(SinkEvent::EnqueueRejected {
                    sink_id: self.id,
                    dropped_bytes: geometry.unit_size,
                    timestamp: chrono::Utc::now(),
                });
                Ok(DrainOutcome::Rejected)
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Current estimate of output latency
    ///
    /// # Errors
    /// - `Error::LatencyUnavailable` before the first hardware completion
    /// - `Error::HardwareQuery` if the queue depth cannot be read
    pub fn drift(&self) -> Result<Drift> {
        let inner = self.lock();
        self.drift_locked(&inner)
    }

    fn drift_locked(&self, inner: &EngineInner) -> Result<Drift> {
        if !self.monitor.is_started() {
            return Err(Error::LatencyUnavailable);
        }
        let depth = match inner.queue.as_ref() {
            Some(queue) => queue.query_depth()?,
            None => return Err(Error::LatencyUnavailable),
        };
        Ok(Drift {
            hardware_us: self.geometry.units_to_micros(depth),
            software_us: self.geometry.samples_to_micros(inner.samples_in_flight),
        })
    }

    /// Latency in 90 kHz presentation ticks
    pub fn latency_pts(&self) -> Result<i64> {
        self.drift().map(|drift| drift.as_pts())
    }

    /// Total bytes buffered in software and hardware
    ///
    /// `samples_in_flight × bytes_per_sample + hardware_depth × unit_size`
    pub fn buffered_level(&self) -> Result<usize> {
        let inner = self.lock();
        let depth = match inner.queue.as_ref() {
            Some(queue) => queue.query_depth()?,
            None => 0,
        };
        let software = inner.samples_in_flight.max(0) as usize * self.geometry.bytes_per_sample;
        Ok(software + depth * self.geometry.unit_size)
    }

    /// Units queued in hardware
    pub fn hardware_depth(&self) -> Result<usize> {
        let inner = self.lock();
        match inner.queue.as_ref() {
            Some(queue) => queue.query_depth(),
            None => Err(Error::HardwareQuery("no hardware player".to_string())),
        }
    }

    /// Bytes in the software ring buffer
    pub fn ring_level(&self) -> usize {
        self.lock().ring.as_ref().map_or(0, |ring| ring.level())
    }

    /// Copy of the latency accounting
    pub fn sink_state(&self) -> SinkState {
        let inner = self.lock();
        SinkState {
            rate: self.geometry.rate,
            bytes_per_sample: self.geometry.bytes_per_sample,
            samples_in_flight: inner.samples_in_flight,
            started: self.monitor.is_started(),
            next_slot_index: inner.staging.as_ref().map_or(0, |s| s.next_index()),
        }
    }

    pub fn counters(&self) -> SinkCounters {
        self.lock().counters
    }

    /// Full telemetry view
    pub fn snapshot(&self) -> SinkSnapshot {
        let inner = self.lock();
        let hardware_depth = inner
            .queue
            .as_ref()
            .and_then(|queue| queue.query_depth().ok());
        let drift_us = self.drift_locked(&inner).ok().map(|d| d.total_micros());

        SinkSnapshot {
            sink_id: self.id,
            lifecycle: inner.lifecycle,
            state: SinkState {
                rate: self.geometry.rate,
                bytes_per_sample: self.geometry.bytes_per_sample,
                samples_in_flight: inner.samples_in_flight,
                started: self.monitor.is_started(),
                next_slot_index: inner.staging.as_ref().map_or(0, |s| s.next_index()),
            },
            ring_level: inner.ring.as_ref().map_or(0, |ring| ring.level()),
            ring_capacity: self.geometry.ring_capacity,
            hardware_depth,
            pool_capacity: self.geometry.pool_capacity,
            drift_us,
            volume: inner.volume,
            muted: inner.muted,
            counters: inner.counters,
            callbacks: self.monitor.stats(),
            timestamp: chrono::Utc::now(),
        }
    }

    // ------------------------------------------------------------------
    // Flush and volume
    // ------------------------------------------------------------------

    /// Drain (`drain = true`) or discard (`drain = false`) buffered audio
    ///
    /// Draining sleeps for the current latency estimate, without holding the
    /// engine lock, and returns immediately if latency is unknown. Discarding
    /// stops the player, clears its queue and the ring buffer, resets the
    /// accounting and restores the previous play state.
    pub fn flush(&self, drain: bool) -> Result<()> {
        if drain {
            let wait = {
                let inner = self.lock();
                Self::require_audio(&inner, "flush")?;
                self.drift_locked(&inner).ok().map(|d| d.as_duration())
            };
            if let Some(wait) = wait {
                debug!("Draining: waiting {:?} for buffered audio", wait);
                std::thread::sleep(wait);
            }
            self.events.emit_lossy(SinkEvent::Flushed {
                sink_id: self.id,
                drain: true,
                timestamp: chrono::Utc::now(),
            });
            return Ok(());
        }

        let mut inner = self.lock();
        Self::require_audio(&inner, "flush")?;

        let resume = if inner.lifecycle == LifecycleState::Paused {
            PlayState::Paused
        } else {
            PlayState::Playing
        };
        self.monitor.reset();
        let hardware = match inner.queue.as_mut() {
            Some(queue) => {
                hard_reset_queue(queue.as_mut(), self.monitor.completion_callback(), resume)
            }
            None => Ok(()),
        };

        if let Some(ring) = inner.ring.as_mut() {
            ring.clear();
        }
        if let Some(staging) = inner.staging.as_mut() {
            staging.rewind();
        }
        inner.samples_in_flight = 0;
        inner.pending_frame_bytes = 0;
        inner.dropping = false;
        debug!("Hard flush: buffered audio discarded");

        self.events.emit_lossy(SinkEvent::Flushed {
            sink_id: self.id,
            drain: false,
            timestamp: chrono::Utc::now(),
        });
        hardware
    }

    /// Set output volume (0.0 = silent, 1.0 = full volume)
    ///
    /// Values are clamped to [0.0, 1.0] and sent to the hardware in millibels.
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        let mut inner = self.lock();
        let clamped = volume.clamp(0.0, 1.0);
        let queue = inner
            .queue
            .as_mut()
            .ok_or_else(|| Error::InvalidState("no hardware player".to_string()))?;
        queue.set_volume_level(linear_to_millibels(clamped))?;
        inner.volume = clamped;
        debug!("Volume set to {:.2}", clamped);
        Ok(())
    }

    pub fn set_mute(&self, mute: bool) -> Result<()> {
        let mut inner = self.lock();
        let queue = inner
            .queue
            .as_mut()
            .ok_or_else(|| Error::InvalidState("no hardware player".to_string()))?;
        queue.set_mute(mute)?;
        inner.muted = mute;
        Ok(())
    }
}

fn start_queue(queue: &mut dyn HardwareQueue, callback: CompletionCallback) -> Result<()> {
    queue.set_completion_callback(callback)?;
    queue.set_play_state(PlayState::Playing)
}

/// Stop and clear the hardware queue, then swap in `callback` so completions
/// of cleared units land on the superseded generation
fn hard_reset_queue(
    queue: &mut dyn HardwareQueue,
    callback: CompletionCallback,
    resume: PlayState,
) -> Result<()> {
    queue.set_play_state(PlayState::Stopped)?;
    queue.clear_queue()?;
    queue.set_completion_callback(callback)?;
    queue.set_play_state(resume)
}
