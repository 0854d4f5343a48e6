//! Simulated hardware buffer queue
//!
//! In-process stand-in for the platform player. Units are consumed either
//! manually ([`SimulatedHardware::consume`], deterministic tests) or by a player
//! thread that plays one unit per period while in the playing state. Each
//! consumed unit fires the completion callback on the consuming thread, exactly
//! like the platform's own audio thread would.
//!
//! The [`SimulatedHardware`] handle stays with the test or binary after the
//! sink is moved into the engine, for fault injection and inspection.

use super::{CompletionCallback, HardwareQueue, HardwareSink, PlayState};
use crate::audio::PcmFormat;
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

struct HardwareState {
    capacity: usize,
    format: Option<PcmFormat>,
    slots: VecDeque<Vec<u8>>,
    play_state: PlayState,
    callback: Option<Arc<CompletionCallback>>,
    destroyed: bool,
    volume_mb: i16,
    muted: bool,

    // Fault injection
    fail_depth_queries: bool,
    fail_play_state: bool,
    reject_enqueues: usize,
    hold_completions: bool,
    held: Vec<Arc<CompletionCallback>>,

    // Inspection
    enqueued_sizes: Vec<usize>,
    capture: bool,
    consumed: Vec<u8>,
    completions: u64,
}

impl HardwareState {
    fn new() -> Self {
        Self {
            capacity: 0,
            format: None,
            slots: VecDeque::new(),
            play_state: PlayState::Stopped,
            callback: None,
            destroyed: true,
            volume_mb: 0,
            muted: false,
            fail_depth_queries: false,
            fail_play_state: false,
            reject_enqueues: 0,
            hold_completions: false,
            held: Vec::new(),
            enqueued_sizes: Vec::new(),
            capture: false,
            consumed: Vec::new(),
            completions: 0,
        }
    }
}

/// Control and inspection handle for the simulated hardware
#[derive(Clone)]
pub struct SimulatedHardware {
    state: Arc<Mutex<HardwareState>>,
    fail_open: Arc<AtomicBool>,
}

impl SimulatedHardware {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HardwareState::new())),
            fail_open: Arc::new(AtomicBool::new(false)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HardwareState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Play up to `units` queued units, firing one completion per unit
    ///
    /// Nothing is consumed unless the player is in the playing state.
    /// Returns the number of units consumed.
    pub fn consume(&self, units: usize) -> usize {
        let (callback, count) = {
            let mut state = self.lock();
            if state.destroyed || state.play_state != PlayState::Playing {
                return 0;
            }

            let mut count = 0;
            while count < units {
                let Some(unit) = state.slots.pop_front() else {
                    break;
                };
                if state.capture {
                    state.consumed.extend_from_slice(&unit);
                }
                count += 1;
            }
            state.completions += count as u64;
            if state.hold_completions {
                if let Some(callback) = state.callback.clone() {
                    state.held.extend(std::iter::repeat(callback).take(count));
                }
                return count;
            }
            (state.callback.clone(), count)
        };

        // Callback runs outside the hardware lock, as on the platform thread
        if let Some(callback) = callback {
            for _ in 0..count {
                callback();
            }
        }
        count
    }

    /// Delay completions of consumed units until [`Self::release_completions`]
    ///
    /// Models a platform thread that has popped a unit but not yet run its
    /// callback when the engine clears the queue.
    pub fn hold_completions(&self, hold: bool) {
        self.lock().hold_completions = hold;
    }

    /// Fire every held completion with the callback that was registered when
    /// its unit was consumed. Returns how many fired.
    pub fn release_completions(&self) -> usize {
        let held = std::mem::take(&mut self.lock().held);
        for callback in &held {
            callback();
        }
        held.len()
    }

    /// Units currently queued
    pub fn depth(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn play_state(&self) -> PlayState {
        self.lock().play_state
    }

    /// Format the player was last opened with
    pub fn format(&self) -> Option<PcmFormat> {
        self.lock().format
    }

    /// Size of every unit ever accepted, in order
    pub fn enqueued_sizes(&self) -> Vec<usize> {
        self.lock().enqueued_sizes.clone()
    }

    /// Total completions fired
    pub fn completions(&self) -> u64 {
        self.lock().completions
    }

    /// Record consumed bytes for later comparison
    pub fn set_capture(&self, capture: bool) {
        self.lock().capture = capture;
    }

    /// Bytes played so far (only while capture is enabled)
    pub fn consumed_bytes(&self) -> Vec<u8> {
        self.lock().consumed.clone()
    }

    pub fn volume_level(&self) -> i16 {
        self.lock().volume_mb
    }

    pub fn is_muted(&self) -> bool {
        self.lock().muted
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }

    /// Make depth queries fail until turned off
    pub fn fail_depth_queries(&self, fail: bool) {
        self.lock().fail_depth_queries = fail;
    }

    /// Make play state changes fail until turned off
    pub fn fail_play_state(&self, fail: bool) {
        self.lock().fail_play_state = fail;
    }

    /// Reject the next `count` enqueue calls regardless of free slots
    pub fn reject_next_enqueues(&self, count: usize) {
        self.lock().reject_enqueues = count;
    }

    /// Make the next `open` fail with an initialization error
    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Returns false once the player is destroyed
    fn is_alive(&self) -> bool {
        !self.lock().destroyed
    }
}

/// Simulated platform audio output
pub struct SimulatedSink {
    hardware: SimulatedHardware,
    /// Real-time consumption period (None = manual consumption only)
    unit_period: Option<Duration>,
}

impl SimulatedSink {
    /// Sink whose units are consumed only through [`SimulatedHardware::consume`]
    pub fn manual() -> Self {
        Self {
            hardware: SimulatedHardware::new(),
            unit_period: None,
        }
    }

    /// Sink with a player thread consuming one unit every `unit_period`
    pub fn realtime(unit_period: Duration) -> Self {
        Self {
            hardware: SimulatedHardware::new(),
            unit_period: Some(unit_period),
        }
    }

    /// Handle for fault injection and inspection
    pub fn hardware(&self) -> SimulatedHardware {
        self.hardware.clone()
    }
}

impl HardwareSink for SimulatedSink {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open(&mut self, format: &PcmFormat, pool_capacity: usize) -> Result<Box<dyn HardwareQueue>> {
        if self.hardware.fail_open.load(Ordering::SeqCst) {
            return Err(Error::Initialization(
                "simulated player creation failed".to_string(),
            ));
        }

        {
            let mut state = self.hardware.lock();
            if !state.destroyed {
                return Err(Error::Initialization(
                    "simulated player already open".to_string(),
                ));
            }
            state.capacity = pool_capacity;
            state.format = Some(*format);
            state.slots = VecDeque::with_capacity(pool_capacity);
            state.play_state = PlayState::Stopped;
            state.callback = None;
            state.destroyed = false;
        }

        let player = match self.unit_period {
            Some(period) => Some(spawn_player(self.hardware.clone(), period)?),
            None => None,
        };

        info!(
            "Simulated player opened: {} Hz, {} ch ({:?}), {} bit, {} slots",
            format.sample_rate,
            format.channels,
            format.channel_layout(),
            format.bit_depth,
            pool_capacity
        );

        Ok(Box::new(SimulatedQueue {
            hardware: self.hardware.clone(),
            player,
        }))
    }

    fn close(&mut self) {
        debug!("Simulated output closed");
    }
}

fn spawn_player(hardware: SimulatedHardware, period: Duration) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("slsink-sim-player".to_string())
        .spawn(move || {
            while hardware.is_alive() {
                std::thread::sleep(period);
                hardware.consume(1);
            }
        })
        .map_err(|e| Error::Initialization(format!("failed to spawn player thread: {}", e)))
}

/// Queue handed to the engine by [`SimulatedSink::open`]
pub struct SimulatedQueue {
    hardware: SimulatedHardware,
    player: Option<JoinHandle<()>>,
}

impl HardwareQueue for SimulatedQueue {
    fn capacity(&self) -> usize {
        self.hardware.lock().capacity
    }

    fn query_depth(&self) -> Result<usize> {
        let state = self.hardware.lock();
        if state.destroyed {
            return Err(Error::HardwareQuery("player destroyed".to_string()));
        }
        if state.fail_depth_queries {
            return Err(Error::HardwareQuery("buffer queue state unavailable".to_string()));
        }
        Ok(state.slots.len())
    }

    fn enqueue(&mut self, unit: &[u8]) -> Result<()> {
        let mut state = self.hardware.lock();
        if state.destroyed {
            return Err(Error::EnqueueRejected("player destroyed".to_string()));
        }
        if state.reject_enqueues > 0 {
            state.reject_enqueues -= 1;
            return Err(Error::EnqueueRejected("buffer refused by hardware".to_string()));
        }
        if state.slots.len() >= state.capacity {
            return Err(Error::EnqueueRejected("all slots in use".to_string()));
        }
        state.slots.push_back(unit.to_vec());
        state.enqueued_sizes.push(unit.len());
        Ok(())
    }

    fn set_completion_callback(&mut self, callback: CompletionCallback) -> Result<()> {
        let mut state = self.hardware.lock();
        if state.destroyed {
            return Err(Error::InvalidState("player destroyed".to_string()));
        }
        state.callback = Some(Arc::new(callback));
        Ok(())
    }

    fn set_play_state(&mut self, play_state: PlayState) -> Result<()> {
        let mut state = self.hardware.lock();
        if state.destroyed {
            return Err(Error::InvalidState("player destroyed".to_string()));
        }
        if state.fail_play_state {
            return Err(Error::InvalidState("play state change refused".to_string()));
        }
        state.play_state = play_state;
        Ok(())
    }

    fn clear_queue(&mut self) -> Result<()> {
        let mut state = self.hardware.lock();
        if state.destroyed {
            return Err(Error::InvalidState("player destroyed".to_string()));
        }
        state.slots.clear();
        Ok(())
    }

    fn set_volume_level(&mut self, millibels: i16) -> Result<()> {
        self.hardware.lock().volume_mb = millibels;
        Ok(())
    }

    fn set_mute(&mut self, mute: bool) -> Result<()> {
        self.hardware.lock().muted = mute;
        Ok(())
    }

    fn destroy(&mut self) {
        {
            let mut state = self.hardware.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.play_state = PlayState::Stopped;
            state.slots.clear();
            state.callback = None;
        }

        if let Some(player) = self.player.take() {
            if player.join().is_err() {
                warn!("Simulated player thread panicked");
            }
        }
        debug!("Simulated player destroyed");
    }
}

impl Drop for SimulatedQueue {
    fn drop(&mut self) {
        self.destroy();
    }
}
