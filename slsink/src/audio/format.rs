//! PCM format and hardware unit geometry
//!
//! The hardware only accepts buffers of one fixed size: a "unit" holding
//! `time_quantum_ms` worth of sample frames. Everything the engine counts is
//! derived here once, at open time.

use serde::{Deserialize, Serialize};
use slsink_common::SinkConfig;

/// Clock units per second for drift values (microseconds)
pub const CLOCK_FREQ: i64 = 1_000_000;

/// Presentation timestamp ticks per second (MPEG 90 kHz clock)
pub const PTS_FREQ: i64 = 90_000;

/// Speaker layout handed to the hardware at open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelLayout {
    /// Single channel routed to the front-centre speaker
    FrontCenter,
    /// Front-left and front-right
    FrontLeftRight,
}

/// Interleaved PCM format of the producer's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

impl PcmFormat {
    pub fn from_config(config: &SinkConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            bit_depth: config.bit_depth,
        }
    }

    /// Bytes per interleaved sample frame (channels × bit depth / 8)
    pub fn bytes_per_sample(&self) -> usize {
        self.channels as usize * self.bit_depth as usize / 8
    }

    pub fn channel_layout(&self) -> ChannelLayout {
        if self.channels > 1 {
            ChannelLayout::FrontLeftRight
        } else {
            ChannelLayout::FrontCenter
        }
    }
}

/// Fixed sizes derived from the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitGeometry {
    /// Output sample rate in Hz
    pub rate: u32,
    /// Bytes per interleaved sample frame
    pub bytes_per_sample: usize,
    /// Sample frames per hardware unit
    pub samples_per_unit: usize,
    /// Bytes per hardware unit
    pub unit_size: usize,
    /// Hardware queue slots
    pub pool_capacity: usize,
    /// Duration of one unit in milliseconds
    pub time_quantum_ms: u32,
    /// Software ring buffer capacity in bytes
    pub ring_capacity: usize,
}

impl UnitGeometry {
    pub fn from_config(config: &SinkConfig) -> Self {
        Self {
            rate: config.sample_rate,
            bytes_per_sample: config.bytes_per_sample(),
            samples_per_unit: config.samples_per_unit(),
            unit_size: config.unit_size_bytes(),
            pool_capacity: config.pool_capacity,
            time_quantum_ms: config.time_quantum_ms,
            ring_capacity: config.ring_capacity_bytes(),
        }
    }

    /// Size of the round-robin staging region (one unit per hardware slot)
    pub fn staging_size(&self) -> usize {
        self.pool_capacity * self.unit_size
    }

    /// Whole sample frames contained in `bytes`
    pub fn bytes_to_samples(&self, bytes: usize) -> i64 {
        (bytes / self.bytes_per_sample) as i64
    }

    /// Time covered by `samples` frames, in microseconds
    pub fn samples_to_micros(&self, samples: i64) -> i64 {
        samples * CLOCK_FREQ / self.rate as i64
    }

    /// Time covered by `depth` queued units, in microseconds
    pub fn units_to_micros(&self, depth: usize) -> i64 {
        CLOCK_FREQ * self.time_quantum_ms as i64 * depth as i64 / 1000
    }

    /// Upper bound on the hardware-side latency term
    pub fn max_hardware_micros(&self) -> i64 {
        self.units_to_micros(self.pool_capacity)
    }
}
