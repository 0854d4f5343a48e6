//! Shared fixtures for sink integration tests

#![allow(dead_code)]

use slsink::hw::{SimulatedHardware, SimulatedSink};
use slsink::SinkEngine;
use slsink_common::{EventBus, SinkConfig};

/// 44.1 kHz stereo 16-bit: 441 samples × 4 bytes per 10 ms unit
pub const UNIT_SIZE: usize = 1764;
pub const SAMPLES_PER_UNIT: i64 = 441;
pub const BYTES_PER_SAMPLE: usize = 4;

/// Default configuration with a custom pool size
pub fn config_with_pool(pool_capacity: usize) -> SinkConfig {
    SinkConfig {
        pool_capacity,
        ..SinkConfig::default()
    }
}

/// Opened and started engine on a manually clocked simulated backend
pub fn started_engine(config: &SinkConfig) -> (SinkEngine, SimulatedSink, SimulatedHardware) {
    let engine = SinkEngine::new(config, EventBus::new(64)).unwrap();
    let mut sink = SimulatedSink::manual();
    let hw = sink.hardware();
    engine.open(&mut sink).unwrap();
    engine.start().unwrap();
    (engine, sink, hw)
}

/// Deterministic, non-constant PCM bytes
pub fn pcm_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
