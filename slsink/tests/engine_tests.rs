//! Sink engine tests
//!
//! Write/drain accounting, latency math, flush semantics, backpressure and
//! hardware fault handling against the manually clocked simulated backend.

mod helpers;

use helpers::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use slsink::hw::PlayState;
use slsink::{DrainOutcome, Error};
use slsink_common::{SinkConfig, SinkEvent, WritePolicy};
use std::time::{Duration, Instant};

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_write_2000_bytes_drains_one_unit() {
    let (engine, _sink, hw) = started_engine(&SinkConfig::default());

    let accepted = engine.write_samples(&pcm_bytes(2000, 0)).unwrap();

    assert_eq!(accepted, 2000);
    assert_eq!(engine.ring_level(), 236);
    assert_eq!(engine.sink_state().samples_in_flight, 59);
    assert_eq!(hw.enqueued_sizes(), vec![UNIT_SIZE]);
    assert_eq!(hw.depth(), 1);
    assert_eq!(engine.sink_state().next_slot_index, 1);
}

#[test]
fn test_latency_unavailable_before_first_completion() {
    let (engine, _sink, hw) = started_engine(&SinkConfig::default());
    engine.write_samples(&pcm_bytes(4000, 0)).unwrap();

    assert!(matches!(engine.drift(), Err(Error::LatencyUnavailable)));
    assert!(matches!(engine.latency_pts(), Err(Error::LatencyUnavailable)));

    hw.consume(1);
    let drift = engine.drift().unwrap();
    // Hardware queue empty, 2236 bytes (559 samples) still in software
    assert_eq!(drift.hardware_us, 0);
    assert_eq!(drift.software_us, 559 * 1_000_000 / 44_100);
}

#[test]
fn test_hard_flush_resets_accounting() {
    let (engine, _sink, hw) = started_engine(&SinkConfig::default());
    engine.write_samples(&pcm_bytes(5000, 0)).unwrap();
    engine.write_samples(&pcm_bytes(5000, 1)).unwrap();
    hw.consume(1);
    assert!(engine.drift().is_ok());

    engine.flush(false).unwrap();

    let state = engine.sink_state();
    assert_eq!(state.samples_in_flight, 0);
    assert!(!state.started);
    assert_eq!(state.next_slot_index, 0);
    assert_eq!(engine.ring_level(), 0);
    assert_eq!(hw.depth(), 0);
    assert_eq!(hw.play_state(), PlayState::Playing);
    assert!(matches!(engine.drift(), Err(Error::LatencyUnavailable)));

    // Measurable again after the next completion
    engine.write_samples(&pcm_bytes(2000, 2)).unwrap();
    hw.consume(1);
    assert!(engine.drift().is_ok());
}

#[test]
fn test_completion_in_flight_during_hard_flush_is_ignored() {
    let (engine, _sink, hw) = started_engine(&SinkConfig::default());
    engine.write_samples(&pcm_bytes(4000, 0)).unwrap();
    assert_eq!(hw.depth(), 1);

    // The platform pops the unit but its callback has not run yet
    hw.hold_completions(true);
    assert_eq!(hw.consume(1), 1);
    engine.flush(false).unwrap();
    hw.hold_completions(false);
    assert_eq!(hw.release_completions(), 1);

    assert!(!engine.sink_state().started);
    assert!(matches!(engine.drift(), Err(Error::LatencyUnavailable)));
    assert_eq!(engine.snapshot().callbacks.stale_completions, 1);

    engine.write_samples(&pcm_bytes(2000, 1)).unwrap();
    hw.consume(1);
    assert!(engine.sink_state().started);
    assert!(engine.drift().is_ok());
}

#[test]
fn test_full_pool_still_accepts_writes() {
    let (engine, _sink, hw) = started_engine(&config_with_pool(2));
    engine.write_samples(&pcm_bytes(UNIT_SIZE, 0)).unwrap();
    engine.write_samples(&pcm_bytes(UNIT_SIZE, 1)).unwrap();
    assert_eq!(hw.depth(), 2);

    let accepted = engine.write_samples(&pcm_bytes(8000, 2)).unwrap();
    assert_eq!(accepted, 8000);
    assert_eq!(engine.ring_level(), 8000);
    assert_eq!(hw.enqueued_sizes().len(), 2);

    assert_eq!(engine.drain_to_hardware().unwrap(), DrainOutcome::Backpressure);
    assert_eq!(engine.ring_level(), 8000);
    assert_eq!(engine.counters().drains_backpressured, 2);

    hw.consume(1);
    assert_eq!(engine.drain_to_hardware().unwrap(), DrainOutcome::Enqueued);
    assert_eq!(engine.ring_level(), 8000 - UNIT_SIZE);
    assert_eq!(hw.depth(), 2);
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_drain_leaves_latency_unchanged() {
    let (engine, _sink, hw) = started_engine(&config_with_pool(8));
    engine.write_samples(&pcm_bytes(3000, 0)).unwrap();
    hw.consume(1);
    engine.write_samples(&pcm_bytes(3000, 1)).unwrap();
    assert!(engine.ring_level() >= UNIT_SIZE);

    let before = engine.drift().unwrap();
    assert_eq!(engine.drain_to_hardware().unwrap(), DrainOutcome::Enqueued);
    let after = engine.drift().unwrap();

    assert!((before.total_micros() - after.total_micros()).abs() <= 1);
    assert_eq!(after.hardware_us - before.hardware_us, 10_000);
    assert_eq!(before.software_us - after.software_us, 10_000);
}

#[test]
fn test_only_whole_units_reach_hardware() {
    let (engine, _sink, hw) = started_engine(&config_with_pool(16));
    let mut rng = StdRng::seed_from_u64(7);

    for i in 0..200u32 {
        let len = rng.gen_range(1..3000) / BYTES_PER_SAMPLE * BYTES_PER_SAMPLE;
        engine.write_samples(&pcm_bytes(len, i as u8)).unwrap();
        if i % 3 == 0 {
            hw.consume(rng.gen_range(1..4));
        }
    }

    let sizes = hw.enqueued_sizes();
    assert!(!sizes.is_empty());
    assert!(sizes.iter().all(|&size| size == UNIT_SIZE));
}

#[test]
fn test_bounds_hold_under_random_traffic() {
    let config = config_with_pool(6);
    let (engine, _sink, hw) = started_engine(&config);
    let capacity = engine.geometry().ring_capacity;
    let mut rng = StdRng::seed_from_u64(42);

    for i in 0..500u32 {
        let len = rng.gen_range(0..6000) / BYTES_PER_SAMPLE * BYTES_PER_SAMPLE;
        engine.write_samples(&pcm_bytes(len, i as u8)).unwrap();
        if rng.gen_bool(0.3) {
            let _ = engine.drain_to_hardware().unwrap();
        }
        if rng.gen_bool(0.2) {
            hw.consume(rng.gen_range(1..3));
        }

        assert!(engine.ring_level() <= capacity);
        assert!(hw.depth() <= config.pool_capacity);
        assert!(engine.sink_state().samples_in_flight >= 0);
    }
}

#[test]
fn test_unaligned_writes_keep_accounting_nonnegative() {
    let (engine, _sink, hw) = started_engine(&SinkConfig::default());

    // 600 writes of 3 bytes: 450 frames, one unit drained once 1764 bytes are in
    for i in 0..600u32 {
        assert_eq!(engine.write_samples(&pcm_bytes(3, i as u8)).unwrap(), 3);
        let samples = engine.sink_state().samples_in_flight;
        assert!(samples >= 0);
        assert_eq!(samples, (engine.ring_level() / BYTES_PER_SAMPLE) as i64);
    }

    assert_eq!(hw.depth(), 1);
    assert_eq!(engine.ring_level(), 36);
    assert_eq!(engine.sink_state().samples_in_flight, 9);

    hw.consume(1);
    let drift = engine.drift().unwrap();
    assert_eq!(drift.hardware_us, 0);
    assert_eq!(drift.software_us, 9 * 1_000_000 / 44_100);
    assert_eq!(engine.buffered_level().unwrap(), 9 * BYTES_PER_SAMPLE);
}

#[test]
fn test_accounting_tracks_ring_under_unaligned_traffic() {
    let (engine, _sink, hw) = started_engine(&config_with_pool(6));
    let mut rng = StdRng::seed_from_u64(11);

    for i in 0..500u32 {
        let len = rng.gen_range(1..3000);
        engine.write_samples(&pcm_bytes(len, i as u8)).unwrap();
        if rng.gen_bool(0.3) {
            let _ = engine.drain_to_hardware().unwrap();
        }
        if rng.gen_bool(0.2) {
            hw.consume(rng.gen_range(1..3));
        }

        let samples = engine.sink_state().samples_in_flight;
        assert!(samples >= 0);
        assert_eq!(samples, (engine.ring_level() / BYTES_PER_SAMPLE) as i64);
    }
}

#[test]
fn test_consumed_audio_matches_written_order() {
    let (engine, _sink, hw) = started_engine(&config_with_pool(4));
    hw.set_capture(true);
    let mut accepted_stream = Vec::new();

    for i in 0..60u8 {
        let chunk = pcm_bytes(700 + i as usize * 4, i);
        let accepted = engine.write_samples(&chunk).unwrap();
        accepted_stream.extend_from_slice(&chunk[..accepted]);
        hw.consume(1);
    }
    while engine.drain_to_hardware().unwrap() == DrainOutcome::Enqueued {
        hw.consume(1);
    }
    hw.consume(4);

    let consumed = hw.consumed_bytes();
    assert_eq!(consumed.len() % UNIT_SIZE, 0);
    assert_eq!(&accepted_stream[..consumed.len()], consumed.as_slice());
}

// ============================================================================
// Write policy
// ============================================================================

#[test]
fn test_whole_policy_needs_more_space_than_requested() {
    let (engine, _sink, _hw) = started_engine(&config_with_pool(1));
    let capacity = engine.geometry().ring_capacity;

    // Exactly the free space is not enough
    assert_eq!(engine.write_samples(&pcm_bytes(capacity, 0)).unwrap(), 0);
    assert_eq!(engine.counters().writes_dropped, 1);
    assert_eq!(engine.sink_state().samples_in_flight, 0);

    assert_eq!(engine.write_samples(&pcm_bytes(capacity - 4, 0)).unwrap(), capacity - 4);
}

#[test]
fn test_partial_policy_fills_free_space() {
    let config = SinkConfig {
        write_policy: WritePolicy::Partial,
        pool_capacity: 1,
        ..SinkConfig::default()
    };
    let (engine, _sink, hw) = started_engine(&config);
    let capacity = engine.geometry().ring_capacity;

    let accepted = engine.write_samples(&pcm_bytes(capacity + 100, 0)).unwrap();
    assert_eq!(accepted, capacity);
    assert_eq!(hw.depth(), 1);
    assert_eq!(
        engine.sink_state().samples_in_flight,
        (capacity / BYTES_PER_SAMPLE) as i64 - SAMPLES_PER_UNIT
    );

    // Exactly one unit of space was freed by the drain
    let accepted = engine.write_samples(&pcm_bytes(UNIT_SIZE + 10, 1)).unwrap();
    assert_eq!(accepted, UNIT_SIZE);
}

// ============================================================================
// Rejection and hardware faults
// ============================================================================

#[test]
fn test_rejected_unit_is_dropped_without_advancing() {
    let (engine, _sink, hw) = started_engine(&SinkConfig::default());
    let mut events = engine.events().subscribe();
    hw.reject_next_enqueues(1);

    engine.write_samples(&pcm_bytes(2000, 0)).unwrap();

    // The unit left the ring buffer but never reached the hardware
    assert_eq!(engine.ring_level(), 236);
    assert_eq!(engine.sink_state().samples_in_flight, 59);
    assert_eq!(engine.sink_state().next_slot_index, 0);
    assert!(hw.enqueued_sizes().is_empty());
    assert_eq!(engine.counters().units_rejected, 1);
    assert!(matches!(
        events.try_recv(),
        Ok(SinkEvent::EnqueueRejected { dropped_bytes: UNIT_SIZE, .. })
    ));

    engine.write_samples(&pcm_bytes(2000, 1)).unwrap();
    assert_eq!(hw.enqueued_sizes(), vec![UNIT_SIZE]);
    assert_eq!(engine.sink_state().next_slot_index, 1);
}

#[test]
fn test_depth_query_failure_is_reported() {
    let (engine, _sink, hw) = started_engine(&SinkConfig::default());
    engine.write_samples(&pcm_bytes(2000, 0)).unwrap();
    hw.consume(1);
    hw.fail_depth_queries(true);

    assert!(matches!(engine.drift(), Err(Error::HardwareQuery(_))));
    assert!(matches!(engine.buffered_level(), Err(Error::HardwareQuery(_))));

    // Writes still succeed; the drain simply waits
    assert_eq!(engine.write_samples(&pcm_bytes(2000, 1)).unwrap(), 2000);
    assert!(matches!(
        engine.drain_to_hardware(),
        Err(Error::HardwareQuery(_))
    ));
    assert_eq!(engine.ring_level(), 2236);
    assert!(engine.snapshot().hardware_depth.is_none());

    hw.fail_depth_queries(false);
    assert_eq!(engine.drain_to_hardware().unwrap(), DrainOutcome::Enqueued);
}

#[test]
fn test_dropped_writes_emit_one_event_per_run() {
    let (engine, _sink, _hw) = started_engine(&config_with_pool(1));
    let capacity = engine.geometry().ring_capacity;
    engine.write_samples(&pcm_bytes(capacity - UNIT_SIZE, 0)).unwrap();
    let mut events = engine.events().subscribe();

    for _ in 0..5 {
        assert_eq!(engine.write_samples(&pcm_bytes(UNIT_SIZE * 2, 1)).unwrap(), 0);
    }

    assert!(matches!(events.try_recv(), Ok(SinkEvent::WriteRejected { .. })));
    assert!(events.try_recv().is_err());
    assert_eq!(engine.counters().writes_dropped, 5);
}

// ============================================================================
// Levels and flush
// ============================================================================

#[test]
fn test_buffered_level_counts_both_stages() {
    let (engine, _sink, hw) = started_engine(&SinkConfig::default());
    engine.write_samples(&pcm_bytes(2000, 0)).unwrap();

    // 59 samples × 4 + 1 unit × 1764
    assert_eq!(engine.buffered_level().unwrap(), 2000);

    hw.consume(1);
    assert_eq!(engine.buffered_level().unwrap(), 236);
}

#[test]
fn test_soft_flush_waits_for_latency() {
    let (engine, _sink, hw) = started_engine(&config_with_pool(8));
    for i in 0..4 {
        engine.write_samples(&pcm_bytes(UNIT_SIZE, i)).unwrap();
    }
    hw.consume(1);
    let expected = engine.drift().unwrap().as_duration();
    assert_eq!(expected, Duration::from_millis(30));

    let started = Instant::now();
    engine.flush(true).unwrap();
    assert!(started.elapsed() >= expected);

    // Nothing was discarded
    assert_eq!(hw.depth(), 3);
}

#[test]
fn test_soft_flush_returns_at_once_without_latency() {
    let (engine, _sink, _hw) = started_engine(&SinkConfig::default());
    engine.write_samples(&pcm_bytes(8000, 0)).unwrap();

    let started = Instant::now();
    engine.flush(true).unwrap();
    assert!(started.elapsed() < Duration::from_millis(20));
}

#[test]
fn test_hard_flush_while_paused_stays_paused() {
    let (engine, _sink, hw) = started_engine(&SinkConfig::default());
    engine.write_samples(&pcm_bytes(4000, 0)).unwrap();
    engine.pause(true).unwrap();

    engine.flush(false).unwrap();

    assert_eq!(hw.play_state(), PlayState::Paused);
    assert_eq!(hw.depth(), 0);
}

#[test]
fn test_pause_keeps_buffered_audio() {
    let (engine, _sink, hw) = started_engine(&SinkConfig::default());
    engine.write_samples(&pcm_bytes(4000, 0)).unwrap();

    engine.pause(true).unwrap();
    assert_eq!(hw.consume(1), 0);
    assert_eq!(hw.depth(), 1);

    engine.pause(false).unwrap();
    assert_eq!(hw.consume(1), 1);
    assert_eq!(engine.ring_level(), 4000 - UNIT_SIZE);
}

#[test]
fn test_snapshot_serializes() {
    let (engine, _sink, hw) = started_engine(&SinkConfig::default());
    engine.write_samples(&pcm_bytes(2000, 0)).unwrap();
    hw.consume(1);

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.ring_level, 236);
    assert_eq!(snapshot.hardware_depth, Some(0));
    assert!(snapshot.drift_us.is_some());
    assert_eq!(snapshot.callbacks.completion_count, 1);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["lifecycle"], "started");
    assert_eq!(json["state"]["samples_in_flight"], 59);
}
