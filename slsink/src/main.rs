//! Sink simulator (slsink-sim)
//!
//! Plays a sine tone through the simulated real-time hardware backend,
//! writing it in irregular chunk sizes the way a decoder would, and reports
//! latency and buffer levels while exercising pause/resume and both flush
//! modes.
//!
//! **Usage:**
//! ```bash
//! slsink-sim [--config <file>] [--seconds 5] [--sample-rate 48000] [--channels 1]
//! ```

use std::f32::consts::TAU;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use rand::Rng;
use slsink::hw::SimulatedSink;
use slsink::AudioSink;
use slsink_common::config::load_config;
use slsink_common::{LoggingConfig, SinkConfig, SinkEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Simulated audio sink driver
#[derive(Parser, Debug)]
#[command(name = "slsink-sim")]
#[command(about = "Drive the audio sink with a simulated real-time output")]
#[command(version)]
struct Args {
    /// Configuration file (falls back to SLSINK_CONFIG, then the user config dir)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Seconds of tone to produce
    #[arg(short, long, default_value = "5")]
    seconds: u32,

    /// Override the configured sample rate
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Override the configured channel count
    #[arg(long)]
    channels: Option<u16>,

    /// Tone frequency in Hz
    #[arg(long, default_value = "440")]
    frequency: f32,

    /// Smallest producer chunk (frames)
    #[arg(long, default_value = "64")]
    chunk_min: usize,

    /// Largest producer chunk (frames)
    #[arg(long, default_value = "1500")]
    chunk_max: usize,

    /// Output volume (0.0 - 1.0)
    #[arg(long, default_value = "0.8")]
    volume: f32,

    /// Skip the pause/resume and flush demonstrations
    #[arg(long)]
    no_demo: bool,
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("slsink={0},slsink_sim={0}", logging.level)));

    match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

/// Sine tone generator producing interleaved PCM at the sink's format
struct ToneGenerator {
    phase: f32,
    step: f32,
    channels: usize,
    bit_depth: u16,
}

impl ToneGenerator {
    fn new(frequency: f32, config: &SinkConfig) -> Self {
        Self {
            phase: 0.0,
            step: TAU * frequency / config.sample_rate as f32,
            channels: config.channels as usize,
            bit_depth: config.bit_depth,
        }
    }

    /// Append `frames` frames to `out`
    fn fill(&mut self, frames: usize, out: &mut Vec<u8>) {
        for _ in 0..frames {
            let value = self.phase.sin() * 0.5;
            self.phase = (self.phase + self.step) % TAU;
            for _ in 0..self.channels {
                match self.bit_depth {
                    8 => out.push(((value * 127.0) as i16 + 128) as u8),
                    16 => out.extend_from_slice(&((value * i16::MAX as f32) as i16).to_le_bytes()),
                    24 => out.extend_from_slice(&((value * 8_388_607.0) as i32).to_le_bytes()[..3]),
                    _ => out.extend_from_slice(&((value * i32::MAX as f32) as i32).to_le_bytes()),
                }
            }
        }
    }
}

fn report(sink: &AudioSink, label: &str) {
    let snapshot = sink.snapshot();
    let latency = sink
        .latency()
        .map_or_else(|| "unknown".to_string(), |l| format!("{:.1}ms", l.as_secs_f64() * 1000.0));
    let level = sink
        .buffered_level()
        .map_or_else(|| "unknown".to_string(), |l| l.to_string());
    info!(
        "[{}] {} latency={} buffered={}B ring={}/{}B depth={:?} enqueued={} dropped_writes={}",
        label,
        snapshot.lifecycle,
        latency,
        level,
        snapshot.ring_level,
        snapshot.ring_capacity,
        snapshot.hardware_depth,
        snapshot.counters.units_enqueued,
        snapshot.counters.writes_dropped
    );
}

fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config =
        load_config(args.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&toml_config.logging)?;

    let mut config = toml_config.sink;
    if let Some(rate) = args.sample_rate {
        config.sample_rate = rate;
    }
    if let Some(channels) = args.channels {
        config.channels = channels;
    }
    if config.drain_poll_interval_ms.is_none() {
        config.drain_poll_interval_ms = Some(config.time_quantum_ms as u64);
    }

    info!(
        "Starting simulation: {} Hz, {} ch, {} bit, {}ms window, {}ms units",
        config.sample_rate,
        config.channels,
        config.bit_depth,
        config.buffer_window_ms,
        config.time_quantum_ms
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    let backend = SimulatedSink::realtime(Duration::from_millis(config.time_quantum_ms as u64));
    let mut sink = AudioSink::open(&config, Box::new(backend))
        .context("Failed to open audio sink")?
        .with_runtime(runtime.handle().clone());

    let mut events = sink.subscribe();
    runtime.spawn(async move {
        loop {
            match events.recv().await {
                Ok(SinkEvent::StateChanged { .. }) => {}
                Ok(event) => debug!("Event: {:?}", event),
                Err(RecvError::Lagged(n)) => warn!("Event listener lagged by {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    sink.start().context("Failed to start audio sink")?;
    sink.set_volume(args.volume).context("Failed to set volume")?;

    let bytes_per_frame = config.bytes_per_sample();
    let total_frames = config.sample_rate as usize * args.seconds as usize;
    // A chunk must fit the ring buffer or a whole-chunk write never succeeds
    let ring_frames = config.ring_capacity_bytes() / bytes_per_frame;
    let chunk_max = args
        .chunk_max
        .max(args.chunk_min)
        .min(ring_frames.saturating_sub(1))
        .max(1);
    let chunk_min = args.chunk_min.clamp(1, chunk_max);
    let idle = Duration::from_millis(config.time_quantum_ms as u64);

    let mut tone = ToneGenerator::new(args.frequency, &config);
    let mut rng = rand::thread_rng();
    let mut pending: Vec<u8> = Vec::new();
    let mut produced = 0usize;
    let mut paused_demo = args.no_demo;
    let mut flushed_demo = args.no_demo;
    let mut last_report = Instant::now();

    while produced < total_frames || !pending.is_empty() {
        if pending.is_empty() {
            let frames = rng.gen_range(chunk_min..=chunk_max).min(total_frames - produced);
            tone.fill(frames, &mut pending);
            produced += frames;
        }

        let accepted = sink.write(&pending).context("Write failed")?;
        pending.drain(..accepted);
        if accepted == 0 {
            std::thread::sleep(idle);
        }

        if !paused_demo && produced >= total_frames / 3 {
            paused_demo = true;
            report(&sink, "before pause");
            sink.pause().context("Pause failed")?;
            std::thread::sleep(Duration::from_millis(300));
            report(&sink, "paused");
            sink.resume().context("Resume failed")?;
        }

        if !flushed_demo && produced >= total_frames * 2 / 3 {
            flushed_demo = true;
            report(&sink, "before hard flush");
            sink.flush(false).context("Hard flush failed")?;
            report(&sink, "after hard flush");
        }

        if last_report.elapsed() >= Duration::from_millis(500) {
            report(&sink, "playing");
            last_report = Instant::now();
        }
    }

    info!("Producer finished, draining");
    let drained = Instant::now();
    sink.flush(true).context("Drain failed")?;
    info!("Drain returned after {:?}", drained.elapsed());
    report(&sink, "drained");

    let snapshot = sink.snapshot();
    println!(
        "{}",
        serde_json::to_string_pretty(&snapshot).context("Failed to serialize snapshot")?
    );

    sink.stop().context("Stop failed")?;
    sink.close().context("Close failed")?;
    info!("Simulation complete");
    Ok(())
}
