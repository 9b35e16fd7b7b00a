//! Tamper witness daemon: runs the detection pipeline against a capture
//! source until stopped, logging incidents and watermark activity as they
//! are drained from the event sink.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tamper_witness_core::config::PipelineConfig;
use tamper_witness_core::ingest::{CaptureSource, ImageSequenceSource, SyntheticSource};
use tamper_witness_core::sink::{EventSink, SinkEvent};
use tamper_witness_core::{Pipeline, StopFlag};

#[derive(Parser, Debug)]
#[command(name = "tamper-witnessd", about = "Tamper-resistant video surveillance daemon")]
struct Args {
    /// Path to a TOML config file. Falls back to built-in defaults if omitted.
    #[arg(long, env = "TAMPER_WITNESS_CONFIG")]
    config: Option<PathBuf>,

    /// Directory of PNG/JPEG frames to replay. If omitted, runs against a
    /// procedurally generated synthetic source.
    #[arg(long, env = "TAMPER_WITNESS_INPUT")]
    input: Option<PathBuf>,

    /// Overrides the configured SQLite database path.
    #[arg(long)]
    db: Option<String>,

    /// Replay/generate at most this many frames, then stop (0 = unbounded).
    #[arg(long, default_value_t = 0)]
    max_frames: u64,

    /// Frame rate used for the synthetic source and for timestamping an
    /// image sequence.
    #[arg(long, default_value_t = 15.0)]
    fps: f64,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match PipelineConfig::load_from_path(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::error!("configuration error: {}", err);
                return ExitCode::from(2);
            }
        },
        None => PipelineConfig::default_config(),
    };
    if let Some(db) = args.db {
        config.db_path = db;
    }

    let sink = Arc::new(EventSink::new(256));
    let mut pipeline = match Pipeline::new(config, sink.clone()) {
        Ok(p) => p,
        Err(err) => {
            log::error!("failed to start pipeline: {}", err);
            return ExitCode::from(2);
        }
    };

    let stop = StopFlag::new();
    let ctrlc_stop = stop.clone();
    if let Err(err) = ctrlc::set_handler(move || ctrlc_stop.signal()) {
        log::warn!("failed to install signal handler: {}", err);
    }

    let consumer_stop = stop.clone();
    let consumer_sink = sink.clone();
    let consumer = std::thread::spawn(move || drain_loop(consumer_sink, consumer_stop));

    let mut source: Box<dyn CaptureSource> = match &args.input {
        Some(dir) => match ImageSequenceSource::open(dir, args.fps) {
            Ok(s) => Box::new(s),
            Err(err) => {
                log::error!("failed to open input directory: {}", err);
                return ExitCode::from(2);
            }
        },
        None => {
            let mut source = SyntheticSource::new(640, 480, args.fps);
            if args.max_frames > 0 {
                source = source.with_max_frames(args.max_frames);
            }
            Box::new(source)
        }
    };

    let result = pipeline.run(source.as_mut(), &stop);
    stop.signal();
    let _ = consumer.join();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("pipeline stopped: {}", err);
            ExitCode::from(1)
        }
    }
}

fn drain_loop(sink: Arc<EventSink>, stop: StopFlag) {
    loop {
        for event in sink.drain() {
            match event {
                SinkEvent::Incident(transition) => log::info!("{:?}", transition),
                SinkEvent::WatermarkEmbedded { timestamp, rgb } => {
                    log::debug!("watermark embedded at t={:.3} rgb={:?}", timestamp, rgb)
                }
            }
        }
        if stop.is_set() && sink.is_empty() {
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}
