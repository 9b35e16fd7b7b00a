//! Offline watermark validator CLI: checks a directory of decoded frames
//! against the expected HMAC-keyed watermark token and reports whether the
//! footage looks live or replayed (spec §4.6, §6).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tamper_witness_core::config::{Thresholds, WatermarkSecret};
use tamper_witness_core::frame::ChannelOrder;
use tamper_witness_core::watermark::{OfflineValidator, Verdict};

#[derive(Parser, Debug)]
#[command(name = "watermark-verify", about = "Validates a recorded clip's tamper watermark offline")]
struct Args {
    /// Directory of PNG/JPEG frames, in the order they were recorded.
    #[arg(long)]
    input: PathBuf,

    /// Watermark secret (must match the recording pipeline's secret).
    #[arg(long, env = "TAMPER_WITNESS_SECRET")]
    secret: String,

    /// Unix second assigned to the first frame; subsequent frames advance
    /// by `1 / fps`, rounded to the nearest whole second.
    #[arg(long)]
    clock_start: i64,

    #[arg(long, default_value_t = 15.0)]
    fps: f64,

    #[arg(long)]
    live_threshold: Option<f64>,

    #[arg(long)]
    color_match_distance: Option<f64>,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let secret = match WatermarkSecret::new(&args.secret) {
        Ok(s) => s,
        Err(err) => {
            log::error!("invalid secret: {}", err);
            return ExitCode::from(2);
        }
    };

    let mut paths: Vec<PathBuf> = match std::fs::read_dir(&args.input) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref(),
                    Some("png") | Some("jpg") | Some("jpeg")
                )
            })
            .collect(),
        Err(err) => {
            log::error!("failed to read input directory: {}", err);
            return ExitCode::from(2);
        }
    };
    paths.sort();
    if paths.is_empty() {
        log::error!("no PNG/JPEG frames found in {}", args.input.display());
        return ExitCode::from(2);
    }

    let mut decoded = Vec::with_capacity(paths.len());
    for path in &paths {
        match image::open(path) {
            Ok(img) => {
                let rgb = img.to_rgb8();
                let (w, h) = (rgb.width(), rgb.height());
                decoded.push((rgb.into_raw(), w, h));
            }
            Err(err) => {
                log::error!("failed to decode {}: {}", path.display(), err);
                return ExitCode::from(2);
            }
        }
    }

    let frames: Vec<(&[u8], u32, u32, ChannelOrder)> =
        decoded.iter().map(|(buf, w, h)| (buf.as_slice(), *w, *h, ChannelOrder::Rgb)).collect();

    let defaults = Thresholds::default();
    let live_threshold = args.live_threshold.unwrap_or(defaults.live_threshold);
    let color_match_distance = args.color_match_distance.unwrap_or(defaults.color_match_distance);

    let clock_start = args.clock_start;
    let fps = args.fps;
    let clock = move |i: usize| clock_start + (i as f64 / fps).round() as i64;

    let validator = OfflineValidator::new(secret);
    let report = validator.verify(&frames, clock, live_threshold, color_match_distance);

    println!("verdict: {:?}", report.verdict);
    println!("match_rate: {:.3}", report.match_rate);
    if let Some(reason) = &report.reason {
        println!("reason: {}", reason);
    }

    match report.verdict {
        Verdict::Live => ExitCode::SUCCESS,
        Verdict::NotLive => ExitCode::from(1),
        Verdict::Error => ExitCode::from(2),
    }
}
