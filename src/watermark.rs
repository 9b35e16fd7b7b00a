//! Watermark protocol: deterministic time-keyed color token embedded in
//! every live frame, and the offline validator that checks a recorded
//! stream for it (spec §4.6).

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::WatermarkSecret;
use crate::frame::Frame;

type HmacSha256 = Hmac<Sha256>;

pub const SQUARE_SIZE: u32 = 40;
pub const INSET: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatermarkToken {
    pub timestamp_whole_seconds: i64,
    pub rgb: (u8, u8, u8),
}

/// Computes the token for a given integer Unix second. Deterministic and
/// byte-identical across runs and across embedder/validator for the same
/// `(secret, unix_second)` pair (spec invariant 6).
pub fn token_for_second(secret: &[u8], unix_second: i64) -> WatermarkToken {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(unix_second.to_string().as_bytes());
    let digest = mac.finalize().into_bytes();
    WatermarkToken {
        timestamp_whole_seconds: unix_second,
        rgb: (digest[0], digest[1], digest[2]),
    }
}

/// Embeds the time-keyed token into the outgoing frame's bottom-right
/// corner. Recomputes the token at most once per wall-second; within a
/// second the cached token is reused.
pub struct WatermarkEmbedder {
    secret: WatermarkSecret,
    cached: Option<WatermarkToken>,
    first_timestamp: Option<f64>,
}

impl WatermarkEmbedder {
    pub fn new(secret: WatermarkSecret) -> Self {
        Self { secret, cached: None, first_timestamp: None }
    }

    /// Paints the token for `⌊timestamp⌋` into `frame`'s color buffer,
    /// except during the first second after startup, when the token for
    /// the first observed timestamp may be emitted instead (spec §3
    /// invariant).
    pub fn embed(&mut self, frame: &mut Frame) -> WatermarkToken {
        let first = *self.first_timestamp.get_or_insert(frame.timestamp);
        let effective = if frame.timestamp - first < 1.0 { first } else { frame.timestamp };
        let second = effective.floor() as i64;

        let token = match self.cached {
            Some(t) if t.timestamp_whole_seconds == second => t,
            _ => {
                let t = token_for_second(self.secret.as_bytes(), second);
                self.cached = Some(t);
                t
            }
        };

        paint_square(frame, token.rgb);
        token
    }
}

fn paint_square(frame: &mut Frame, rgb: (u8, u8, u8)) {
    let width = frame.width;
    let height = frame.height;
    if width < SQUARE_SIZE + INSET || height < SQUARE_SIZE + INSET {
        return; // frame too small to hold the watermark; nothing to paint
    }
    let x0 = width - INSET - SQUARE_SIZE;
    let y0 = height - INSET - SQUARE_SIZE;
    let order = frame.order;
    let buf = frame.color_mut();
    for y in y0..y0 + SQUARE_SIZE {
        for x in x0..x0 + SQUARE_SIZE {
            let idx = ((y * width + x) * 3) as usize;
            let (a, b, c) = match order {
                crate::frame::ChannelOrder::Rgb => (rgb.0, rgb.1, rgb.2),
                crate::frame::ChannelOrder::Bgr => (rgb.2, rgb.1, rgb.0),
            };
            buf[idx] = a;
            buf[idx + 1] = b;
            buf[idx + 2] = c;
        }
    }
}

/// Averages the 40x40 inset region of a frame's color buffer, the way the
/// offline validator reads back an observed token (compression noise is
/// defeated by averaging rather than sampling one pixel).
pub fn observed_color(color: &[u8], width: u32, height: u32, order: crate::frame::ChannelOrder) -> Option<(f64, f64, f64)> {
    if width < SQUARE_SIZE + INSET || height < SQUARE_SIZE + INSET {
        return None;
    }
    let x0 = width - INSET - SQUARE_SIZE;
    let y0 = height - INSET - SQUARE_SIZE;
    let mut sum_a = 0u64;
    let mut sum_b = 0u64;
    let mut sum_c = 0u64;
    let mut n = 0u64;
    for y in y0..y0 + SQUARE_SIZE {
        for x in x0..x0 + SQUARE_SIZE {
            let idx = ((y * width + x) * 3) as usize;
            sum_a += color[idx] as u64;
            sum_b += color[idx + 1] as u64;
            sum_c += color[idx + 2] as u64;
            n += 1;
        }
    }
    let (sum_r, _sum_g, sum_b_ch) = match order {
        crate::frame::ChannelOrder::Rgb => (sum_a, sum_b, sum_c),
        crate::frame::ChannelOrder::Bgr => (sum_c, sum_b, sum_a),
    };
    Some((sum_r as f64 / n as f64, sum_b as f64 / n as f64, sum_b_ch as f64 / n as f64))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Live,
    NotLive,
    Error,
}

#[derive(Clone, Debug)]
pub struct FrameResult {
    pub frame_index: usize,
    pub expected: WatermarkToken,
    pub observed: (f64, f64, f64),
    pub distance: f64,
    pub matched: bool,
}

#[derive(Clone, Debug)]
pub struct ValidationReport {
    pub verdict: Verdict,
    pub match_rate: f64,
    pub per_frame: Vec<FrameResult>,
    pub reason: Option<String>,
}

/// Offline validator: given recorded frames and the shared secret, decides
/// live vs. not-live with tolerance (spec §4.6).
pub struct OfflineValidator {
    secret: WatermarkSecret,
}

impl OfflineValidator {
    pub fn new(secret: WatermarkSecret) -> Self {
        Self { secret }
    }

    /// `frames` are `(color_buffer, width, height, order)` tuples in replay
    /// order. `clock` maps a frame index to the Unix second used to compute
    /// its expected token — the validator never assumes a wall clock or a
    /// particular timestamp source itself (spec §9 open question: the
    /// clock is an explicit input).
    pub fn verify(
        &self,
        frames: &[(&[u8], u32, u32, crate::frame::ChannelOrder)],
        clock: impl Fn(usize) -> i64,
        live_threshold: f64,
        color_match_distance: f64,
    ) -> ValidationReport {
        if frames.is_empty() {
            return ValidationReport {
                verdict: Verdict::Error,
                match_rate: 0.0,
                per_frame: Vec::new(),
                reason: Some("no frames to validate".to_string()),
            };
        }

        let mut per_frame = Vec::with_capacity(frames.len());
        let mut matches = 0usize;
        for (i, &(color, width, height, order)) in frames.iter().enumerate() {
            let second = clock(i);
            let expected = token_for_second(self.secret.as_bytes(), second);
            let observed = match observed_color(color, width, height, order) {
                Some(c) => c,
                None => {
                    return ValidationReport {
                        verdict: Verdict::Error,
                        match_rate: 0.0,
                        per_frame,
                        reason: Some(format!("frame {} too small for watermark region", i)),
                    };
                }
            };
            let dr = observed.0 - expected.rgb.0 as f64;
            let dg = observed.1 - expected.rgb.1 as f64;
            let db = observed.2 - expected.rgb.2 as f64;
            let distance = (dr * dr + dg * dg + db * db).sqrt();
            let matched = distance < color_match_distance;
            if matched {
                matches += 1;
            }
            per_frame.push(FrameResult { frame_index: i, expected, observed, distance, matched });
        }

        let match_rate = matches as f64 / frames.len() as f64;
        let verdict = if match_rate >= live_threshold { Verdict::Live } else { Verdict::NotLive };
        ValidationReport { verdict, match_rate, per_frame, reason: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ChannelOrder;

    fn secret() -> WatermarkSecret {
        WatermarkSecret::new("0123456789abcdef").unwrap()
    }

    #[test]
    fn token_is_deterministic() {
        let a = token_for_second(secret().as_bytes(), 1000);
        let b = token_for_second(secret().as_bytes(), 1000);
        assert_eq!(a, b);
    }

    #[test]
    fn different_seconds_yield_different_tokens_with_overwhelming_probability() {
        let a = token_for_second(secret().as_bytes(), 1000);
        let b = token_for_second(secret().as_bytes(), 1001);
        assert_ne!(a.rgb, b.rgb);
    }

    #[test]
    fn embed_and_validate_round_trip_is_lossless_live() {
        let mut frame = Frame::new(1000.5, 64, 64, ChannelOrder::Rgb, vec![0u8; 64 * 64 * 3]).unwrap();
        let mut embedder = WatermarkEmbedder::new(secret());
        let token = embedder.embed(&mut frame);
        assert_eq!(token.timestamp_whole_seconds, 1000);

        let validator = OfflineValidator::new(secret());
        let frames = [(frame.color(), frame.width, frame.height, frame.order)];
        let report = validator.verify(&frames, |_| 1000, 0.70, 24.0);
        assert_eq!(report.verdict, Verdict::Live);
        assert_eq!(report.match_rate, 1.0);
        assert_eq!(report.per_frame[0].distance, 0.0);
    }

    #[test]
    fn wrong_clock_fails_validation() {
        let mut frame = Frame::new(1000.5, 64, 64, ChannelOrder::Rgb, vec![0u8; 64 * 64 * 3]).unwrap();
        let mut embedder = WatermarkEmbedder::new(secret());
        embedder.embed(&mut frame);

        let validator = OfflineValidator::new(secret());
        let frames = [(frame.color(), frame.width, frame.height, frame.order)];
        // Overriding "now" far away from the recording's own timestamp.
        let report = validator.verify(&frames, |_| 1000 + 3600, 0.70, 24.0);
        assert_eq!(report.verdict, Verdict::NotLive);
        assert_eq!(report.match_rate, 0.0);
    }

    #[test]
    fn too_small_frame_returns_error_verdict() {
        let validator = OfflineValidator::new(secret());
        let buf = vec![0u8; 10 * 10 * 3];
        let frames = [(buf.as_slice(), 10, 10, ChannelOrder::Rgb)];
        let report = validator.verify(&frames, |_| 0, 0.70, 24.0);
        assert_eq!(report.verdict, Verdict::Error);
    }

    #[test]
    fn first_second_after_startup_may_reuse_first_timestamp() {
        let mut embedder = WatermarkEmbedder::new(secret());
        let mut frame_a = Frame::new(1000.9, 64, 64, ChannelOrder::Rgb, vec![0u8; 64 * 64 * 3]).unwrap();
        let token_a = embedder.embed(&mut frame_a);
        let mut frame_b = Frame::new(1001.3, 64, 64, ChannelOrder::Rgb, vec![0u8; 64 * 64 * 3]).unwrap();
        let token_b = embedder.embed(&mut frame_b);
        // Both within the first second after startup; both may carry the
        // first observed timestamp's token.
        assert_eq!(token_a.timestamp_whole_seconds, 1000);
        assert_eq!(token_b.timestamp_whole_seconds, 1000);
    }
}
