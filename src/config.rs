//! Runtime configuration: enable flags, thresholds, and the watermark secret.
//!
//! Follows the two-layer shape used throughout this codebase: an
//! all-`Option` `*ConfigFile` deserialized from TOML, resolved into a
//! fully-populated runtime struct with defaults filled in. CLI flags
//! (`src/bin/*.rs`) layer on top via `clap`.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_SECRET: &str = "tamper-witness-default-secret-key";

const DEFAULT_BLUR_THRESHOLD: f32 = 70.0;
const DEFAULT_SHAKE_THRESHOLD: f32 = 6.0;
const DEFAULT_REPOSITION_THRESHOLD: f32 = 10.0;
const DEFAULT_FAST_REPOSITION_THRESHOLD: f32 = 20.0;
const DEFAULT_DIRECTION_CONSISTENCY: f32 = 0.4;
const DEFAULT_LIVENESS_THRESHOLD: f32 = 2.0;
const DEFAULT_LIVENESS_CHECK_INTERVAL: f64 = 3.0;
const DEFAULT_LIVENESS_ACTIVATION_TIME: f64 = 10.0;
const DEFAULT_BLACKOUT_BRIGHTNESS_THRESHOLD: f32 = 25.0;
const DEFAULT_MAJOR_TAMPER_DIFF_THRESHOLD: f32 = 40.0;
const DEFAULT_LIVE_THRESHOLD: f64 = 0.70;
const DEFAULT_COLOR_MATCH_DISTANCE: f64 = 24.0;
const DEFAULT_BLUR_FIX_STRENGTH: f32 = 1.5;
const DEFAULT_GLARE_RESCUE_STRENGTH: f32 = 1.0;
const DEFAULT_GLARE_CLAHE_CLIP_LIMIT: f32 = 16.0;
const DEFAULT_GLARE_CLAHE_TILES: u32 = 4;
const DEFAULT_BLUR_SUSTAIN_SECS: f64 = 2.0;
const DEFAULT_FAST_REPOSITION_SUSTAIN_SECS: f64 = 1.0;
const DEFAULT_COOLING_WINDOW_SECS: f64 = 5.0;
const DEFAULT_REPOSITION_IDLE_RESET_SECS: f64 = 10.0;
const DEFAULT_MAX_RETAINED_INCIDENTS: usize = 5;

#[derive(Debug, Deserialize, Default)]
struct ThresholdsConfigFile {
    blur_threshold: Option<f32>,
    shake_threshold: Option<f32>,
    reposition_threshold: Option<f32>,
    fast_reposition_threshold: Option<f32>,
    direction_consistency: Option<f32>,
    liveness_threshold: Option<f32>,
    liveness_check_interval: Option<f64>,
    liveness_activation_time: Option<f64>,
    blackout_brightness_threshold: Option<f32>,
    major_tamper_diff_threshold: Option<f32>,
    live_threshold: Option<f64>,
    color_match_distance: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct EnableConfigFile {
    blur: Option<bool>,
    shake: Option<bool>,
    glare: Option<bool>,
    liveness: Option<bool>,
    reposition: Option<bool>,
    blur_fix: Option<bool>,
    glare_rescue: Option<bool>,
    audio_alerts: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct WatermarkConfigFile {
    secret: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PipelineConfigFile {
    db_path: Option<String>,
    thresholds: Option<ThresholdsConfigFile>,
    enable: Option<EnableConfigFile>,
    watermark: Option<WatermarkConfigFile>,
    glare_rescue_mode: Option<String>,
}

impl PipelineConfigFile {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| anyhow!("invalid config: {}", e))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read config {}: {}", path.display(), e))?;
        Self::from_toml_str(&contents)
    }
}

/// Thresholds, enumerated in spec §6. Immutable once loaded into a
/// `PipelineConfig`; only the enable flags and rescue mode are mutable at
/// runtime (see `ConfigHandle`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub blur_threshold: f32,
    pub shake_threshold: f32,
    pub reposition_threshold: f32,
    pub fast_reposition_threshold: f32,
    pub direction_consistency: f32,
    pub liveness_threshold: f32,
    pub liveness_check_interval: f64,
    pub liveness_activation_time: f64,
    pub blackout_brightness_threshold: f32,
    pub major_tamper_diff_threshold: f32,
    pub live_threshold: f64,
    pub color_match_distance: f64,
    pub blur_fix_strength: f32,
    pub glare_rescue_strength: f32,
    pub glare_clahe_clip_limit: f32,
    pub glare_clahe_tiles: u32,
    pub blur_sustain_secs: f64,
    pub fast_reposition_sustain_secs: f64,
    pub cooling_window_secs: f64,
    pub reposition_idle_reset_secs: f64,
    pub max_retained_incidents: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            blur_threshold: DEFAULT_BLUR_THRESHOLD,
            shake_threshold: DEFAULT_SHAKE_THRESHOLD,
            reposition_threshold: DEFAULT_REPOSITION_THRESHOLD,
            fast_reposition_threshold: DEFAULT_FAST_REPOSITION_THRESHOLD,
            direction_consistency: DEFAULT_DIRECTION_CONSISTENCY,
            liveness_threshold: DEFAULT_LIVENESS_THRESHOLD,
            liveness_check_interval: DEFAULT_LIVENESS_CHECK_INTERVAL,
            liveness_activation_time: DEFAULT_LIVENESS_ACTIVATION_TIME,
            blackout_brightness_threshold: DEFAULT_BLACKOUT_BRIGHTNESS_THRESHOLD,
            major_tamper_diff_threshold: DEFAULT_MAJOR_TAMPER_DIFF_THRESHOLD,
            live_threshold: DEFAULT_LIVE_THRESHOLD,
            color_match_distance: DEFAULT_COLOR_MATCH_DISTANCE,
            blur_fix_strength: DEFAULT_BLUR_FIX_STRENGTH,
            glare_rescue_strength: DEFAULT_GLARE_RESCUE_STRENGTH,
            glare_clahe_clip_limit: DEFAULT_GLARE_CLAHE_CLIP_LIMIT,
            glare_clahe_tiles: DEFAULT_GLARE_CLAHE_TILES,
            blur_sustain_secs: DEFAULT_BLUR_SUSTAIN_SECS,
            fast_reposition_sustain_secs: DEFAULT_FAST_REPOSITION_SUSTAIN_SECS,
            cooling_window_secs: DEFAULT_COOLING_WINDOW_SECS,
            reposition_idle_reset_secs: DEFAULT_REPOSITION_IDLE_RESET_SECS,
            max_retained_incidents: DEFAULT_MAX_RETAINED_INCIDENTS,
        }
    }
}

/// Per-detector enable flags plus the glare rescue mode, per spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlareRescueMode {
    Clahe,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnableFlags {
    pub blur: bool,
    pub shake: bool,
    pub glare: bool,
    pub liveness: bool,
    pub reposition: bool,
    pub blur_fix: bool,
    pub glare_rescue: bool,
    pub audio_alerts: bool,
    pub glare_rescue_mode: GlareRescueMode,
}

impl Default for EnableFlags {
    fn default() -> Self {
        Self {
            blur: true,
            shake: true,
            glare: true,
            liveness: true,
            reposition: true,
            blur_fix: true,
            glare_rescue: true,
            audio_alerts: false,
            glare_rescue_mode: GlareRescueMode::Clahe,
        }
    }
}

/// A secret held for the lifetime of the process. Zeroized on drop so the
/// HMAC key does not linger in freed memory, matching how the teacher
/// handles `device_key_seed`.
#[derive(Clone, zeroize::Zeroize, zeroize::ZeroizeOnDrop)]
pub struct WatermarkSecret(Vec<u8>);

impl WatermarkSecret {
    pub fn new(secret: impl AsRef<str>) -> Result<Self> {
        let bytes = secret.as_ref().as_bytes().to_vec();
        if bytes.len() < 16 {
            return Err(anyhow!(
                "watermark secret must be at least 16 bytes, got {}",
                bytes.len()
            ));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for WatermarkSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WatermarkSecret").field(&"<redacted>").finish()
    }
}

/// Fully-resolved pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub db_path: String,
    pub thresholds: Thresholds,
    pub enable: EnableFlags,
    pub secret: WatermarkSecret,
}

impl PipelineConfig {
    /// Fatal on malformed input per spec §7 ("configuration error at load").
    pub fn from_file(file: PipelineConfigFile) -> Result<Self> {
        let thresholds = resolve_thresholds(file.thresholds.unwrap_or_default());
        let enable = resolve_enable(file.enable.unwrap_or_default(), file.glare_rescue_mode)?;
        let secret_str = file
            .watermark
            .and_then(|w| w.secret)
            .unwrap_or_else(|| DEFAULT_SECRET.to_string());
        let secret = WatermarkSecret::new(secret_str)?;
        let db_path = file.db_path.unwrap_or_else(|| "tamper_witness.db".to_string());
        Ok(Self {
            db_path,
            thresholds,
            enable,
            secret,
        })
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        Self::from_file(PipelineConfigFile::from_path(path)?)
    }

    pub fn default_config() -> Self {
        Self::from_file(PipelineConfigFile::default()).expect("defaults are always valid")
    }
}

fn resolve_thresholds(file: ThresholdsConfigFile) -> Thresholds {
    let d = Thresholds::default();
    Thresholds {
        blur_threshold: file.blur_threshold.unwrap_or(d.blur_threshold),
        shake_threshold: file.shake_threshold.unwrap_or(d.shake_threshold),
        reposition_threshold: file.reposition_threshold.unwrap_or(d.reposition_threshold),
        fast_reposition_threshold: file
            .fast_reposition_threshold
            .unwrap_or(d.fast_reposition_threshold),
        direction_consistency: file.direction_consistency.unwrap_or(d.direction_consistency),
        liveness_threshold: file.liveness_threshold.unwrap_or(d.liveness_threshold),
        liveness_check_interval: file
            .liveness_check_interval
            .unwrap_or(d.liveness_check_interval),
        liveness_activation_time: file
            .liveness_activation_time
            .unwrap_or(d.liveness_activation_time),
        blackout_brightness_threshold: file
            .blackout_brightness_threshold
            .unwrap_or(d.blackout_brightness_threshold),
        major_tamper_diff_threshold: file
            .major_tamper_diff_threshold
            .unwrap_or(d.major_tamper_diff_threshold),
        live_threshold: file.live_threshold.unwrap_or(d.live_threshold),
        color_match_distance: file.color_match_distance.unwrap_or(d.color_match_distance),
        ..d
    }
}

fn resolve_enable(file: EnableConfigFile, rescue_mode: Option<String>) -> Result<EnableFlags> {
    let d = EnableFlags::default();
    let glare_rescue_mode = match rescue_mode.as_deref() {
        None => d.glare_rescue_mode,
        Some("CLAHE") | Some("clahe") => GlareRescueMode::Clahe,
        Some(other) => return Err(anyhow!("unknown glare_rescue_mode: {}", other)),
    };
    Ok(EnableFlags {
        blur: file.blur.unwrap_or(d.blur),
        shake: file.shake.unwrap_or(d.shake),
        glare: file.glare.unwrap_or(d.glare),
        liveness: file.liveness.unwrap_or(d.liveness),
        reposition: file.reposition.unwrap_or(d.reposition),
        blur_fix: file.blur_fix.unwrap_or(d.blur_fix),
        glare_rescue: file.glare_rescue.unwrap_or(d.glare_rescue),
        audio_alerts: file.audio_alerts.unwrap_or(d.audio_alerts),
        glare_rescue_mode,
    })
}

/// Single-writer shared configuration snapshot, per spec §5/§9: the pipeline
/// thread reads a cheap copy-on-read snapshot at the top of every frame; the
/// control surface (`api::configure_sensors`) publishes updates under one
/// writer lock.
pub struct ConfigHandle {
    inner: std::sync::RwLock<PipelineConfig>,
}

impl ConfigHandle {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            inner: std::sync::RwLock::new(config),
        }
    }

    pub fn snapshot(&self) -> PipelineConfig {
        self.inner.read().expect("config lock poisoned").clone()
    }

    /// Updates enable flags and rescue mode only; thresholds and the secret
    /// are immutable after load per spec §3.
    pub fn update_enable_flags(&self, enable: EnableFlags) {
        let mut guard = self.inner.write().expect("config lock poisoned");
        guard.enable = enable;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let t = Thresholds::default();
        assert_eq!(t.blur_threshold, 70.0);
        assert_eq!(t.shake_threshold, 6.0);
        assert_eq!(t.reposition_threshold, 10.0);
        assert_eq!(t.fast_reposition_threshold, 20.0);
        assert_eq!(t.direction_consistency, 0.4);
        assert_eq!(t.liveness_threshold, 2.0);
        assert_eq!(t.liveness_check_interval, 3.0);
        assert_eq!(t.liveness_activation_time, 10.0);
        assert_eq!(t.blackout_brightness_threshold, 25.0);
        assert_eq!(t.live_threshold, 0.70);
        assert_eq!(t.color_match_distance, 24.0);
    }

    #[test]
    fn short_secret_is_rejected() {
        assert!(WatermarkSecret::new("short").is_err());
    }

    #[test]
    fn parses_toml_overrides() {
        let toml = r#"
            [thresholds]
            blur_threshold = 50.0

            [enable]
            glare = false
        "#;
        let file = PipelineConfigFile::from_toml_str(toml).unwrap();
        let cfg = PipelineConfig::from_file(file).unwrap();
        assert_eq!(cfg.thresholds.blur_threshold, 50.0);
        assert!(!cfg.enable.glare);
        assert!(cfg.enable.blur); // untouched fields keep defaults
    }

    #[test]
    fn rejects_unknown_rescue_mode() {
        let toml = "glare_rescue_mode = \"bogus\"";
        let file = PipelineConfigFile::from_toml_str(toml).unwrap();
        assert!(PipelineConfig::from_file(file).is_err());
    }

    #[test]
    fn config_handle_snapshot_is_independent_copy() {
        let handle = ConfigHandle::new(PipelineConfig::default_config());
        let mut flags = handle.snapshot().enable;
        flags.blur = false;
        handle.update_enable_flags(flags);
        assert!(!handle.snapshot().enable.blur);
        assert!(handle.snapshot().enable.shake);
    }
}
