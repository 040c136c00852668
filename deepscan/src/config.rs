// deepscan/src/config.rs
//
// Runtime settings. Loaded from an optional TOML file; every field has a
// default so an empty file (or no file) is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::fusion::FusionConfig;
use crate::types::MediaKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Upper bound on input size in bytes.
    pub max_file_size: u64,
    pub image_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
    /// Frames sampled uniformly for the vision clip model.
    pub clip_length: usize,
    /// Side of the square input the scorers receive.
    pub target_image_size: u32,
    pub detector_timeout_secs: u64,
    /// How long exit waits for blocking work left behind by timed-out detectors.
    pub shutdown_grace_secs: u64,
    pub model_version: String,
    /// Parent of per-request temp directories; system temp dir when unset.
    pub temp_root: Option<PathBuf>,
    pub extraction: ExtractionSettings,
    pub lip_sync: LipSyncSettings,
    pub physiological: PhysioSettings,
    pub fusion: FusionConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
            image_extensions: vec!["jpg".into(), "jpeg".into(), "png".into()],
            video_extensions: vec!["mp4".into(), "mov".into(), "avi".into()],
            clip_length: 16,
            target_image_size: 224,
            detector_timeout_secs: 120,
            shutdown_grace_secs: 2,
            model_version: "1.0.0".into(),
            temp_root: None,
            extraction: ExtractionSettings::default(),
            lip_sync: LipSyncSettings::default(),
            physiological: PhysioSettings::default(),
            fusion: FusionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub ffmpeg: PathBuf,
    /// Frames beyond this count are not decoded out of the container.
    pub max_frames: usize,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            max_frames: 900,
            audio_sample_rate: 44_100,
            audio_channels: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LipSyncSettings {
    pub required_frames: usize,
    pub n_mfcc: usize,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
}

impl Default for LipSyncSettings {
    fn default() -> Self {
        Self { required_frames: 5, n_mfcc: 13, n_fft: 512, hop_length: 160, n_mels: 40 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysioSettings {
    /// Frames sampled with stride `max(1, n / max_samples)`.
    pub max_samples: usize,
    pub sample_rate: f64,
    pub band_low_hz: f64,
    pub band_high_hz: f64,
    pub required_signals: usize,
    /// Band power at which the calibrated score reaches 0.5.
    pub presence_power: f64,
}

impl Default for PhysioSettings {
    fn default() -> Self {
        Self {
            max_samples: 30,
            sample_rate: 30.0,
            band_low_hz: 0.75,
            band_high_hz: 2.5,
            required_signals: 5,
            presence_power: 0.5,
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("reading config {}", p.display()))?;
                toml::from_str::<Settings>(&raw)
                    .with_context(|| format!("parsing config {}", p.display()))?
            }
            None => Settings::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.clip_length == 0 {
            bail!("clip_length must be at least 1");
        }
        if self.target_image_size == 0 {
            bail!("target_image_size must be at least 1");
        }
        if self.lip_sync.required_frames == 0 || self.lip_sync.n_mfcc == 0 {
            bail!("lip_sync.required_frames and lip_sync.n_mfcc must be at least 1");
        }
        if !self.lip_sync.n_fft.is_power_of_two() || self.lip_sync.hop_length == 0 {
            bail!("lip_sync.n_fft must be a power of two and hop_length non-zero");
        }
        let p = &self.physiological;
        if !(p.band_low_hz > 0.0 && p.band_low_hz < p.band_high_hz && p.band_high_hz < p.sample_rate / 2.0) {
            bail!(
                "physiological band {}–{} Hz invalid for sample rate {}",
                p.band_low_hz, p.band_high_hz, p.sample_rate
            );
        }
        if p.presence_power.is_nan() || p.presence_power <= 0.0 {
            bail!("physiological.presence_power must be positive");
        }
        self.fusion.validate()
    }

    pub fn detector_timeout(&self) -> Duration {
        Duration::from_secs(self.detector_timeout_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn extensions(&self, kind: MediaKind) -> &[String] {
        match kind {
            MediaKind::Image => &self.image_extensions,
            MediaKind::Video => &self.video_extensions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let s = Settings::default();
        assert!(s.validate().is_ok());
        assert_eq!(s.max_file_size, 52_428_800);
        assert_eq!(s.clip_length, 16);
        assert_eq!(s.lip_sync.required_frames, 5);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let s: Settings = toml::from_str(
            r#"
            max_file_size = 1024
            [physiological]
            presence_power = 2.0
            "#,
        )
        .unwrap();
        assert_eq!(s.max_file_size, 1024);
        assert_eq!(s.physiological.presence_power, 2.0);
        assert_eq!(s.physiological.max_samples, 30);
        assert_eq!(s.video_extensions.len(), 3);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_rejects_band_above_nyquist() {
        let mut s = Settings::default();
        s.physiological.band_high_hz = 20.0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_rejects_weights_not_summing_to_one() {
        let mut s = Settings::default();
        s.fusion.weights.vision = 0.9;
        assert!(s.validate().is_err());
    }
}
