// deepscan/src/detectors/physiological.rs
//
// Physiological detector: remote photoplethysmography.
//
// A living face shows a faint periodic colour change at the heart rate.
// We sample frames with stride max(1, n / max_samples), take the mean colour
// of the forehead patch of each located face, band-pass the trace to the
// plausible pulse range (0.75–2.5 Hz ≈ 45–150 bpm) and measure what is left.
//
// Calibration: raw band power p is mapped to p / (p + presence_power), so the
// score is in [0, 1) and equals 0.5 exactly at the presence threshold. An
// optional `PulseScorer` replaces that mapping with its own probability.
// score > 0.5 ⇒ physio_present.
//
// Fewer than `required_signals` face samples ⇒ unknown @ 0.0.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use super::{Detector, Evidence};
use crate::config::PhysioSettings;
use crate::media::frames::{self, FaceLocator};
use crate::scorers::PulseScorer;
use crate::signal::{variance, BandPass};
use crate::types::{DegradeReason, DetectorOutcome, Modality, ModalityResult, Prediction};

pub struct PhysiologicalDetector {
    locator: Arc<dyn FaceLocator>,
    pulse: Option<Arc<dyn PulseScorer>>,
    settings: PhysioSettings,
}

impl PhysiologicalDetector {
    pub fn new(locator: Arc<dyn FaceLocator>, settings: PhysioSettings) -> Self {
        Self { locator, pulse: None, settings }
    }

    pub fn with_pulse_scorer(mut self, scorer: Arc<dyn PulseScorer>) -> Self {
        self.pulse = Some(scorer);
        self
    }

    /// Forehead intensity per sampled frame that has a face.
    fn trace(&self, paths: &[PathBuf]) -> Vec<f64> {
        let stride = (paths.len() / self.settings.max_samples.max(1)).max(1);
        paths
            .iter()
            .step_by(stride)
            .filter_map(|p| {
                let frame = frames::load_frame(p)
                    .map_err(|e| debug!("skipping frame: {}", e))
                    .ok()?;
                let face = self.locator.locate(&frame)?;
                let [r, g, b] = frames::channel_means(&frame, face.forehead())?;
                Some((r + g + b) / 3.0)
            })
            .collect()
    }

    /// Calibrated band power in [0, 1).
    pub fn calibrate(&self, power: f64) -> f64 {
        let p = power.max(0.0);
        p / (p + self.settings.presence_power)
    }

    fn score(&self, filtered: &[f64]) -> f64 {
        let power = variance(filtered);
        let calibrated = self.calibrate(power);
        let Some(pulse) = &self.pulse else {
            return calibrated;
        };
        match pulse.score(filtered) {
            Ok(p) if p.is_finite() => p.clamp(0.0, 1.0),
            Ok(p) => {
                warn!("pulse scorer returned {}; using band power", p);
                calibrated
            }
            Err(e) => {
                warn!("pulse scorer failed ({:#}); using band power", e);
                calibrated
            }
        }
    }
}

impl Detector for PhysiologicalDetector {
    fn modality(&self) -> Modality {
        Modality::Physiological
    }

    fn detect(&self, evidence: &Evidence) -> DetectorOutcome {
        let started = Instant::now();
        let paths = match evidence {
            Evidence::Video { frames, .. } => frames,
            Evidence::Image(_) => {
                return DetectorOutcome::Degraded(
                    ModalityResult::unknown(Modality::Physiological, started.elapsed()),
                    DegradeReason::UnsupportedEvidence,
                )
            }
        };

        let trace = self.trace(paths);
        if trace.len() < self.settings.required_signals {
            return DetectorOutcome::Degraded(
                ModalityResult::unknown(Modality::Physiological, started.elapsed()),
                DegradeReason::InsufficientSignal { usable: trace.len(), required: self.settings.required_signals },
            );
        }

        let band = BandPass::new(self.settings.sample_rate, self.settings.band_low_hz, self.settings.band_high_hz);
        let filtered = band.apply(&trace);
        let score = self.score(&filtered);
        debug!("rppg samples={} score={:.4}", trace.len(), score);

        let prediction = if score > 0.5 { Prediction::PhysioPresent } else { Prediction::Absent };
        DetectorOutcome::Ok(ModalityResult::new(prediction, score, started.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::frames::CentralFaceLocator;
    use image::{Rgb, RgbImage};
    use std::f64::consts::PI;
    use std::path::Path;

    fn detector() -> PhysiologicalDetector {
        PhysiologicalDetector::new(Arc::new(CentralFaceLocator::default()), PhysioSettings::default())
    }

    /// `n` textured frames whose brightness oscillates at `freq_hz` (30 fps).
    fn write_frames(dir: &Path, n: usize, freq_hz: f64, amplitude: f64) -> Vec<PathBuf> {
        (0..n)
            .map(|i| {
                let offset = amplitude * (2.0 * PI * freq_hz * i as f64 / 30.0).sin();
                let p = dir.join(format!("frame_{:05}.png", i + 1));
                RgbImage::from_fn(64, 64, |x, y| {
                    let base = 100.0 + ((x + y) % 40) as f64 + offset;
                    Rgb([base as u8, (base - 20.0) as u8, (base - 40.0) as u8])
                })
                .save(&p)
                .unwrap();
                p
            })
            .collect()
    }

    #[test]
    fn test_pulsing_face_is_present() {
        let dir = tempfile::tempdir().unwrap();
        let frames = write_frames(dir.path(), 60, 1.2, 10.0);

        let out = detector().detect(&Evidence::Video { frames, audio: None });
        assert!(!out.is_degraded());
        assert_eq!(out.result().prediction, Prediction::PhysioPresent);
        assert!(out.result().score > 0.5 && out.result().score < 1.0);
    }

    #[test]
    fn test_static_face_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let frames = write_frames(dir.path(), 60, 1.2, 0.0);

        let out = detector().detect(&Evidence::Video { frames, audio: None });
        assert_eq!(out.result().prediction, Prediction::Absent);
        assert!(out.result().score < 0.5);
    }

    #[test]
    fn test_no_face_is_unknown_zero() {
        let dir = tempfile::tempdir().unwrap();
        let frames: Vec<PathBuf> = (0..10)
            .map(|i| {
                let p = dir.path().join(format!("frame_{i:05}.png"));
                RgbImage::from_pixel(64, 64, Rgb([128, 128, 128])).save(&p).unwrap();
                p
            })
            .collect();

        let out = detector().detect(&Evidence::Video { frames, audio: None });
        assert_eq!(out.result().prediction, Prediction::Unknown);
        assert_eq!(out.result().score, 0.0);
        assert_eq!(out.reason(), Some(&DegradeReason::InsufficientSignal { usable: 0, required: 5 }));
    }

    #[test]
    fn test_calibration_midpoint() {
        let d = detector();
        assert_eq!(d.calibrate(0.5), 0.5);
        assert_eq!(d.calibrate(0.0), 0.0);
        assert!(d.calibrate(1e9) < 1.0);
    }

    struct Fixed(f64);

    impl PulseScorer for Fixed {
        fn score(&self, _: &[f64]) -> anyhow::Result<f64> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_pulse_scorer_replaces_band_power() {
        let dir = tempfile::tempdir().unwrap();
        let frames = write_frames(dir.path(), 20, 1.2, 0.0);

        let out = detector()
            .with_pulse_scorer(Arc::new(Fixed(0.9)))
            .detect(&Evidence::Video { frames: frames.clone(), audio: None });
        assert_eq!(out.result().score, 0.9);
        assert_eq!(out.result().prediction, Prediction::PhysioPresent);

        let out = detector()
            .with_pulse_scorer(Arc::new(Fixed(f64::NAN)))
            .detect(&Evidence::Video { frames, audio: None });
        assert!(out.result().score < 0.5);
    }
}
