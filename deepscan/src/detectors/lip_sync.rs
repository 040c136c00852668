// deepscan/src/detectors/lip_sync.rs
//
// Lip-sync detector: audio ↔ mouth-motion consistency.
//
//   frames < required            → mismatch @ 0.3   (degraded, insufficient_frames)
//   no audio track               → unknown  @ 0.5   (degraded)
//   decode / feature / model err → unknown  @ 0.5   (degraded)
//   otherwise sigmoid(logit); score > 0.5 ⇒ sync
//
// The MFCC time axis is aligned to the sampled frame count by truncation or
// cyclic repetition before scoring.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::debug;

use super::{Detector, Evidence};
use crate::config::LipSyncSettings;
use crate::media::audio::load_wav_mono;
use crate::media::frames::{self, FaceLocator, Frame};
use crate::scorers::SyncScorer;
use crate::signal::{mfcc, sigmoid, MfccConfig};
use crate::types::{DegradeReason, DetectorOutcome, Modality, ModalityResult, Prediction};

/// Score reported when there are too few frames to judge sync.
const INSUFFICIENT_FRAMES_SCORE: f64 = 0.3;

pub struct LipSyncDetector {
    scorer: Arc<dyn SyncScorer>,
    locator: Arc<dyn FaceLocator>,
    settings: LipSyncSettings,
    target_size: u32,
}

enum Failure {
    TooFewFrames(usize),
    Other(anyhow::Error),
}

impl From<anyhow::Error> for Failure {
    fn from(e: anyhow::Error) -> Self {
        Failure::Other(e)
    }
}

impl LipSyncDetector {
    pub fn new(
        scorer: Arc<dyn SyncScorer>,
        locator: Arc<dyn FaceLocator>,
        settings: LipSyncSettings,
        target_size: u32,
    ) -> Self {
        Self { scorer, locator, settings, target_size }
    }

    fn mfcc_config(&self) -> MfccConfig {
        MfccConfig {
            n_mfcc: self.settings.n_mfcc,
            n_fft: self.settings.n_fft,
            hop_length: self.settings.hop_length,
            n_mels: self.settings.n_mels,
        }
    }

    /// Mouth crops of `required_frames` uniformly sampled frames. Frames that
    /// fail to decode are skipped.
    fn mouths(&self, paths: &[PathBuf]) -> Vec<Frame> {
        frames::sample_indices(paths.len(), self.settings.required_frames)
            .into_iter()
            .filter_map(|i| match frames::load_frame(&paths[i]) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    debug!("skipping frame: {}", e);
                    None
                }
            })
            .map(|frame| {
                let region = match self.locator.locate(&frame) {
                    Some(face) => face.mouth(),
                    None => frames::FaceRegion { x: 0, y: 0, width: frame.width(), height: frame.height() }.mouth(),
                };
                frames::resize_square(&frames::crop(&frame, region), self.target_size)
            })
            .collect()
    }

    fn probability(&self, paths: &[PathBuf], audio: &Path) -> Result<f64, Failure> {
        let mouths = self.mouths(paths);
        if mouths.len() < self.settings.required_frames {
            return Err(Failure::TooFewFrames(mouths.len()));
        }

        let track = load_wav_mono(audio).map_err(anyhow::Error::from)?;
        let features = mfcc(&track.samples, track.sample_rate, &self.mfcc_config()).aligned(mouths.len());
        let logit = self.scorer.score(&mouths, &features)?;
        if !logit.is_finite() {
            return Err(Failure::Other(anyhow::anyhow!("scorer returned non-finite logit {logit}")));
        }
        Ok(sigmoid(logit))
    }

    fn insufficient(&self, usable: usize, started: Instant) -> DetectorOutcome {
        DetectorOutcome::Degraded(
            ModalityResult::new(Prediction::Mismatch, INSUFFICIENT_FRAMES_SCORE, started.elapsed()),
            DegradeReason::InsufficientFrames { usable, required: self.settings.required_frames },
        )
    }
}

impl Detector for LipSyncDetector {
    fn modality(&self) -> Modality {
        Modality::LipSync
    }

    fn detect(&self, evidence: &Evidence) -> DetectorOutcome {
        let started = Instant::now();
        let unknown = |reason| {
            DetectorOutcome::Degraded(ModalityResult::unknown(Modality::LipSync, started.elapsed()), reason)
        };

        let (paths, audio) = match evidence {
            Evidence::Video { frames, audio } => (frames, audio),
            Evidence::Image(_) => return unknown(DegradeReason::UnsupportedEvidence),
        };
        if paths.len() < self.settings.required_frames {
            return self.insufficient(paths.len(), started);
        }
        let Some(audio) = audio else {
            return unknown(DegradeReason::NoAudio);
        };

        match self.probability(paths, audio) {
            Ok(p) => {
                let prediction = if p > 0.5 { Prediction::Sync } else { Prediction::Mismatch };
                DetectorOutcome::Ok(ModalityResult::new(prediction, p, started.elapsed()))
            }
            Err(Failure::TooFewFrames(usable)) => self.insufficient(usable, started),
            Err(Failure::Other(e)) => unknown(DegradeReason::Model(format!("{e:#}"))),
        }
    }
}
