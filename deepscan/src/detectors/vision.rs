// deepscan/src/detectors/vision.rs
//
// Vision detector: frame-level manipulation classifier.
//
// Image → largest face crop (whole frame when none is found) → square resize
//       → scorer logit → sigmoid.
// Video → `clip_length` frames sampled uniformly across the whole video
//       → square resize → clip logit → sigmoid.
// prob > 0.5 ⇒ fake. Any failure ⇒ unknown @ 0.5.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use tracing::debug;

use super::{Detector, Evidence};
use crate::media::frames::{self, FaceLocator, Frame};
use crate::scorers::ImageScorer;
use crate::signal::sigmoid;
use crate::types::{DegradeReason, DetectorOutcome, Modality, ModalityResult, Prediction};

pub struct VisionDetector {
    scorer: Arc<dyn ImageScorer>,
    locator: Arc<dyn FaceLocator>,
    clip_length: usize,
    target_size: u32,
}

impl VisionDetector {
    pub fn new(
        scorer: Arc<dyn ImageScorer>,
        locator: Arc<dyn FaceLocator>,
        clip_length: usize,
        target_size: u32,
    ) -> Self {
        Self { scorer, locator, clip_length, target_size }
    }

    fn probability_image(&self, path: &Path) -> Result<f64> {
        let frame = frames::load_frame(path)?;
        let face = match self.locator.locate(&frame) {
            Some(region) => frames::crop(&frame, region),
            None => {
                debug!("no face located in {}; scoring whole image", path.display());
                frame
            }
        };
        let logit = self.scorer.score_image(&frames::resize_square(&face, self.target_size))?;
        finite_probability(logit)
    }

    fn probability_clip(&self, paths: &[PathBuf]) -> Result<f64> {
        if paths.is_empty() {
            bail!("video has no frames");
        }
        let clip = frames::sample_indices(paths.len(), self.clip_length)
            .into_iter()
            .map(|i| frames::load_frame(&paths[i]).map(|f| frames::resize_square(&f, self.target_size)))
            .collect::<Result<Vec<Frame>, _>>()?;
        let logit = self.scorer.score_clip(&clip)?;
        finite_probability(logit)
    }
}

fn finite_probability(logit: f64) -> Result<f64> {
    if !logit.is_finite() {
        bail!("scorer returned non-finite logit {logit}");
    }
    Ok(sigmoid(logit))
}

impl Detector for VisionDetector {
    fn modality(&self) -> Modality {
        Modality::Vision
    }

    fn detect(&self, evidence: &Evidence) -> DetectorOutcome {
        let started = Instant::now();
        let probability = match evidence {
            Evidence::Image(path) => self.probability_image(path),
            Evidence::Video { frames, .. } => self.probability_clip(frames),
        };

        match probability {
            Ok(p) => {
                let prediction = if p > 0.5 { Prediction::Fake } else { Prediction::Real };
                DetectorOutcome::Ok(ModalityResult::new(prediction, p, started.elapsed()))
            }
            Err(e) => DetectorOutcome::Degraded(
                ModalityResult::unknown(Modality::Vision, started.elapsed()),
                DegradeReason::Model(format!("{e:#}")),
            ),
        }
    }
}
