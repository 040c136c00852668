// deepscan/src/scorers.rs
//
// Opaque model seams. Each detector delegates its numeric judgement to one of
// these traits; the detectors own sampling, decoding and calibration.
//
//   ImageScorer  frame / clip        → logit  (positive = manipulated)
//   SyncScorer   mouth crops + MFCC  → logit  (positive = in sync)
//   PulseScorer  filtered rPPG trace → probability a pulse is present
//
// Implementations are immutable after construction and shared across requests
// behind an Arc. The baselines below are signal heuristics so the binary runs
// without external weights; trained models plug in through the same traits.

use anyhow::{bail, Result};

use crate::media::frames::{self, Frame};
use crate::signal::{pearson, Mfcc};

pub trait ImageScorer: Send + Sync {
    fn score_image(&self, image: &Frame) -> Result<f64>;
    fn score_clip(&self, clip: &[Frame]) -> Result<f64>;
}

pub trait SyncScorer: Send + Sync {
    /// `mfcc` is already aligned to `mouths.len()` frames.
    fn score(&self, mouths: &[Frame], mfcc: &Mfcc) -> Result<f64>;
}

pub trait PulseScorer: Send + Sync {
    fn score(&self, signal: &[f64]) -> Result<f64>;
}

// ── Baseline vision scorer ────────────────────────────────────────────────────

/// Flags frames that are smoother than natural camera footage (relative
/// Laplacian energy below `sharpness_ref`) and clips whose global brightness
/// flickers between frames.
#[derive(Debug, Clone)]
pub struct ArtifactImageScorer {
    pub sharpness_ref: f64,
    pub sharpness_gain: f64,
    /// Logit added per grey level of mean frame-to-frame luma change.
    pub flicker_gain: f64,
}

impl Default for ArtifactImageScorer {
    fn default() -> Self {
        Self { sharpness_ref: 0.25, sharpness_gain: 6.0, flicker_gain: 0.15 }
    }
}

impl ArtifactImageScorer {
    fn smoothness_logit(&self, image: &Frame) -> f64 {
        self.sharpness_gain * (self.sharpness_ref - relative_sharpness(image))
    }
}

impl ImageScorer for ArtifactImageScorer {
    fn score_image(&self, image: &Frame) -> Result<f64> {
        if image.width() < 3 || image.height() < 3 {
            bail!("image too small to score: {}x{}", image.width(), image.height());
        }
        Ok(self.smoothness_logit(image))
    }

    fn score_clip(&self, clip: &[Frame]) -> Result<f64> {
        if clip.is_empty() {
            bail!("empty clip");
        }
        let mut spatial = 0.0;
        for frame in clip {
            spatial += self.score_image(frame)?;
        }
        spatial /= clip.len() as f64;

        let lumas: Vec<f64> = clip.iter().map(frames::mean_luma).collect();
        let flicker = if lumas.len() < 2 {
            0.0
        } else {
            lumas.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>() / (lumas.len() - 1) as f64
        };
        Ok(spatial + self.flicker_gain * flicker)
    }
}

/// Mean absolute 4-neighbour Laplacian of luma, divided by the luma standard
/// deviation so global contrast does not dominate.
fn relative_sharpness(image: &Frame) -> f64 {
    let (w, h) = image.dimensions();
    let l = |x: u32, y: u32| frames::luma(image.get_pixel(x, y).0);

    let mut lap = 0.0;
    let mut n: f64 = 0.0;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let v = 4.0 * l(x, y) - l(x - 1, y) - l(x + 1, y) - l(x, y - 1) - l(x, y + 1);
            lap += v.abs();
            n += 1.0;
        }
    }
    let mean = frames::mean_luma(image);
    let var = image.pixels().map(|p| (frames::luma(p.0) - mean).powi(2)).sum::<f64>()
        / (w as f64 * h as f64);
    (lap / n.max(1.0)) / (var.sqrt() + 1.0)
}

// ── Baseline sync scorer ──────────────────────────────────────────────────────

/// Correlates mouth motion with changes in the audio energy envelope.
/// Speech moves the mouth when loudness changes; dubbed or generated audio
/// tends not to.
#[derive(Debug, Clone)]
pub struct EnvelopeSyncScorer {
    pub gain: f64,
}

impl Default for EnvelopeSyncScorer {
    fn default() -> Self {
        Self { gain: 4.0 }
    }
}

impl SyncScorer for EnvelopeSyncScorer {
    fn score(&self, mouths: &[Frame], mfcc: &Mfcc) -> Result<f64> {
        if mouths.len() < 3 {
            bail!("need at least 3 mouth crops, got {}", mouths.len());
        }
        if mfcc.n_frames() != mouths.len() {
            bail!("mfcc has {} frames for {} mouth crops", mfcc.n_frames(), mouths.len());
        }

        let motion: Vec<f64> = mouths.windows(2).map(|w| mean_abs_diff(&w[0], &w[1])).collect();
        let envelope = mfcc.energy_envelope();
        let loudness: Vec<f64> = envelope.windows(2).map(|w| (w[1] - w[0]).abs() as f64).collect();

        Ok(self.gain * pearson(&motion, &loudness))
    }
}

fn mean_abs_diff(a: &Frame, b: &Frame) -> f64 {
    let b = if a.dimensions() == b.dimensions() {
        std::borrow::Cow::Borrowed(b)
    } else {
        std::borrow::Cow::Owned(image::imageops::resize(
            b,
            a.width(),
            a.height(),
            image::imageops::FilterType::Triangle,
        ))
    };
    let n = (a.width() as f64 * a.height() as f64).max(1.0);
    a.pixels()
        .zip(b.pixels())
        .map(|(p, q)| (frames::luma(p.0) - frames::luma(q.0)).abs())
        .sum::<f64>()
        / n
}
