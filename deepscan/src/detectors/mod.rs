// deepscan/src/detectors/mod.rs
//
// Modality detectors and their concurrent fan-out.
//
// A detector is synchronous CPU work over read-only evidence. `run_all`
// dispatches each one onto the blocking pool under its own deadline and joins
// all of them; a detector that panics or overruns is replaced by the
// modality's `unknown` sentinel, so the evidence set always has one entry per
// dispatched modality.

pub mod lip_sync;
pub mod physiological;
pub mod vision;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::config::Settings;
use crate::media::frames::{CentralFaceLocator, FaceLocator};
use crate::scorers::{ArtifactImageScorer, EnvelopeSyncScorer, ImageScorer, PulseScorer, SyncScorer};
use crate::types::{DegradeReason, DetectorOutcome, EvidenceSet, Modality, ModalityResult};

pub use lip_sync::LipSyncDetector;
pub use physiological::PhysiologicalDetector;
pub use vision::VisionDetector;

/// What a request hands its detectors.
#[derive(Debug, Clone, PartialEq)]
pub enum Evidence {
    Image(PathBuf),
    Video { frames: Vec<PathBuf>, audio: Option<PathBuf> },
}

pub trait Detector: Send + Sync {
    fn modality(&self) -> Modality;

    /// Must not fail: internal errors map to `DetectorOutcome::Degraded`.
    fn detect(&self, evidence: &Evidence) -> DetectorOutcome;
}

#[derive(Clone)]
pub struct DetectorSet {
    pub vision: Arc<dyn Detector>,
    pub lip_sync: Arc<dyn Detector>,
    pub physiological: Arc<dyn Detector>,
}

/// Model handles shared by every request. Constructed once at startup.
#[derive(Clone)]
pub struct Models {
    pub image: Arc<dyn ImageScorer>,
    pub sync: Arc<dyn SyncScorer>,
    /// Replaces calibrated band power when present.
    pub pulse: Option<Arc<dyn PulseScorer>>,
    pub locator: Arc<dyn FaceLocator>,
}

impl Default for Models {
    fn default() -> Self {
        Self {
            image: Arc::new(ArtifactImageScorer::default()),
            sync: Arc::new(EnvelopeSyncScorer::default()),
            pulse: None,
            locator: Arc::new(CentralFaceLocator::default()),
        }
    }
}

impl DetectorSet {
    /// Built-in detectors over the baseline scorers, sharing one face locator.
    pub fn baseline(settings: &Settings) -> Self {
        Self::with_models(settings, Models::default())
    }

    pub fn with_models(settings: &Settings, models: Models) -> Self {
        let mut physiological = PhysiologicalDetector::new(Arc::clone(&models.locator), settings.physiological.clone());
        if let Some(pulse) = models.pulse {
            physiological = physiological.with_pulse_scorer(pulse);
        }
        Self {
            vision: Arc::new(VisionDetector::new(
                models.image,
                Arc::clone(&models.locator),
                settings.clip_length,
                settings.target_image_size,
            )),
            lip_sync: Arc::new(LipSyncDetector::new(
                models.sync,
                models.locator,
                settings.lip_sync.clone(),
                settings.target_image_size,
            )),
            physiological: Arc::new(physiological),
        }
    }

    /// Single-frame input: vision only.
    pub async fn run_image(&self, evidence: Arc<Evidence>, deadline: Duration) -> EvidenceSet {
        let outcome = run_one(Arc::clone(&self.vision), evidence, deadline).await;
        collect([(Modality::Vision, outcome)])
    }

    /// All three detectors concurrently; returns once every one has finished,
    /// failed or timed out.
    pub async fn run_all(&self, evidence: Arc<Evidence>, deadline: Duration) -> EvidenceSet {
        let (vision, lip_sync, physiological) = tokio::join!(
            run_one(Arc::clone(&self.vision), Arc::clone(&evidence), deadline),
            run_one(Arc::clone(&self.lip_sync), Arc::clone(&evidence), deadline),
            run_one(Arc::clone(&self.physiological), evidence, deadline),
        );

        collect([
            (Modality::Vision, vision),
            (Modality::LipSync, lip_sync),
            (Modality::Physiological, physiological),
        ])
    }
}

/// Run one detector on the blocking pool under `deadline`.
pub async fn run_one(detector: Arc<dyn Detector>, evidence: Arc<Evidence>, deadline: Duration) -> DetectorOutcome {
    let modality = detector.modality();
    let started  = Instant::now();
    let task     = tokio::task::spawn_blocking(move || detector.detect(&evidence));

    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join)) => {
            let message = if join.is_panic() {
                panic_message(join.into_panic())
            } else {
                "cancelled".to_string()
            };
            DetectorOutcome::Degraded(
                ModalityResult::unknown(modality, started.elapsed()),
                DegradeReason::Panicked(message),
            )
        }
        // The blocking thread keeps running to completion; its result is dropped.
        Err(_) => DetectorOutcome::Degraded(
            ModalityResult::unknown(modality, started.elapsed()),
            DegradeReason::Timeout(deadline),
        ),
    }
}

fn collect(outcomes: impl IntoIterator<Item = (Modality, DetectorOutcome)>) -> EvidenceSet {
    let mut set = EvidenceSet::new();
    for (modality, outcome) in outcomes {
        if let Some(reason) = outcome.reason() {
            warn!("detector degraded modality={} reason={}", modality, reason);
        }
        set.record(modality, outcome);
    }
    set
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
