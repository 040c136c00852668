// deepscan/src/types.rs
//
// Shared domain types flowing through deepscan:
//   request → detector outcomes → evidence set → fusion result → response.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Modalities ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Vision,        // frame-level classifier
    LipSync,       // audio / mouth-motion consistency
    Physiological, // rPPG pulse signal
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Vision, Modality::LipSync, Modality::Physiological];

    /// Score reported when the detector could not produce one at all
    /// (timeout, panic, unsupported evidence).
    pub fn neutral_score(self) -> f64 {
        match self {
            Self::Vision | Self::LipSync => 0.5,
            Self::Physiological => 0.0,
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vision => write!(f, "vision"),
            Self::LipSync => write!(f, "lip_sync"),
            Self::Physiological => write!(f, "physiological"),
        }
    }
}

/// Categorical label of a single modality. The vocabulary differs per modality;
/// `Unknown` is the shared sentinel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Prediction {
    Real,
    Fake,
    Sync,
    Mismatch,
    PhysioPresent,
    Absent,
    Unknown,
}

impl std::fmt::Display for Prediction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Real => write!(f, "real"),
            Self::Fake => write!(f, "fake"),
            Self::Sync => write!(f, "sync"),
            Self::Mismatch => write!(f, "mismatch"),
            Self::PhysioPresent => write!(f, "physio_present"),
            Self::Absent => write!(f, "absent"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

// ── Detector output ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ModalityResult {
    pub prediction: Prediction,
    pub score: f64,
    /// Seconds spent inside the detector.
    pub processing_time: f64,
}

impl ModalityResult {
    pub fn new(prediction: Prediction, score: f64, elapsed: Duration) -> Self {
        Self { prediction, score, processing_time: elapsed.as_secs_f64() }
    }

    pub fn unknown(modality: Modality, elapsed: Duration) -> Self {
        Self::new(Prediction::Unknown, modality.neutral_score(), elapsed)
    }
}

/// Why a detector fell back to a sentinel result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DegradeReason {
    #[error("insufficient_frames: {usable} usable, {required} required")]
    InsufficientFrames { usable: usize, required: usize },
    #[error("insufficient_signal: {usable} face samples, {required} required")]
    InsufficientSignal { usable: usize, required: usize },
    #[error("no_audio_track")]
    NoAudio,
    #[error("unsupported_evidence")]
    UnsupportedEvidence,
    #[error("model_error: {0}")]
    Model(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("detector_panicked: {0}")]
    Panicked(String),
}

/// Detector outcome: either a genuine result or a sentinel plus the reason it
/// was substituted. Both carry a well-formed `ModalityResult`.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorOutcome {
    Ok(ModalityResult),
    Degraded(ModalityResult, DegradeReason),
}

impl DetectorOutcome {
    pub fn result(&self) -> &ModalityResult {
        match self {
            Self::Ok(r) | Self::Degraded(r, _) => r,
        }
    }

    pub fn reason(&self) -> Option<&DegradeReason> {
        match self {
            Self::Ok(_) => None,
            Self::Degraded(_, reason) => Some(reason),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(..))
    }
}

// ── Evidence set ──────────────────────────────────────────────────────────────

/// Modality → result. A modality that was not run is simply absent.
/// Ordered map so iteration (and therefore float summation) is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvidenceSet {
    results: BTreeMap<Modality, ModalityResult>,
    degraded: BTreeMap<Modality, DegradeReason>,
}

impl EvidenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, modality: Modality, result: ModalityResult) {
        self.degraded.remove(&modality);
        self.results.insert(modality, result);
    }

    pub fn record(&mut self, modality: Modality, outcome: DetectorOutcome) {
        match outcome {
            DetectorOutcome::Ok(result) => self.insert(modality, result),
            DetectorOutcome::Degraded(result, reason) => {
                self.results.insert(modality, result);
                self.degraded.insert(modality, reason);
            }
        }
    }

    pub fn with(mut self, modality: Modality, result: ModalityResult) -> Self {
        self.insert(modality, result);
        self
    }

    pub fn get(&self, modality: Modality) -> Option<&ModalityResult> {
        self.results.get(&modality)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Modality, &ModalityResult)> {
        self.results.iter().map(|(m, r)| (*m, r))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn degraded(&self) -> &BTreeMap<Modality, DegradeReason> {
        &self.degraded
    }

    /// Sum of detector processing times, in seconds.
    pub fn total_processing_time(&self) -> f64 {
        self.results.values().map(|r| r.processing_time).sum()
    }
}

// ── Fusion output ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Real,
    Fake,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Real => write!(f, "real"),
            Self::Fake => write!(f, "fake"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    WeightedEnsemble,
    SimpleAverage,
}

impl std::fmt::Display for FusionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WeightedEnsemble => write!(f, "weighted_ensemble"),
            Self::SimpleAverage => write!(f, "simple_average"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FusionResult {
    pub overall_score: f64,
    pub overall_prediction: Verdict,
    pub confidence: f64,
    /// Decision threshold the confidence resolved to.
    pub threshold: f64,
    pub fusion_method: FusionMethod,
    /// Weights actually applied to each present modality.
    pub modality_weights: BTreeMap<Modality, f64>,
    /// Raw score × nominal weight, per present modality.
    pub per_modality_contribution: BTreeMap<Modality, f64>,
}

// ── Requests / responses ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRequest {
    pub path: PathBuf,
    pub kind: MediaKind,
    #[serde(default)]
    pub explain: bool,
    /// Ground truth, only read by the eval mode.
    #[serde(default)]
    pub label: Option<Verdict>,
}

impl DetectionRequest {
    pub fn new(path: impl Into<PathBuf>, kind: MediaKind) -> Self {
        Self { path: path.into(), kind, explain: false, label: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResponse {
    pub request_id: String,
    pub overall_score: f64,
    pub overall_prediction: Verdict,
    pub confidence: f64,
    pub fusion_method: FusionMethod,
    pub vision_score: f64,
    pub vision_prediction: Prediction,
    pub audio_sync_score: Option<f64>,
    pub physiological_score: Option<f64>,
    pub explanation: Option<String>,
    pub heatmap_url: Option<String>,
    pub processing_time: f64,
    pub model_version: String,
    pub file_type: MediaKind,
    pub media_sha256: String,
    pub degraded: BTreeMap<Modality, String>,
    pub fusion: FusionResult,
    pub timestamp: DateTime<Utc>,
}
