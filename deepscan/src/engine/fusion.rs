// deepscan/src/engine/fusion.rs
//
// Reliability-weighted fusion of per-modality scores.
//
// Nominal weights (sum = 1.00):
//   Vision         0.40  calibrated frame / clip probability
//   LipSync        0.30  audio ↔ mouth consistency
//   Physiological  0.30  rPPG band power (calibrated to [0, 1))
//
// Adjustments before accumulation:
//   vision ×1.2 unless it reported `unknown`
//   physiological ×0.5 when it reported `unknown` (de-weighted, not dropped)
//   absent modalities contribute nothing; the sum is divided by the weight
//   actually accumulated, never by the nominal 1.0.
//
// Confidence = clamp(1 − var(scores), 0.3, 1.0), or 0.5 with fewer than two
// signals. The decision threshold rises as confidence falls, so uncertain
// inputs lean towards `real`.
//
// If the weighted path rejects its input (non-finite or out-of-range score,
// zero accumulated weight) the engine degrades to an unweighted mean with
// confidence pinned at 0.3. `fuse` itself never fails.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{EvidenceSet, FusionMethod, FusionResult, Modality, Prediction, Verdict};

/// Score reported when no modality is present.
const EMPTY_SCORE: f64 = 0.5;
/// Confidence with fewer than two present modalities.
const SINGLE_SIGNAL_CONFIDENCE: f64 = 0.5;
const MIN_CONFIDENCE: f64 = 0.3;
const MAX_CONFIDENCE: f64 = 1.0;
/// Confidence reported by the simple-average fallback.
const FALLBACK_CONFIDENCE: f64 = 0.3;
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModalityWeights {
    pub vision: f64,
    pub lip_sync: f64,
    pub physiological: f64,
}

impl Default for ModalityWeights {
    fn default() -> Self {
        Self { vision: 0.4, lip_sync: 0.3, physiological: 0.3 }
    }
}

impl ModalityWeights {
    pub fn get(&self, modality: Modality) -> f64 {
        match modality {
            Modality::Vision => self.vision,
            Modality::LipSync => self.lip_sync,
            Modality::Physiological => self.physiological,
        }
    }

    fn sum(&self) -> f64 {
        self.vision + self.lip_sync + self.physiological
    }
}

/// Confidence → decision threshold tiers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdTiers {
    pub high_confidence: f64,
    pub high_threshold: f64,
    pub mid_confidence: f64,
    pub mid_threshold: f64,
    pub low_threshold: f64,
}

impl Default for ThresholdTiers {
    fn default() -> Self {
        Self {
            high_confidence: 0.8,
            high_threshold: 0.5,
            mid_confidence: 0.6,
            mid_threshold: 0.55,
            low_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FusionConfig {
    pub weights: ModalityWeights,
    /// Multiplier on the vision weight whenever vision reported a label other than `unknown`.
    pub vision_trust_factor: f64,
    /// Multiplier on the physiological weight when it reported `unknown`.
    pub physio_unknown_factor: f64,
    pub thresholds: ThresholdTiers,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            weights: ModalityWeights::default(),
            vision_trust_factor: 1.2,
            physio_unknown_factor: 0.5,
            thresholds: ThresholdTiers::default(),
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let w = &self.weights;
        for (name, value) in [
            ("vision", w.vision),
            ("lip_sync", w.lip_sync),
            ("physiological", w.physiological),
            ("vision_trust_factor", self.vision_trust_factor),
            ("physio_unknown_factor", self.physio_unknown_factor),
        ] {
            if !value.is_finite() || value < 0.0 {
                anyhow::bail!("fusion.{name} must be finite and non-negative, got {value}");
            }
        }
        if (w.sum() - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            anyhow::bail!("fusion weights must sum to 1.0, got {:.6}", w.sum());
        }
        Ok(())
    }
}

// ── Errors (internal to the engine) ───────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("{0} score is not finite")]
    NonFiniteScore(Modality),
    #[error("{modality} score {score} outside [0, 1]")]
    ScoreOutOfRange { modality: Modality, score: f64 },
    #[error("no weight accumulated over {0} present modalities")]
    NoWeight(usize),
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Stateless apart from its configuration; share freely across requests.
#[derive(Debug, Clone, Default)]
pub struct FusionEngine {
    config: FusionConfig,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn fuse(&self, evidence: &EvidenceSet) -> FusionResult {
        match self.weighted(evidence) {
            Ok(result) => result,
            Err(e) => {
                warn!("weighted fusion rejected evidence ({}); using simple average", e);
                self.simple_average(evidence)
            }
        }
    }

    /// Weight applied to a present modality after reliability adjustment.
    pub fn adjusted_weight(&self, modality: Modality, prediction: Prediction) -> f64 {
        let base = self.config.weights.get(modality);
        match (modality, prediction) {
            (Modality::Vision, p) if p != Prediction::Unknown => base * self.config.vision_trust_factor,
            (Modality::Physiological, Prediction::Unknown) => base * self.config.physio_unknown_factor,
            _ => base,
        }
    }

    pub fn threshold(&self, confidence: f64) -> f64 {
        let t = &self.config.thresholds;
        if confidence > t.high_confidence {
            t.high_threshold
        } else if confidence > t.mid_confidence {
            t.mid_threshold
        } else {
            t.low_threshold
        }
    }

    fn weighted(&self, evidence: &EvidenceSet) -> Result<FusionResult, FusionError> {
        let mut weighted_sum = 0.0f64;
        let mut total_weight = 0.0f64;
        let mut applied      = BTreeMap::new();
        let mut scores       = Vec::with_capacity(evidence.len());

        for (modality, result) in evidence.iter() {
            check_score(modality, result.score)?;
            let weight = self.adjusted_weight(modality, result.prediction);
            weighted_sum += result.score * weight;
            total_weight += weight;
            applied.insert(modality, weight);
            scores.push(result.score);
        }

        let overall_score = if scores.is_empty() {
            EMPTY_SCORE
        } else if total_weight > 0.0 {
            weighted_sum / total_weight
        } else {
            return Err(FusionError::NoWeight(scores.len()));
        };

        let confidence = if scores.len() < 2 {
            SINGLE_SIGNAL_CONFIDENCE
        } else {
            (1.0 - variance(&scores)).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
        };

        let threshold = self.threshold(confidence);
        debug!(
            "fused n={} score={:.4} confidence={:.4} threshold={:.2}",
            scores.len(), overall_score, confidence, threshold
        );

        Ok(FusionResult {
            overall_score,
            overall_prediction: verdict(overall_score, threshold),
            confidence,
            threshold,
            fusion_method: FusionMethod::WeightedEnsemble,
            modality_weights: applied,
            per_modality_contribution: self.attribution(evidence),
        })
    }

    fn simple_average(&self, evidence: &EvidenceSet) -> FusionResult {
        let finite: Vec<(Modality, f64)> = evidence
            .iter()
            .filter(|(_, r)| r.score.is_finite())
            .map(|(m, r)| (m, r.score))
            .collect();

        let overall_score = if finite.is_empty() {
            EMPTY_SCORE
        } else {
            let mean = finite.iter().map(|(_, s)| s).sum::<f64>() / finite.len() as f64;
            mean.clamp(0.0, 1.0)
        };

        let share = if finite.is_empty() { 0.0 } else { 1.0 / finite.len() as f64 };
        let threshold = self.threshold(FALLBACK_CONFIDENCE);

        FusionResult {
            overall_score,
            overall_prediction: verdict(overall_score, threshold),
            confidence: FALLBACK_CONFIDENCE,
            threshold,
            fusion_method: FusionMethod::SimpleAverage,
            modality_weights: finite.iter().map(|(m, _)| (*m, share)).collect(),
            per_modality_contribution: self.attribution(evidence),
        }
    }

    /// Raw score × nominal weight. The nominal table keeps attribution stable
    /// regardless of reliability adjustments.
    fn attribution(&self, evidence: &EvidenceSet) -> BTreeMap<Modality, f64> {
        evidence
            .iter()
            .filter(|(_, r)| r.score.is_finite())
            .map(|(m, r)| (m, r.score * self.config.weights.get(m)))
            .collect()
    }
}

fn check_score(modality: Modality, score: f64) -> Result<(), FusionError> {
    if !score.is_finite() {
        return Err(FusionError::NonFiniteScore(modality));
    }
    if !(0.0..=1.0).contains(&score) {
        return Err(FusionError::ScoreOutOfRange { modality, score });
    }
    Ok(())
}

fn verdict(score: f64, threshold: f64) -> Verdict {
    if score > threshold { Verdict::Fake } else { Verdict::Real }
}

/// Population variance.
fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n    = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}
