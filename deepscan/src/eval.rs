// deepscan/src/eval.rs
//
// Labeled evaluation harness.
//
//   1. Reads a JSONL manifest whose entries carry `label: real|fake`
//   2. Runs every entry through the full pipeline
//   3. Computes overall and per-modality precision / recall / F1 / FPR,
//      plus an exact ROC AUC over the fused scores
//   4. Prints a markdown report (or JSON with --json)
//
// Positive class = fake. Requests that fail (rejection, extraction error)
// are counted separately and excluded from the metrics.
//
// Run:
//   deepscan --mode eval --path labeled.jsonl

use std::collections::BTreeMap;
use std::fmt::Write as _;

use parking_lot::Mutex;
use serde_json::json;

use crate::types::{DetectionResponse, Modality, Prediction, Verdict};

// ── Confusion counts ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Confusion {
    pub tp: u64,  // fake flagged fake
    pub fp: u64,  // real flagged fake
    pub tn: u64,  // real passed
    pub fn_: u64, // fake passed
}

impl Confusion {
    pub fn record(&mut self, flagged: bool, fake: bool) {
        match (flagged, fake) {
            (true,  true)  => self.tp  += 1,
            (true,  false) => self.fp  += 1,
            (false, true)  => self.fn_ += 1,
            (false, false) => self.tn  += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.tp + self.fp + self.tn + self.fn_
    }

    pub fn precision(&self) -> f64 {
        let denom = self.tp + self.fp;
        if denom == 0 { 1.0 } else { self.tp as f64 / denom as f64 }
    }

    pub fn recall(&self) -> f64 {
        let denom = self.tp + self.fn_;
        if denom == 0 { 0.0 } else { self.tp as f64 / denom as f64 }
    }

    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) }
    }

    pub fn fpr(&self) -> f64 {
        let denom = self.fp + self.tn;
        if denom == 0 { 0.0 } else { self.fp as f64 / denom as f64 }
    }
}

// ── Result ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct EvalResult {
    pub n_items: usize,
    pub n_positive: usize,
    pub n_negative: usize,
    pub n_failed: usize,
    pub global: Confusion,
    pub per_modality: BTreeMap<Modality, Confusion>,
    pub auc: f64,
    /// (bin lower bound, count), 0.05-wide bins.
    pub score_histogram: Vec<(f64, usize)>,
}

impl EvalResult {
    pub fn markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "## Deepscan Evaluation Report\n");
        let _ = writeln!(out, "| Metric    | Value  |");
        let _ = writeln!(out, "|-----------|--------|");
        let _ = writeln!(out, "| Items     | {}     |", self.n_items);
        let _ = writeln!(out, "| Fake      | {}     |", self.n_positive);
        let _ = writeln!(out, "| Real      | {}     |", self.n_negative);
        let _ = writeln!(out, "| Failed    | {}     |", self.n_failed);
        let _ = writeln!(out, "| Precision | {:.4} |", self.global.precision());
        let _ = writeln!(out, "| Recall    | {:.4} |", self.global.recall());
        let _ = writeln!(out, "| F1        | {:.4} |", self.global.f1());
        let _ = writeln!(out, "| FPR       | {:.4} |", self.global.fpr());
        let _ = writeln!(out, "| AUC-ROC   | {:.4} |", self.auc);
        let _ = writeln!(out);

        let _ = writeln!(out, "### Per-Modality Performance\n");
        let _ = writeln!(out, "| Modality | N | P | R | F1 | FPR |");
        let _ = writeln!(out, "|----------|---|---|---|----|-----|");
        let mut modalities: Vec<_> = self.per_modality.iter().collect();
        modalities.sort_by(|a, b| b.1.f1().total_cmp(&a.1.f1()));
        for (modality, m) in modalities {
            let _ = writeln!(
                out,
                "| {:13} | {} | {:.3} | {:.3} | {:.3} | {:.4} |",
                modality, m.total(), m.precision(), m.recall(), m.f1(), m.fpr()
            );
        }

        let _ = writeln!(out, "\n### Score Distribution\n");
        let scored = self.n_items.saturating_sub(self.n_failed).max(1);
        for (lower, count) in &self.score_histogram {
            let bar = "#".repeat((*count as f64 / scored as f64 * 60.0) as usize);
            let _ = writeln!(out, "{:.2}-{:.2} | {:5} | {}", lower, lower + 0.05, count, bar);
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        let per_modality: BTreeMap<String, serde_json::Value> = self
            .per_modality
            .iter()
            .map(|(m, c)| {
                (m.to_string(), json!({
                    "n": c.total(), "precision": c.precision(), "recall": c.recall(),
                    "f1": c.f1(), "fpr": c.fpr(),
                }))
            })
            .collect();
        json!({
            "n_items":      self.n_items,
            "n_positive":   self.n_positive,
            "n_negative":   self.n_negative,
            "n_failed":     self.n_failed,
            "precision":    self.global.precision(),
            "recall":       self.global.recall(),
            "f1":           self.global.f1(),
            "fpr":          self.global.fpr(),
            "auc_roc":      self.auc,
            "per_modality": per_modality,
        })
    }
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Accumulator {
    n_items: usize,
    n_failed: usize,
    global: Confusion,
    per_modality: BTreeMap<Modality, Confusion>,
    scored: Vec<(f64, bool)>,
}

/// Shared across concurrent request tasks; each completed request is recorded
/// once.
#[derive(Default)]
pub struct Evaluator {
    acc: Mutex<Accumulator>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, label: Verdict, response: &DetectionResponse) {
        let fake = label == Verdict::Fake;
        let mut acc = self.acc.lock();
        acc.n_items += 1;
        acc.global.record(response.overall_prediction == Verdict::Fake, fake);
        acc.scored.push((response.overall_score, fake));

        for (modality, flagged) in modality_flags(response) {
            acc.per_modality.entry(modality).or_default().record(flagged, fake);
        }
    }

    pub fn record_failure(&self) {
        let mut acc = self.acc.lock();
        acc.n_items += 1;
        acc.n_failed += 1;
    }

    pub fn finish(self) -> EvalResult {
        let acc = self.acc.into_inner();
        let n_positive = acc.scored.iter().filter(|(_, fake)| *fake).count();
        let n_negative = acc.scored.len() - n_positive;

        let mut bins = vec![0usize; 20];
        for (score, _) in &acc.scored {
            bins[((score.clamp(0.0, 1.0) / 0.05) as usize).min(19)] += 1;
        }

        EvalResult {
            n_items: acc.n_items,
            n_positive,
            n_negative,
            n_failed: acc.n_failed,
            auc: auc_roc(&acc.scored),
            global: acc.global,
            per_modality: acc.per_modality,
            score_histogram: bins.into_iter().enumerate().map(|(i, c)| (i as f64 * 0.05, c)).collect(),
        }
    }
}

/// Whether each non-degraded modality, on its own, pointed at "fake".
fn modality_flags(response: &DetectionResponse) -> Vec<(Modality, bool)> {
    let trusted = |m: Modality| !response.degraded.contains_key(&m);
    let mut flags = Vec::with_capacity(3);
    if trusted(Modality::Vision) && response.vision_prediction != Prediction::Unknown {
        flags.push((Modality::Vision, response.vision_prediction == Prediction::Fake));
    }
    if let Some(score) = response.audio_sync_score.filter(|_| trusted(Modality::LipSync)) {
        flags.push((Modality::LipSync, score <= 0.5));
    }
    if let Some(score) = response.physiological_score.filter(|_| trusted(Modality::Physiological)) {
        flags.push((Modality::Physiological, score <= 0.5));
    }
    flags
}

/// Probability that a random fake outranks a random real (ties count half).
pub fn auc_roc(scored: &[(f64, bool)]) -> f64 {
    let pos: Vec<f64> = scored.iter().filter(|(_, f)| *f).map(|(s, _)| *s).collect();
    let neg: Vec<f64> = scored.iter().filter(|(_, f)| !*f).map(|(s, _)| *s).collect();
    if pos.is_empty() || neg.is_empty() {
        return 0.5;
    }
    let mut wins = 0.0;
    for p in &pos {
        for n in &neg {
            if p > n {
                wins += 1.0;
            } else if p == n {
                wins += 0.5;
            }
        }
    }
    wins / (pos.len() * neg.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FusionMethod, FusionResult, MediaKind};

    fn response(score: f64, verdict: Verdict, vision: Prediction, sync: Option<f64>) -> DetectionResponse {
        DetectionResponse {
            request_id: "r".into(),
            overall_score: score,
            overall_prediction: verdict,
            confidence: 0.9,
            fusion_method: FusionMethod::WeightedEnsemble,
            vision_score: score,
            vision_prediction: vision,
            audio_sync_score: sync,
            physiological_score: None,
            explanation: None,
            heatmap_url: None,
            processing_time: 0.1,
            model_version: "1.0.0".into(),
            file_type: MediaKind::Video,
            media_sha256: String::new(),
            degraded: BTreeMap::new(),
            fusion: FusionResult {
                overall_score: score,
                overall_prediction: verdict,
                confidence: 0.9,
                threshold: 0.5,
                fusion_method: FusionMethod::WeightedEnsemble,
                modality_weights: BTreeMap::new(),
                per_modality_contribution: BTreeMap::new(),
            },
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_confusion_rates() {
        let c = Confusion { tp: 8, fp: 2, tn: 18, fn_: 2 };
        assert_eq!(c.precision(), 0.8);
        assert_eq!(c.recall(), 0.8);
        assert!((c.f1() - 0.8).abs() < 1e-12);
        assert_eq!(c.fpr(), 0.1);
        assert_eq!(Confusion::default().precision(), 1.0);
    }

    #[test]
    fn test_auc() {
        assert_eq!(auc_roc(&[(0.9, true), (0.8, true), (0.2, false), (0.1, false)]), 1.0);
        assert_eq!(auc_roc(&[(0.1, true), (0.9, false)]), 0.0);
        assert_eq!(auc_roc(&[(0.5, true), (0.5, false)]), 0.5);
        assert_eq!(auc_roc(&[(0.5, true)]), 0.5);
    }

    #[test]
    fn test_evaluator_accumulates() {
        let ev = Evaluator::new();
        ev.record(Verdict::Fake, &response(0.9, Verdict::Fake, Prediction::Fake, Some(0.2)));
        ev.record(Verdict::Real, &response(0.3, Verdict::Real, Prediction::Real, Some(0.8)));
        ev.record(Verdict::Real, &response(0.7, Verdict::Fake, Prediction::Fake, None));
        ev.record_failure();

        let r = ev.finish();
        assert_eq!(r.n_items, 4);
        assert_eq!(r.n_failed, 1);
        assert_eq!((r.n_positive, r.n_negative), (1, 2));
        assert_eq!(r.global, Confusion { tp: 1, fp: 1, tn: 1, fn_: 0 });
        assert_eq!(r.per_modality[&Modality::LipSync], Confusion { tp: 1, fp: 0, tn: 1, fn_: 0 });
        assert_eq!(r.per_modality[&Modality::Vision].total(), 3);
        assert_eq!(r.auc, 1.0);

        let md = r.markdown();
        assert!(md.contains("| Precision | 0.5000 |"));
        assert_eq!(r.to_json()["n_failed"], 1);
    }
}
