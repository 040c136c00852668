// deepscan/src/explain.rs
//
// Human-readable explanation of a verdict, built from the fusion attribution.
// Heatmap rendering is not produced, so responses carry `heatmap_url: None`.

use std::fmt::Write as _;

use crate::types::{EvidenceSet, FusionMethod, FusionResult, Modality, Verdict};

pub fn explain(evidence: &EvidenceSet, fusion: &FusionResult) -> String {
    let mut out = String::new();

    let verdict = match fusion.overall_prediction {
        Verdict::Fake => "likely manipulated",
        Verdict::Real => "likely authentic",
    };
    let _ = write!(
        out,
        "Media is {} (score {:.2} against threshold {:.2}, confidence {:.2}).",
        verdict, fusion.overall_score, fusion.threshold, fusion.confidence
    );

    let dominant = fusion
        .per_modality_contribution
        .iter()
        .max_by(|a, b| a.1.total_cmp(b.1));
    if let Some((modality, contribution)) = dominant {
        let _ = write!(out, " Strongest signal: {} ({:.2}).", label(*modality), contribution);
    }

    for (modality, result) in evidence.iter() {
        let _ = write!(out, " {}: {} at {:.2}.", label(modality), result.prediction, result.score);
    }

    if !evidence.degraded().is_empty() {
        let parts: Vec<String> = evidence
            .degraded()
            .iter()
            .map(|(m, reason)| format!("{} ({})", label(*m), reason))
            .collect();
        let _ = write!(out, " Unreliable: {}.", parts.join(", "));
    }

    if fusion.fusion_method == FusionMethod::SimpleAverage {
        out.push_str(" Scores were averaged without reliability weights.");
    }
    out
}

fn label(modality: Modality) -> &'static str {
    match modality {
        Modality::Vision => "Visual artifacts",
        Modality::LipSync => "Lip sync",
        Modality::Physiological => "Pulse signal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fusion::FusionEngine;
    use crate::types::{DegradeReason, DetectorOutcome, ModalityResult, Prediction};
    use std::time::Duration;

    #[test]
    fn test_names_dominant_and_degraded_modalities() {
        let mut set = EvidenceSet::new()
            .with(Modality::Vision, ModalityResult::new(Prediction::Fake, 0.9, Duration::ZERO))
            .with(Modality::LipSync, ModalityResult::new(Prediction::Mismatch, 0.2, Duration::ZERO));
        set.record(
            Modality::Physiological,
            DetectorOutcome::Degraded(
                ModalityResult::unknown(Modality::Physiological, Duration::ZERO),
                DegradeReason::InsufficientSignal { usable: 2, required: 5 },
            ),
        );
        let fusion = FusionEngine::default().fuse(&set);

        let text = explain(&set, &fusion);
        assert!(text.contains("Strongest signal: Visual artifacts (0.36)"), "{text}");
        assert!(text.contains("Lip sync: mismatch at 0.20"));
        assert!(text.contains("Unreliable: Pulse signal (insufficient_signal"));
        assert!(!text.contains("averaged"));
    }
}
