//! Band-pass filtering for the rPPG pulse trace.
//!
//! First-order high-pass followed by first-order low-pass, run forward then
//! backward so the combined response is zero-phase.

use std::f64::consts::PI;

#[derive(Debug, Clone, Copy)]
pub struct BandPass {
    pub sample_rate: f64,
    pub low_hz: f64,
    pub high_hz: f64,
}

impl BandPass {
    pub fn new(sample_rate: f64, low_hz: f64, high_hz: f64) -> Self {
        Self { sample_rate, low_hz, high_hz }
    }

    /// Zero-phase band-pass of `signal`. The mean is removed first so the
    /// high-pass stage does not start from a step.
    pub fn apply(&self, signal: &[f64]) -> Vec<f64> {
        if signal.len() < 2 {
            return vec![0.0; signal.len()];
        }
        let mut out = detrend(signal);
        self.pass(&mut out);
        out.reverse();
        self.pass(&mut out);
        out.reverse();
        out
    }

    fn pass(&self, x: &mut [f64]) {
        let dt = 1.0 / self.sample_rate;

        let hp_rc    = 1.0 / (2.0 * PI * self.low_hz.max(0.01));
        let hp_alpha = hp_rc / (hp_rc + dt);
        let lp_rc    = 1.0 / (2.0 * PI * self.high_hz.max(0.1));
        let lp_alpha = dt / (lp_rc + dt);

        let mut prev_in  = x[0];
        let mut prev_out = 0.0;
        x[0] = 0.0;
        for v in x.iter_mut().skip(1) {
            let y = hp_alpha * (prev_out + *v - prev_in);
            prev_in  = *v;
            prev_out = y;
            *v = y;
        }

        let mut prev = x[0];
        for v in x.iter_mut().skip(1) {
            prev = lp_alpha * *v + (1.0 - lp_alpha) * prev;
            *v = prev;
        }
    }
}

pub fn detrend(signal: &[f64]) -> Vec<f64> {
    let mean = signal.iter().sum::<f64>() / signal.len().max(1) as f64;
    signal.iter().map(|v| v - mean).collect()
}

/// Population variance; used as band power after filtering.
pub fn variance(signal: &[f64]) -> f64 {
    if signal.is_empty() {
        return 0.0;
    }
    let n    = signal.len() as f64;
    let mean = signal.iter().sum::<f64>() / n;
    signal.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}
