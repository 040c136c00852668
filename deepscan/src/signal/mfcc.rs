//! MFCC features for the lip-sync model.
//!
//! Hann-windowed STFT → power spectrum → triangular mel filterbank → log →
//! orthonormal DCT-II. Output is coefficient-major: `coeffs[c][t]`.

use std::f32::consts::PI;

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

#[derive(Debug, Clone, Copy)]
pub struct MfccConfig {
    pub n_mfcc: usize,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
}

/// `n_mfcc × frames` matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Mfcc {
    pub coeffs: Vec<Vec<f32>>,
}

impl Mfcc {
    pub fn n_coeffs(&self) -> usize {
        self.coeffs.len()
    }

    pub fn n_frames(&self) -> usize {
        self.coeffs.first().map_or(0, Vec::len)
    }

    /// Align the time axis to `target` frames: truncate when longer, repeat
    /// cyclically when shorter.
    pub fn aligned(&self, target: usize) -> Mfcc {
        let n = self.n_frames();
        let coeffs = self
            .coeffs
            .iter()
            .map(|row| {
                if n == 0 {
                    vec![0.0; target]
                } else {
                    (0..target).map(|t| row[t % n]).collect()
                }
            })
            .collect();
        Mfcc { coeffs }
    }

    /// Coefficient 0 per frame, a log-energy envelope.
    pub fn energy_envelope(&self) -> Vec<f32> {
        self.coeffs.first().cloned().unwrap_or_default()
    }
}

pub fn mfcc(samples: &[f32], sample_rate: u32, cfg: &MfccConfig) -> Mfcc {
    let n_fft = cfg.n_fft;
    let hop   = cfg.hop_length.max(1);
    let n_bins = n_fft / 2 + 1;

    // Centered frames, zero padded at both ends.
    let pad = n_fft / 2;
    let mut padded = vec![0.0f32; samples.len() + 2 * pad];
    padded[pad..pad + samples.len()].copy_from_slice(samples);
    let n_frames = if padded.len() >= n_fft { 1 + (padded.len() - n_fft) / hop } else { 0 };

    let window: Vec<f32> = (0..n_fft)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n_fft as f32).cos())
        .collect();
    let filters = mel_filterbank(cfg.n_mels, n_fft, sample_rate);

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);

    let mut coeffs = vec![Vec::with_capacity(n_frames); cfg.n_mfcc];
    let mut buffer = vec![Complex::new(0.0f32, 0.0); n_fft];
    let mut log_mel = vec![0.0f32; cfg.n_mels];

    for f in 0..n_frames {
        let start = f * hop;
        for (i, slot) in buffer.iter_mut().enumerate() {
            *slot = Complex::new(padded[start + i] * window[i], 0.0);
        }
        fft.process(&mut buffer);

        for (m, filter) in filters.iter().enumerate() {
            let energy: f32 = filter
                .iter()
                .zip(buffer.iter().take(n_bins))
                .map(|(w, c)| w * c.norm_sqr())
                .sum();
            log_mel[m] = (energy + 1e-10).ln();
        }

        for (k, row) in coeffs.iter_mut().enumerate() {
            row.push(dct_ii(&log_mel, k));
        }
    }

    Mfcc { coeffs }
}

fn dct_ii(x: &[f32], k: usize) -> f32 {
    let n = x.len() as f32;
    let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
    let sum: f32 = x
        .iter()
        .enumerate()
        .map(|(i, v)| v * (PI * k as f32 * (2.0 * i as f32 + 1.0) / (2.0 * n)).cos())
        .sum();
    scale * sum
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// `n_mels` triangular filters over `n_fft / 2 + 1` bins, 0 Hz to Nyquist.
fn mel_filterbank(n_mels: usize, n_fft: usize, sample_rate: u32) -> Vec<Vec<f32>> {
    let n_bins  = n_fft / 2 + 1;
    let nyquist = sample_rate as f32 / 2.0;
    let mel_max = hz_to_mel(nyquist);
    let points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();
    let bin_hz = |b: usize| b as f32 * sample_rate as f32 / n_fft as f32;

    (0..n_mels)
        .map(|m| {
            let (lo, mid, hi) = (points[m], points[m + 1], points[m + 2]);
            (0..n_bins)
                .map(|b| {
                    let f = bin_hz(b);
                    if f <= lo || f >= hi {
                        0.0
                    } else if f <= mid {
                        (f - lo) / (mid - lo)
                    } else {
                        (hi - f) / (hi - mid)
                    }
                })
                .collect()
        })
        .collect()
}
