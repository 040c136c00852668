// deepscan/src/metrics.rs
//
// Operational metrics, rendered in Prometheus text exposition format.
//
//   deepscan_requests_total{kind}              Counter  accepted + rejected requests
//   deepscan_rejected_total                    Counter  failed validation
//   deepscan_extraction_failures_total         Counter  fatal extraction errors
//   deepscan_verdicts_total{verdict}           Counter  fused verdicts
//   deepscan_degraded_total{modality}          Counter  sentinel detector outcomes
//   deepscan_fusion_fallbacks_total            Counter  simple-average fusions
//   deepscan_modality_mean_score{modality}     Gauge    mean raw score per modality
//   deepscan_overall_score_bin_total{bin}      Counter  fused score, 0.1-wide bins (not cumulative)
//   deepscan_in_flight                         Gauge    requests currently processing
//
// Endpoint: GET /metrics on --metrics-port.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::types::{EvidenceSet, FusionMethod, FusionResult, MediaKind, Modality, Verdict};

// ── Metrics registry ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct DeepscanMetrics {
    pub requests_image: AtomicU64,
    pub requests_video: AtomicU64,
    pub rejected: AtomicU64,
    pub extraction_failures: AtomicU64,
    pub verdict_real: AtomicU64,
    pub verdict_fake: AtomicU64,
    pub fusion_fallbacks: AtomicU64,
    pub in_flight: AtomicI64,
    pub degraded: DashMap<Modality, u64>,
    /// Per-modality score sums + counts for mean score export
    pub modality_score_sum: Mutex<BTreeMap<Modality, (f64, u64)>>,
    /// Overall score buckets [0.0, 0.1), [0.1, 0.2), ... [0.9, 1.0]
    pub score_buckets: [AtomicU64; 10],
}

impl DeepscanMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_request(&self, kind: MediaKind) {
        match kind {
            MediaKind::Image => self.requests_image.fetch_add(1, Ordering::Relaxed),
            MediaKind::Video => self.requests_video.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_rejection(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_extraction_failure(&self) {
        self.extraction_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn enter(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlight(Arc::clone(self))
    }

    pub fn record_evidence(&self, evidence: &EvidenceSet) {
        for modality in evidence.degraded().keys() {
            *self.degraded.entry(*modality).or_insert(0) += 1;
        }
        let mut sums = self.modality_score_sum.lock();
        for (modality, result) in evidence.iter().filter(|(_, r)| r.score.is_finite()) {
            let entry = sums.entry(modality).or_insert((0.0, 0));
            entry.0 += result.score;
            entry.1 += 1;
        }
    }

    pub fn record_fusion(&self, fusion: &FusionResult) {
        match fusion.overall_prediction {
            Verdict::Real => self.verdict_real.fetch_add(1, Ordering::Relaxed),
            Verdict::Fake => self.verdict_fake.fetch_add(1, Ordering::Relaxed),
        };
        if fusion.fusion_method == FusionMethod::SimpleAverage {
            self.fusion_fallbacks.fetch_add(1, Ordering::Relaxed);
        }
        let bucket = ((fusion.overall_score.clamp(0.0, 1.0) / 0.1) as usize).min(9);
        self.score_buckets[bucket].fetch_add(1, Ordering::Relaxed);
    }

    /// Render metrics in Prometheus text exposition format.
    pub fn prometheus_text(&self) -> String {
        let mut out = String::with_capacity(2048);

        macro_rules! header {
            ($name:expr, $help:expr, $kind:expr) => {
                out.push_str(&format!("# HELP {} {}\n# TYPE {} {}\n", $name, $help, $name, $kind));
            };
        }
        macro_rules! counter {
            ($name:expr, $help:expr, $val:expr) => {
                header!($name, $help, "counter");
                out.push_str(&format!("{} {}\n", $name, $val));
            };
        }

        header!("deepscan_requests_total", "Detection requests by media kind", "counter");
        out.push_str(&format!(
            "deepscan_requests_total{{kind=\"image\"}} {}\n",
            self.requests_image.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "deepscan_requests_total{{kind=\"video\"}} {}\n",
            self.requests_video.load(Ordering::Relaxed)
        ));

        counter!(
            "deepscan_rejected_total",
            "Requests rejected by validation",
            self.rejected.load(Ordering::Relaxed)
        );
        counter!(
            "deepscan_extraction_failures_total",
            "Videos whose frames could not be extracted",
            self.extraction_failures.load(Ordering::Relaxed)
        );

        header!("deepscan_verdicts_total", "Fused verdicts", "counter");
        out.push_str(&format!(
            "deepscan_verdicts_total{{verdict=\"real\"}} {}\n",
            self.verdict_real.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "deepscan_verdicts_total{{verdict=\"fake\"}} {}\n",
            self.verdict_fake.load(Ordering::Relaxed)
        ));

        header!("deepscan_degraded_total", "Detector outcomes replaced by a sentinel", "counter");
        for modality in Modality::ALL {
            let n = self.degraded.get(&modality).map_or(0, |v| *v);
            out.push_str(&format!("deepscan_degraded_total{{modality=\"{}\"}} {}\n", modality, n));
        }

        counter!(
            "deepscan_fusion_fallbacks_total",
            "Fusions that fell back to a simple average",
            self.fusion_fallbacks.load(Ordering::Relaxed)
        );

        header!("deepscan_modality_mean_score", "Mean raw score per modality", "gauge");
        for (modality, (sum, count)) in self.modality_score_sum.lock().iter() {
            let mean = if *count > 0 { sum / *count as f64 } else { 0.0 };
            out.push_str(&format!(
                "deepscan_modality_mean_score{{modality=\"{}\"}} {:.4}\n",
                modality, mean
            ));
        }

        // `bin` is the lower bound; each bin counts only its own scores.
        header!("deepscan_overall_score_bin_total", "Fused scores per 0.1-wide bin", "counter");
        for (i, bucket) in self.score_buckets.iter().enumerate() {
            out.push_str(&format!(
                "deepscan_overall_score_bin_total{{bin=\"{:.1}\"}} {}\n",
                i as f64 * 0.1,
                bucket.load(Ordering::Relaxed)
            ));
        }

        header!("deepscan_in_flight", "Requests currently being processed", "gauge");
        out.push_str(&format!("deepscan_in_flight {}\n", self.in_flight.load(Ordering::Relaxed)));

        out
    }
}

/// Decrements the in-flight gauge when the request finishes, however it ends.
pub struct InFlight(Arc<DeepscanMetrics>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

// ── HTTP /metrics endpoint ─────────────────────────────────────────────────────

pub struct MetricsServer {
    metrics: Arc<DeepscanMetrics>,
    listener: TcpListener,
}

impl MetricsServer {
    pub async fn bind(metrics: Arc<DeepscanMetrics>, addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { metrics, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve(self) -> Result<()> {
        info!("/metrics endpoint listening on {}", self.local_addr()?);

        loop {
            let (mut stream, peer) = self.listener.accept().await?;
            let metrics = Arc::clone(&self.metrics);

            tokio::spawn(async move {
                let mut request = [0u8; 1024];
                let _ = stream.read(&mut request).await;
                let body = metrics.prometheus_text();
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(), body
                );
                if let Err(e) = stream.write_all(response.as_bytes()).await {
                    debug!("metrics write to {} failed: {}", peer, e);
                }
            });
        }
    }
}
