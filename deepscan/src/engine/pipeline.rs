// deepscan/src/engine/pipeline.rs
//
// Request orchestration.
//
//   validate (extension, size)      ── reject before anything touches disk
//   hash + copy upload              ── into the request's own temp dir
//   image: vision                   ┐
//   video: extract → vision ║ lip_sync ║ physiological (joined)
//   fuse → explain? → response      ┘
//   release artifacts               ── exactly once, on every exit path
//
// Only validation and extraction errors leave `process`; detector and fusion
// problems are folded into the response as degraded modalities and lowered
// confidence.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::detectors::{DetectorSet, Evidence};
use crate::engine::fusion::FusionEngine;
use crate::error::DetectError;
use crate::explain::explain;
use crate::media::{FfmpegExtractor, MediaExtractor, RequestArtifacts};
use crate::metrics::DeepscanMetrics;
use crate::types::{
    DetectionRequest, DetectionResponse, EvidenceSet, FusionResult, MediaKind, Modality, Prediction,
};

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct Pipeline {
    settings: Arc<Settings>,
    detectors: DetectorSet,
    extractor: Arc<dyn MediaExtractor>,
    fusion: FusionEngine,
    metrics: Arc<DeepscanMetrics>,
}

impl Pipeline {
    pub fn new(
        settings: Settings,
        detectors: DetectorSet,
        extractor: Arc<dyn MediaExtractor>,
        metrics: Arc<DeepscanMetrics>,
    ) -> Self {
        let fusion = FusionEngine::new(settings.fusion.clone());
        Self { settings: Arc::new(settings), detectors, extractor, fusion, metrics }
    }

    /// Baseline detectors and the ffmpeg extractor.
    pub fn baseline(settings: Settings, metrics: Arc<DeepscanMetrics>) -> Self {
        let detectors = DetectorSet::baseline(&settings);
        let extractor = Arc::new(FfmpegExtractor::new(settings.extraction.clone()));
        Self::new(settings, detectors, extractor, metrics)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn metrics(&self) -> &Arc<DeepscanMetrics> {
        &self.metrics
    }

    /// Extension and size checks. Returns the lower-cased extension.
    pub async fn validate(&self, request: &DetectionRequest) -> Result<String, DetectError> {
        let extension = request
            .path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .ok_or_else(|| DetectError::MissingExtension(request.path.clone()))?;

        if !self.settings.extensions(request.kind).iter().any(|e| e.eq_ignore_ascii_case(&extension)) {
            return Err(DetectError::UnsupportedExtension { kind: request.kind, extension });
        }

        let metadata = tokio::fs::metadata(&request.path).await?;
        if !metadata.is_file() {
            return Err(DetectError::NotAFile(request.path.clone()));
        }
        if metadata.len() > self.settings.max_file_size {
            return Err(DetectError::FileTooLarge { size: metadata.len(), limit: self.settings.max_file_size });
        }
        Ok(extension)
    }

    /// Validation plus a read capped at `max_file_size`. The file may have
    /// grown since its metadata was taken.
    async fn admit(&self, request: &DetectionRequest) -> Result<(String, Vec<u8>), DetectError> {
        let extension = self.validate(request).await?;
        let bytes = read_capped(&request.path, self.settings.max_file_size).await?;
        Ok((extension, bytes))
    }

    pub async fn process(&self, request: &DetectionRequest) -> Result<DetectionResponse, DetectError> {
        let _in_flight = self.metrics.enter();
        self.metrics.record_request(request.kind);

        let (extension, bytes) = match self.admit(request).await {
            Ok(admitted) => admitted,
            Err(e) => {
                if e.is_rejection() {
                    self.metrics.record_rejection();
                }
                warn!("rejected {}: {}", request.path.display(), e);
                return Err(e);
            }
        };

        let media_sha256 = hex::encode(Sha256::digest(&bytes));
        let request_id   = request_id(&media_sha256);

        let mut artifacts = RequestArtifacts::create(self.settings.temp_root.as_deref(), &request_id)
            .map_err(DetectError::Artifacts)?;
        let upload = artifacts.reserve(&format!("upload.{extension}"));
        tokio::fs::write(&upload, &bytes).await?;
        drop(bytes);

        let deadline = self.settings.detector_timeout();
        let evidence = match request.kind {
            MediaKind::Image => {
                self.detectors.run_image(Arc::new(Evidence::Image(upload)), deadline).await
            }
            MediaKind::Video => {
                let extraction = match self.extractor.extract(&upload, artifacts.dir()).await {
                    Ok(x) => x,
                    Err(e) => {
                        self.metrics.record_extraction_failure();
                        let removed = artifacts.release();
                        warn!("extraction failed id={} removed={}: {}", request_id, removed, e);
                        return Err(e);
                    }
                };
                artifacts.track_all(extraction.temp_files.iter().cloned());
                debug!(
                    "id={} frames={} audio={}",
                    request_id, extraction.frames.len(), extraction.audio.is_some()
                );
                let evidence = Evidence::Video { frames: extraction.frames, audio: extraction.audio };
                self.detectors.run_all(Arc::new(evidence), deadline).await
            }
        };

        let fusion = self.fusion.fuse(&evidence);
        let explanation = request.explain.then(|| explain(&evidence, &fusion));

        self.metrics.record_evidence(&evidence);
        self.metrics.record_fusion(&fusion);

        let response = self.respond(request, request_id, media_sha256, &evidence, fusion, explanation);

        let removed = artifacts.release();
        info!(
            "done id={} kind={} verdict={} score={:.4} confidence={:.3} degraded={} removed={}",
            response.request_id, request.kind, response.overall_prediction, response.overall_score,
            response.confidence, response.degraded.len(), removed
        );
        Ok(response)
    }

    fn respond(
        &self,
        request: &DetectionRequest,
        request_id: String,
        media_sha256: String,
        evidence: &EvidenceSet,
        fusion: FusionResult,
        explanation: Option<String>,
    ) -> DetectionResponse {
        let (vision_score, vision_prediction) = evidence
            .get(Modality::Vision)
            .map_or((Modality::Vision.neutral_score(), Prediction::Unknown), |r| (r.score, r.prediction));

        DetectionResponse {
            request_id,
            overall_score:       fusion.overall_score,
            overall_prediction:  fusion.overall_prediction,
            confidence:          fusion.confidence,
            fusion_method:       fusion.fusion_method,
            vision_score,
            vision_prediction,
            audio_sync_score:    evidence.get(Modality::LipSync).map(|r| r.score),
            physiological_score: evidence.get(Modality::Physiological).map(|r| r.score),
            explanation,
            heatmap_url:         None,
            processing_time:     evidence.total_processing_time(),
            model_version:       self.settings.model_version.clone(),
            file_type:           request.kind,
            media_sha256,
            degraded:            evidence.degraded().iter().map(|(m, r)| (*m, r.to_string())).collect(),
            fusion,
            timestamp:           Utc::now(),
        }
    }
}

/// Whole file, or `FileTooLarge` once more than `limit` bytes have been read.
async fn read_capped(path: &Path, limit: u64) -> Result<Vec<u8>, DetectError> {
    let file = tokio::fs::File::open(path).await?;
    let mut bytes = Vec::new();
    file.take(limit.saturating_add(1)).read_to_end(&mut bytes).await?;
    let size = bytes.len() as u64;
    if size > limit {
        return Err(DetectError::FileTooLarge { size, limit });
    }
    Ok(bytes)
}

/// Unique per process: media digest + wall clock + sequence number.
fn request_id(media_sha256: &str) -> String {
    let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
    let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut h = Sha256::new();
    h.update(media_sha256.as_bytes());
    h.update(now.to_le_bytes());
    h.update(seq.to_le_bytes());
    hex::encode(&h.finalize()[..8])
}

/// Media kind implied by a path's extension under `settings`, if any.
pub fn kind_for_path(settings: &Settings, path: &Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    [MediaKind::Image, MediaKind::Video]
        .into_iter()
        .find(|kind| settings.extensions(*kind).iter().any(|e| e.eq_ignore_ascii_case(&ext)))
}
