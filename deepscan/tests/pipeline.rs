// deepscan/tests/pipeline.rs
//
// Orchestrator behaviour end to end: rejections, degraded detectors, fusion
// fallback, extraction failure, cancellation and temp-file release.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use image::{Rgb, RgbImage};
use parking_lot::Mutex;

use deepscan::detectors::{Detector, DetectorSet, Evidence};
use deepscan::error::DetectError;
use deepscan::media::{Extraction, MediaExtractor};
use deepscan::metrics::DeepscanMetrics;
use deepscan::types::{
    DetectionRequest, DetectorOutcome, FusionMethod, MediaKind, Modality, ModalityResult, Prediction,
};
use deepscan::{Pipeline, Settings};

// ── Fakes ─────────────────────────────────────────────────────────────────────

/// Writes real frame and audio files into the request directory and remembers
/// every path it produced.
#[derive(Default)]
struct FakeExtractor {
    frames: usize,
    with_audio: bool,
    fail_after_writing: bool,
    written: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl MediaExtractor for FakeExtractor {
    async fn extract(&self, _video: &Path, out_dir: &Path) -> Result<Extraction, DetectError> {
        let mut frames = Vec::new();
        for i in 0..self.frames {
            let p = out_dir.join(format!("frame_{:05}.png", i + 1));
            textured_frame(i as f64).save(&p).map_err(|e| DetectError::Extraction(e.to_string()))?;
            frames.push(p);
        }
        let audio = if self.with_audio {
            let p = out_dir.join("audio.wav");
            write_wav(&p);
            Some(p)
        } else {
            None
        };

        let mut temp_files = frames.clone();
        temp_files.extend(audio.clone());
        self.written.lock().extend(temp_files.iter().cloned());

        if self.fail_after_writing {
            return Err(DetectError::Extraction("codec not supported".into()));
        }
        Ok(Extraction { frames, audio, temp_files })
    }
}

struct Fixed(Modality, Prediction, f64);

impl Detector for Fixed {
    fn modality(&self) -> Modality {
        self.0
    }
    fn detect(&self, _: &Evidence) -> DetectorOutcome {
        DetectorOutcome::Ok(ModalityResult::new(self.1, self.2, Duration::from_millis(10)))
    }
}

struct Panics(Modality);

impl Detector for Panics {
    fn modality(&self) -> Modality {
        self.0
    }
    fn detect(&self, _: &Evidence) -> DetectorOutcome {
        panic!("injected detector fault")
    }
}

struct Slow(Modality, Duration);

impl Detector for Slow {
    fn modality(&self) -> Modality {
        self.0
    }
    fn detect(&self, _: &Evidence) -> DetectorOutcome {
        std::thread::sleep(self.1);
        DetectorOutcome::Ok(ModalityResult::new(Prediction::Real, 0.1, self.1))
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn textured_frame(phase: f64) -> RgbImage {
    let offset = 6.0 * (phase * 0.25).sin();
    RgbImage::from_fn(64, 64, |x, y| {
        let base = 110.0 + ((x * 3 + y) % 50) as f64 + offset;
        Rgb([base as u8, (base - 30.0) as u8, (base - 50.0) as u8])
    })
}

fn write_wav(path: &Path) {
    let spec = WavSpec { channels: 1, sample_rate: 16_000, bits_per_sample: 16, sample_format: SampleFormat::Int };
    let mut w = WavWriter::create(path, spec).unwrap();
    for i in 0..16_000 {
        let amp = if (i / 1600) % 2 == 0 { 2000.0 } else { 12000.0 };
        w.write_sample(((i as f32 * 0.07).sin() * amp) as i16).unwrap();
    }
    w.finalize().unwrap();
}

struct Fixture {
    _root: tempfile::TempDir,
    inputs: PathBuf,
    scratch: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let inputs = root.path().join("inputs");
        let scratch = root.path().join("scratch");
        std::fs::create_dir_all(&inputs).unwrap();
        std::fs::create_dir_all(&scratch).unwrap();
        Self { _root: root, inputs, scratch }
    }

    fn settings(&self) -> Settings {
        Settings { temp_root: Some(self.scratch.clone()), detector_timeout_secs: 5, ..Settings::default() }
    }

    fn video(&self) -> PathBuf {
        let p = self.inputs.join("clip.mp4");
        std::fs::write(&p, b"not really an mp4").unwrap();
        p
    }

    fn image(&self) -> PathBuf {
        let p = self.inputs.join("face.png");
        textured_frame(0.0).save(&p).unwrap();
        p
    }

    fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(&self.scratch).unwrap().next().is_none()
    }
}

fn pipeline_with(settings: Settings, detectors: DetectorSet, extractor: Arc<FakeExtractor>) -> Pipeline {
    Pipeline::new(settings, detectors, extractor, DeepscanMetrics::new())
}

fn fixed_detectors() -> DetectorSet {
    DetectorSet {
        vision: Arc::new(Fixed(Modality::Vision, Prediction::Fake, 0.8)),
        lip_sync: Arc::new(Fixed(Modality::LipSync, Prediction::Sync, 0.75)),
        physiological: Arc::new(Fixed(Modality::Physiological, Prediction::PhysioPresent, 0.7)),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn image_runs_vision_only_and_cleans_up() {
    let fx = Fixture::new();
    let pipeline = Pipeline::baseline(fx.settings(), DeepscanMetrics::new());

    let mut request = DetectionRequest::new(fx.image(), MediaKind::Image);
    request.explain = true;
    let resp = pipeline.process(&request).await.unwrap();

    assert_eq!(resp.file_type, MediaKind::Image);
    assert!((0.0..=1.0).contains(&resp.vision_score));
    assert_ne!(resp.vision_prediction, Prediction::Unknown);
    assert!(resp.audio_sync_score.is_none());
    assert!(resp.physiological_score.is_none());
    assert_eq!(resp.confidence, 0.5);
    assert!(resp.processing_time >= 0.0);
    assert!(resp.explanation.is_some());
    assert!(resp.heatmap_url.is_none());
    assert_eq!(resp.media_sha256.len(), 64);
    assert_eq!(resp.model_version, "1.0.0");
    assert!(fx.scratch_is_empty());
}

#[tokio::test]
async fn video_fans_out_to_all_detectors() {
    let fx = Fixture::new();
    let extractor = Arc::new(FakeExtractor { frames: 40, with_audio: true, ..Default::default() });
    let pipeline = pipeline_with(fx.settings(), fixed_detectors(), Arc::clone(&extractor));

    let resp = pipeline.process(&DetectionRequest::new(fx.video(), MediaKind::Video)).await.unwrap();

    assert_eq!(resp.fusion_method, FusionMethod::WeightedEnsemble);
    assert_eq!(resp.audio_sync_score, Some(0.75));
    assert_eq!(resp.physiological_score, Some(0.7));
    // (0.8 × 0.48 + 0.75 × 0.3 + 0.7 × 0.3) / 1.08
    assert!((resp.overall_score - 0.819 / 1.08).abs() < 1e-9);
    assert_eq!(resp.fusion.threshold, 0.5);
    assert!((resp.processing_time - 0.03).abs() < 1e-9);
    assert!(resp.degraded.is_empty());
    assert!(resp.explanation.is_none());

    for p in extractor.written.lock().iter() {
        assert!(!p.exists(), "{} left behind", p.display());
    }
    assert!(fx.scratch_is_empty());
}

#[tokio::test]
async fn baseline_detectors_on_extracted_media() {
    let fx = Fixture::new();
    let extractor = Arc::new(FakeExtractor { frames: 40, with_audio: true, ..Default::default() });
    let settings = fx.settings();
    let detectors = DetectorSet::baseline(&settings);
    let pipeline = pipeline_with(settings, detectors, Arc::clone(&extractor));

    let resp = pipeline.process(&DetectionRequest::new(fx.video(), MediaKind::Video)).await.unwrap();

    assert!(resp.audio_sync_score.is_some());
    assert!(resp.physiological_score.is_some());
    assert!((0.0..=1.0).contains(&resp.overall_score));
    assert!((0.3..=1.0).contains(&resp.confidence));
    assert_eq!(resp.fusion.modality_weights.len(), 3);
    assert!(fx.scratch_is_empty());
}

/// Extraction succeeds, then one detector panics and another reports a
/// non-finite score that the weighted fusion rejects. The request still
/// completes and every extracted file is released.
#[tokio::test]
async fn detector_and_fusion_faults_degrade_and_release_artifacts() {
    let fx = Fixture::new();
    let extractor = Arc::new(FakeExtractor { frames: 12, with_audio: true, ..Default::default() });
    let detectors = DetectorSet {
        vision: Arc::new(Fixed(Modality::Vision, Prediction::Fake, f64::NAN)),
        lip_sync: Arc::new(Panics(Modality::LipSync)),
        physiological: Arc::new(Fixed(Modality::Physiological, Prediction::Absent, 0.2)),
    };
    let pipeline = pipeline_with(fx.settings(), detectors, Arc::clone(&extractor));

    let resp = pipeline.process(&DetectionRequest::new(fx.video(), MediaKind::Video)).await.unwrap();

    assert_eq!(resp.fusion_method, FusionMethod::SimpleAverage);
    assert_eq!(resp.confidence, 0.3);
    assert!((resp.overall_score - 0.35).abs() < 1e-12);
    assert!(resp.degraded.get(&Modality::LipSync).unwrap().contains("injected detector fault"));
    assert_eq!(resp.audio_sync_score, Some(0.5));
    assert!(serde_json::to_string(&resp).is_ok());

    let written = extractor.written.lock().clone();
    assert_eq!(written.len(), 13);
    assert!(written.iter().all(|p| !p.exists()));
    assert!(fx.scratch_is_empty());
    assert_eq!(pipeline.metrics().fusion_fallbacks.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn extraction_failure_is_surfaced_after_cleanup() {
    let fx = Fixture::new();
    let extractor = Arc::new(FakeExtractor {
        frames: 6,
        with_audio: true,
        fail_after_writing: true,
        ..Default::default()
    });
    let pipeline = pipeline_with(fx.settings(), fixed_detectors(), Arc::clone(&extractor));

    let err = pipeline.process(&DetectionRequest::new(fx.video(), MediaKind::Video)).await.unwrap_err();

    assert!(matches!(err, DetectError::Extraction(_)));
    assert!(!err.is_rejection());
    assert!(extractor.written.lock().iter().all(|p| !p.exists()));
    assert!(fx.scratch_is_empty());
    assert_eq!(pipeline.metrics().extraction_failures.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn rejections_happen_before_any_temp_state() {
    let fx = Fixture::new();
    let extractor = Arc::new(FakeExtractor { frames: 6, ..Default::default() });
    let settings = Settings { max_file_size: 8, ..fx.settings() };
    let pipeline = pipeline_with(settings, fixed_detectors(), Arc::clone(&extractor));

    let gif = fx.inputs.join("anim.gif");
    std::fs::write(&gif, b"GIF89a").unwrap();
    let err = pipeline.process(&DetectionRequest::new(&gif, MediaKind::Image)).await.unwrap_err();
    assert!(matches!(err, DetectError::UnsupportedExtension { .. }));

    let err = pipeline.process(&DetectionRequest::new(fx.video(), MediaKind::Video)).await.unwrap_err();
    assert!(matches!(err, DetectError::FileTooLarge { limit: 8, .. }));

    assert!(extractor.written.lock().is_empty());
    assert!(fx.scratch_is_empty());
    assert_eq!(pipeline.metrics().rejected.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn stuck_detector_times_out_to_unknown() {
    let fx = Fixture::new();
    let extractor = Arc::new(FakeExtractor { frames: 8, with_audio: true, ..Default::default() });
    let detectors = DetectorSet {
        physiological: Arc::new(Slow(Modality::Physiological, Duration::from_millis(2500))),
        ..fixed_detectors()
    };
    let pipeline = pipeline_with(
        Settings { detector_timeout_secs: 1, ..fx.settings() },
        detectors,
        Arc::clone(&extractor),
    );

    let resp = pipeline.process(&DetectionRequest::new(fx.video(), MediaKind::Video)).await.unwrap();

    assert_eq!(resp.physiological_score, Some(0.0));
    assert!(resp.degraded[&Modality::Physiological].starts_with("timeout"));
    assert_eq!(resp.fusion.modality_weights[&Modality::Physiological], 0.15);
    assert!(fx.scratch_is_empty());
}

#[test]
fn timed_out_detector_does_not_hold_up_runtime_shutdown() {
    let fx = Fixture::new();
    let extractor = Arc::new(FakeExtractor { frames: 8, with_audio: true, ..Default::default() });
    let detectors = DetectorSet {
        vision: Arc::new(Slow(Modality::Vision, Duration::from_millis(4000))),
        ..fixed_detectors()
    };
    let settings = Settings { detector_timeout_secs: 1, shutdown_grace_secs: 0, ..fx.settings() };
    let grace = settings.shutdown_grace();
    let pipeline = pipeline_with(settings, detectors, Arc::clone(&extractor));

    let started = std::time::Instant::now();
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap();
    let resp = runtime
        .block_on(pipeline.process(&DetectionRequest::new(fx.video(), MediaKind::Video)))
        .unwrap();
    runtime.shutdown_timeout(grace);

    assert!(resp.degraded[&Modality::Vision].starts_with("timeout"));
    assert!(started.elapsed() < Duration::from_millis(3000), "exit waited {:?}", started.elapsed());
    assert!(fx.scratch_is_empty());
}

#[tokio::test]
async fn cancelled_request_still_releases_artifacts() {
    let fx = Fixture::new();
    let extractor = Arc::new(FakeExtractor { frames: 8, with_audio: true, ..Default::default() });
    let detectors = DetectorSet {
        vision: Arc::new(Slow(Modality::Vision, Duration::from_millis(3000))),
        ..fixed_detectors()
    };
    let pipeline = pipeline_with(fx.settings(), detectors, Arc::clone(&extractor));

    let request = DetectionRequest::new(fx.video(), MediaKind::Video);
    let outcome = tokio::time::timeout(Duration::from_millis(800), pipeline.process(&request)).await;

    assert!(outcome.is_err());
    assert!(!extractor.written.lock().is_empty());
    assert!(extractor.written.lock().iter().all(|p| !p.exists()));
    assert!(fx.scratch_is_empty());
    assert_eq!(pipeline.metrics().in_flight.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn concurrent_requests_use_separate_directories() {
    let fx = Fixture::new();
    let extractor = Arc::new(FakeExtractor { frames: 6, with_audio: true, ..Default::default() });
    let pipeline = Arc::new(pipeline_with(fx.settings(), fixed_detectors(), Arc::clone(&extractor)));
    let video = fx.video();

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            let request = DetectionRequest::new(video.clone(), MediaKind::Video);
            tokio::spawn(async move { pipeline.process(&request).await })
        })
        .collect();

    let mut ids = Vec::new();
    for t in tasks {
        ids.push(t.await.unwrap().unwrap().request_id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);

    let written = extractor.written.lock();
    let dirs: std::collections::BTreeSet<_> = written.iter().filter_map(|p| p.parent()).collect();
    assert_eq!(dirs.len(), 4);
    assert!(written.iter().all(|p| !p.exists()));
    assert!(fx.scratch_is_empty());
}
