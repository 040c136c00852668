// deepscan/src/main.rs
//
// Deepscan: multi-modal deepfake detection.
//
// Four modes:
//   image  score one image, JSON response on stdout
//   video  score one video (requires ffmpeg on PATH or --ffmpeg)
//   batch  score every entry of a JSONL manifest, JSONL results
//   eval   score a labeled manifest, print precision / recall / F1 report
//
// Usage:
//   deepscan --mode image --path face.png --explain
//   deepscan --mode video --path clip.mp4
//   deepscan --mode batch --path requests.jsonl --concurrency 8 --output results.jsonl
//   deepscan --mode eval  --path labeled.jsonl --metrics-port 9091

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde_json::json;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use deepscan::error::DetectError;
use deepscan::eval::Evaluator;
use deepscan::manifest::read_manifest;
use deepscan::metrics::{DeepscanMetrics, MetricsServer};
use deepscan::{DetectionRequest, DetectionResponse, MediaKind, Pipeline, Settings};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "deepscan",
    about   = "Multi-modal deepfake detection with reliability-weighted fusion",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum)]
    mode: Mode,

    #[arg(long, help = "Media file (image/video) or JSONL manifest (batch/eval)")]
    path: PathBuf,

    #[arg(long, help = "TOML settings file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Attach a text explanation to single-file responses")]
    explain: bool,

    #[arg(long, default_value = "4", help = "Requests processed at once (batch/eval)")]
    concurrency: usize,

    #[arg(long, help = "Write results here instead of stdout")]
    output: Option<PathBuf>,

    #[arg(long, help = "Serve Prometheus metrics on this port")]
    metrics_port: Option<u16>,

    #[arg(long, help = "Emit the eval report as JSON")]
    json: bool,

    #[arg(long, help = "ffmpeg binary (overrides config)")]
    ffmpeg: Option<PathBuf>,

    #[arg(long, help = "Parent directory for per-request temp files (overrides config)")]
    temp_root: Option<PathBuf>,

    #[arg(long, help = "Per-detector deadline in seconds (overrides config)")]
    detector_timeout: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Image,
    Video,
    Batch,
    Eval,
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref())?;
        if let Some(ffmpeg) = &self.ffmpeg {
            settings.extraction.ffmpeg = ffmpeg.clone();
        }
        if let Some(root) = &self.temp_root {
            settings.temp_root = Some(root.clone());
        }
        if let Some(secs) = self.detector_timeout {
            settings.detector_timeout_secs = secs;
        }
        Ok(settings)
    }
}

// ── Output ────────────────────────────────────────────────────────────────────

async fn open_output(path: Option<&PathBuf>) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
    Ok(match path {
        Some(p) => Box::new(
            tokio::fs::File::create(p)
                .await
                .with_context(|| format!("creating {}", p.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    })
}

fn error_line(request: &DetectionRequest, e: &DetectError) -> String {
    json!({
        "path":     request.path,
        "error":    e.to_string(),
        "rejected": e.is_rejection(),
    })
    .to_string()
}

// ── Fan-out over a manifest ───────────────────────────────────────────────────

type Completed = (DetectionRequest, Result<DetectionResponse, DetectError>);

/// Process `requests` with at most `concurrency` in flight. Results arrive in
/// completion order.
fn spawn_requests(pipeline: Arc<Pipeline>, requests: Vec<DetectionRequest>, concurrency: usize) -> mpsc::Receiver<Completed> {
    let (tx, rx) = mpsc::channel::<Completed>(concurrency.max(1) * 2);
    let permits  = Arc::new(Semaphore::new(concurrency.max(1)));

    tokio::spawn(async move {
        for request in requests {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else { break };
            let pipeline = Arc::clone(&pipeline);
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = pipeline.process(&request).await;
                drop(permit);
                tx.send((request, result)).await.ok();
            });
        }
    });
    rx
}

async fn run_batch(pipeline: Arc<Pipeline>, cli: &Cli) -> Result<()> {
    let requests = read_manifest(&cli.path, pipeline.settings()).await?;
    let total    = requests.len();
    let mut out  = open_output(cli.output.as_ref()).await?;
    let mut rx   = spawn_requests(pipeline, requests, cli.concurrency);

    let (mut ok, mut failed) = (0usize, 0usize);
    while let Some((request, result)) = rx.recv().await {
        let line = match result {
            Ok(resp) => {
                ok += 1;
                json!({ "path": request.path, "result": resp }).to_string()
            }
            Err(e) => {
                failed += 1;
                error_line(&request, &e)
            }
        };
        out.write_all(line.as_bytes()).await?;
        out.write_all(b"\n").await?;
    }
    out.flush().await?;
    info!("batch complete total={} ok={} failed={}", total, ok, failed);
    Ok(())
}

async fn run_eval(pipeline: Arc<Pipeline>, cli: &Cli) -> Result<()> {
    let requests: Vec<DetectionRequest> = read_manifest(&cli.path, pipeline.settings())
        .await?
        .into_iter()
        .filter(|r| {
            if r.label.is_none() {
                warn!("eval: skipping unlabeled {}", r.path.display());
            }
            r.label.is_some()
        })
        .collect();

    let evaluator = Evaluator::new();
    let mut rx    = spawn_requests(pipeline, requests, cli.concurrency);
    while let Some((request, result)) = rx.recv().await {
        match (request.label, result) {
            (Some(label), Ok(resp)) => evaluator.record(label, &resp),
            (_, Ok(_)) => {}
            (_, Err(e)) => {
                warn!("eval: {} failed: {}", request.path.display(), e);
                evaluator.record_failure();
            }
        }
    }

    let result = evaluator.finish();
    let report = if cli.json {
        serde_json::to_string_pretty(&result.to_json())?
    } else {
        result.markdown()
    };
    let mut out = open_output(cli.output.as_ref()).await?;
    out.write_all(report.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await?;
    Ok(())
}

async fn run_single(pipeline: Arc<Pipeline>, cli: &Cli, kind: MediaKind) -> Result<()> {
    let mut request = DetectionRequest::new(cli.path.clone(), kind);
    request.explain = cli.explain;

    let response = pipeline.process(&request).await?;
    let mut out  = open_output(cli.output.as_ref()).await?;
    out.write_all(serde_json::to_string_pretty(&response)?.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await?;
    Ok(())
}

// ── Main ──────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("deepscan=info".parse()?))
        .with_writer(std::io::stderr)
        .compact().init();

    let cli      = Cli::parse();
    let settings = cli.settings()?;
    let grace    = settings.shutdown_grace();

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let result  = runtime.block_on(run(cli, settings));
    // Detectors abandoned at their deadline may still hold blocking threads.
    runtime.shutdown_timeout(grace);
    result
}

async fn run(cli: Cli, settings: Settings) -> Result<()> {
    let metrics = DeepscanMetrics::new();
    let start   = Instant::now();

    if let Some(port) = cli.metrics_port {
        let server = MetricsServer::bind(Arc::clone(&metrics), SocketAddr::from(([0, 0, 0, 0], port))).await?;
        tokio::spawn(async move {
            if let Err(e) = server.serve().await {
                error!("metrics endpoint stopped: {}", e);
            }
        });
    }

    info!(
        "deepscan {} model={} timeout={}s",
        env!("CARGO_PKG_VERSION"), settings.model_version, settings.detector_timeout_secs
    );
    let pipeline = Arc::new(Pipeline::baseline(settings, metrics));

    match cli.mode {
        Mode::Image => run_single(pipeline, &cli, MediaKind::Image).await?,
        Mode::Video => run_single(pipeline, &cli, MediaKind::Video).await?,
        Mode::Batch => run_batch(pipeline, &cli).await?,
        Mode::Eval  => run_eval(pipeline, &cli).await?,
    }

    info!("finished in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}
