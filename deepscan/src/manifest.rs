// deepscan/src/manifest.rs
//
// JSONL request manifests for the batch and eval modes.
//
//   {"path": "clips/a.mp4"}                                  kind from extension
//   {"path": "faces/b.png", "kind": "image", "explain": true}
//   {"path": "clips/c.mov", "label": "fake"}                 ground truth for eval
//
// Relative paths resolve against the manifest's directory. Malformed lines
// are logged and skipped.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::Settings;
use crate::engine::pipeline::kind_for_path;
use crate::types::{DetectionRequest, MediaKind, Verdict};

#[derive(Debug, Deserialize)]
struct Entry {
    path: PathBuf,
    #[serde(default)]
    kind: Option<MediaKind>,
    #[serde(default)]
    explain: bool,
    #[serde(default)]
    label: Option<Verdict>,
}

pub async fn read_manifest(path: &Path, settings: &Settings) -> Result<Vec<DetectionRequest>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading manifest {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let requests = parse_manifest(&content, base, settings);
    info!("Loaded {} requests from {}", requests.len(), path.display());
    Ok(requests)
}

pub fn parse_manifest(content: &str, base: &Path, settings: &Settings) -> Vec<DetectionRequest> {
    let mut requests = Vec::new();
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') { continue; }

        let entry = match serde_json::from_str::<Entry>(line) {
            Ok(e) => e,
            Err(e) => {
                warn!("manifest line {}: {}", n + 1, e);
                continue;
            }
        };
        let path = if entry.path.is_absolute() { entry.path } else { base.join(entry.path) };
        let Some(kind) = entry.kind.or_else(|| kind_for_path(settings, &path)) else {
            warn!("manifest line {}: cannot infer media kind of {}", n + 1, path.display());
            continue;
        };
        requests.push(DetectionRequest { path, kind, explain: entry.explain, label: entry.label });
    }
    requests
}
