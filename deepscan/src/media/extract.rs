// deepscan/src/media/extract.rs
//
// Frame + audio extraction from video containers.
//
// Contract: given a video and the request's scratch directory, return the
// ordered frame paths, the audio path (None when the container has no usable
// audio track) and every file written, so the caller can release them.
// A video that yields no frames is a fatal extraction error; missing audio is not.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::ExtractionSettings;
use crate::error::DetectError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub frames: Vec<PathBuf>,
    pub audio: Option<PathBuf>,
    pub temp_files: Vec<PathBuf>,
}

#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn extract(&self, video: &Path, out_dir: &Path) -> Result<Extraction, DetectError>;
}

pub struct FfmpegExtractor {
    settings: ExtractionSettings,
}

impl FfmpegExtractor {
    pub fn new(settings: ExtractionSettings) -> Self {
        Self { settings }
    }

    async fn run(&self, args: &[&OsStr]) -> Result<(), String> {
        let out = Command::new(&self.settings.ffmpeg)
            .args(["-nostdin", "-hide_banner", "-loglevel", "error", "-y"])
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("cannot run {}: {}", self.settings.ffmpeg.display(), e))?;
        if out.status.success() {
            Ok(())
        } else {
            Err(format!(
                "{} exited with {}: {}",
                self.settings.ffmpeg.display(),
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ))
        }
    }

    async fn extract_frames(&self, video: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, DetectError> {
        let pattern    = out_dir.join("frame_%05d.png");
        let max_frames = self.settings.max_frames.to_string();
        let run = self
            .run(&[
                OsStr::new("-i"), video.as_os_str(),
                OsStr::new("-frames:v"), OsStr::new(&max_frames),
                OsStr::new("-vsync"), OsStr::new("0"),
                pattern.as_os_str(),
            ])
            .await;

        // Collect whatever was written even on failure so it can be reported.
        let frames = list_frames(out_dir).await?;
        if let Err(e) = run {
            return Err(DetectError::Extraction(e));
        }
        if frames.is_empty() {
            return Err(DetectError::Extraction(format!("no frames decoded from {}", video.display())));
        }
        Ok(frames)
    }

    async fn extract_audio(&self, video: &Path, out_dir: &Path) -> Option<PathBuf> {
        let wav         = out_dir.join("audio.wav");
        let sample_rate = self.settings.audio_sample_rate.to_string();
        let channels    = self.settings.audio_channels.to_string();
        let run = self
            .run(&[
                OsStr::new("-i"), video.as_os_str(),
                OsStr::new("-vn"),
                OsStr::new("-acodec"), OsStr::new("pcm_s16le"),
                OsStr::new("-ar"), OsStr::new(&sample_rate),
                OsStr::new("-ac"), OsStr::new(&channels),
                wav.as_os_str(),
            ])
            .await;
        match run {
            Ok(()) if wav.exists() => Some(wav),
            Ok(()) => None,
            Err(e) => {
                warn!("audio extraction failed for {}: {}", video.display(), e);
                None
            }
        }
    }
}

#[async_trait]
impl MediaExtractor for FfmpegExtractor {
    async fn extract(&self, video: &Path, out_dir: &Path) -> Result<Extraction, DetectError> {
        let frames = self.extract_frames(video, out_dir).await?;
        let audio  = self.extract_audio(video, out_dir).await;

        // A failed audio run can still leave a partial file behind.
        let mut temp_files = frames.clone();
        let wav = out_dir.join("audio.wav");
        if wav.exists() {
            temp_files.push(wav);
        }
        debug!("extracted frames={} audio={}", frames.len(), audio.is_some());
        Ok(Extraction { frames, audio, temp_files })
    }
}

/// `frame_*.png` files in `dir`, in name (= decode) order.
async fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, DetectError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut frames = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("frame_") && name.ends_with(".png") {
            frames.push(entry.path());
        }
    }
    frames.sort();
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_frames_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["frame_00002.png", "frame_00001.png", "audio.wav", "upload.mp4", "frame_00010.png"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let frames = list_frames(dir.path()).await.unwrap();
        let names: Vec<_> = frames.iter().map(|p| p.file_name().unwrap().to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["frame_00001.png", "frame_00002.png", "frame_00010.png"]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FfmpegExtractor::new(ExtractionSettings {
            ffmpeg: PathBuf::from("/nonexistent/deepscan-ffmpeg"),
            ..ExtractionSettings::default()
        });
        let err = extractor.extract(Path::new("/tmp/whatever.mp4"), dir.path()).await.unwrap_err();
        assert!(matches!(err, DetectError::Extraction(_)), "{err}");
    }
}
