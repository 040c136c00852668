// deepscan/src/media/artifacts.rs
//
// Per-request temporary artifacts.
//
// Each request owns one uniquely named directory plus the list of files it
// created inside it (upload copy, extracted frames, extracted audio). Release
// happens exactly once: explicitly via `release()` on the normal path, or from
// `Drop` when the request errors, panics or is cancelled. Removal tolerates
// files that are already gone.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct RequestArtifacts {
    dir: Option<TempDir>,
    path: PathBuf,
    tracked: Vec<PathBuf>,
}

impl RequestArtifacts {
    pub fn create(root: Option<&Path>, request_id: &str) -> io::Result<Self> {
        let suffix = format!("-{request_id}");
        let mut builder = tempfile::Builder::new();
        builder.prefix("deepscan-").suffix(&suffix);
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();
        debug!("artifacts dir={}", path.display());
        Ok(Self { dir: Some(dir), path, tracked: Vec::new() })
    }

    pub fn dir(&self) -> &Path {
        &self.path
    }

    /// Reserve a tracked path inside the request directory.
    pub fn reserve(&mut self, file_name: &str) -> PathBuf {
        let p = self.path.join(file_name);
        self.track(p.clone());
        p
    }

    pub fn track(&mut self, path: PathBuf) {
        if !self.tracked.contains(&path) {
            self.tracked.push(path);
        }
    }

    pub fn track_all(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        for p in paths {
            self.track(p);
        }
    }

    /// Delete every tracked file, then the directory. Returns the number of
    /// files this call removed; a second call removes nothing.
    pub fn release(&mut self) -> usize {
        let mut removed = 0;
        for p in self.tracked.drain(..) {
            if !p.exists() {
                continue;
            }
            match std::fs::remove_file(&p) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("cannot remove artifact {}: {}", p.display(), e),
            }
        }
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                warn!("cannot remove artifacts dir {}: {}", self.path.display(), e);
            }
        }
        removed
    }
}

impl Drop for RequestArtifacts {
    fn drop(&mut self) {
        if self.dir.is_some() || !self.tracked.is_empty() {
            let removed = self.release();
            debug!("artifacts released on drop dir={} removed={}", self.path.display(), removed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_removes_each_file_once() {
        let root = tempfile::tempdir().unwrap();
        let mut a = RequestArtifacts::create(Some(root.path()), "req1").unwrap();
        let f1 = a.reserve("upload.mp4");
        let f2 = a.reserve("audio.wav");
        std::fs::write(&f1, b"x").unwrap();
        std::fs::write(&f2, b"y").unwrap();
        let dir = a.dir().to_path_buf();

        assert_eq!(a.release(), 2);
        assert!(!f1.exists() && !f2.exists() && !dir.exists());
        assert_eq!(a.release(), 0);
    }

    #[test]
    fn test_already_deleted_files_are_tolerated() {
        let mut a = RequestArtifacts::create(None, "req2").unwrap();
        let f = a.reserve("frame_00001.png");
        std::fs::write(&f, b"z").unwrap();
        std::fs::remove_file(&f).unwrap();
        a.track(a.dir().join("never_written.png"));
        assert_eq!(a.release(), 0);
    }

    #[test]
    fn test_drop_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let (dir, file) = {
            let mut a = RequestArtifacts::create(Some(root.path()), "req3").unwrap();
            let f = a.reserve("upload.png");
            std::fs::write(&f, b"x").unwrap();
            (a.dir().to_path_buf(), f)
        };
        assert!(!file.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn test_unique_dirs_per_request() {
        let a = RequestArtifacts::create(None, "same").unwrap();
        let b = RequestArtifacts::create(None, "same").unwrap();
        assert_ne!(a.dir(), b.dir());
    }
}
