//! Media handling: frame and audio decoding, extraction from containers and
//! per-request temporary artifacts.

pub mod artifacts;
pub mod audio;
pub mod extract;
pub mod frames;

pub use artifacts::RequestArtifacts;
pub use audio::{load_wav_mono, AudioTrack};
pub use extract::{Extraction, FfmpegExtractor, MediaExtractor};
pub use frames::{CentralFaceLocator, FaceLocator, FaceRegion, Frame};
