// deepscan/src/lib.rs
//
// Multi-modal deepfake detection.
//
//   media ──▶ detectors (vision ║ lip_sync ║ physiological) ──▶ fusion ──▶ response
//
// `engine::Pipeline` is the entry point; everything it depends on is injected
// so trained scorers, other extractors or fault-injecting fakes plug in
// through the traits in `scorers`, `detectors` and `media::extract`.

pub mod config;
pub mod detectors;
pub mod engine;
pub mod error;
pub mod eval;
pub mod explain;
pub mod manifest;
pub mod media;
pub mod metrics;
pub mod scorers;
pub mod signal;
pub mod types;

pub use config::Settings;
pub use engine::{FusionEngine, Pipeline};
pub use error::DetectError;
pub use types::{DetectionRequest, DetectionResponse, EvidenceSet, FusionResult, MediaKind, Modality};
