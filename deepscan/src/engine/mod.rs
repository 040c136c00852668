pub mod fusion;
pub mod pipeline;

pub use fusion::{FusionConfig, FusionEngine};
pub use pipeline::Pipeline;
