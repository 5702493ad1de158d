//! facematch-core: live similarity between a reference face and a frame stream.
//!
//! Frames pass through a keep-latest single-slot mailbox to one worker per
//! session, which locates the first face, crops it, embeds it and scores it
//! against the cached reference embedding. Detection and embedding are
//! pluggable; SCRFD and a generic ONNX recognizer are bundled.

pub mod config;
pub mod detector;
pub mod imaging;
pub mod mailbox;
pub mod pipeline;
pub mod recognizer;
pub mod reference;
pub mod session;
pub mod similarity;
pub mod sink;
pub mod types;

use std::path::PathBuf;

pub use config::{ConfigError, SessionConfig, ValidatedConfig};
pub use detector::{DetectorError, FaceLocator, ScrfdDetector};
pub use pipeline::{FrameError, PipelineStats};
pub use recognizer::{EmbeddingProvider, OnnxRecognizer, RecognizerError, RecognizerSpec};
pub use reference::{ReferenceCache, ReferenceError, ReferenceState, ReferenceStatus, ReferenceTicket};
pub use session::{FrameDisposition, Session, SessionError};
pub use similarity::{classify, score, SimilarityEngine, SimilarityError};
pub use sink::ScoreSink;
pub use types::{
    BoundingBox, Embedding, FrameOutcome, FrameTask, PixelLayout, RawFrame, Rotation, ScoreReport,
    NO_FACE_SENTINEL,
};

/// Default directory for ONNX model files: `$XDG_DATA_HOME/facematch/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facematch")
        .join("models")
}
