use facematch_core::config::DEFAULT_REFERENCE_ROTATION;
use facematch_core::similarity::DEFAULT_THRESHOLD;
use facematch_core::RecognizerSpec;
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD detection model file name, relative to `model_dir`.
    pub detector_model: String,
    /// Embedding model file name, relative to `model_dir`.
    pub embedder_model: String,
    /// Output dimension of the embedding model.
    pub embedding_dim: usize,
    /// Square input size of the embedding model.
    pub embedder_input: u32,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Clockwise rotation applied to the reference image.
    pub reference_rotation: i32,
    /// Replay rate for `run`, in frames per second.
    pub frame_rate: f64,
}

impl Config {
    /// Load configuration from `FACEMATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = RecognizerSpec::default();
        Self {
            model_dir: std::env::var("FACEMATCH_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| facematch_core::default_model_dir()),
            detector_model: std::env::var("FACEMATCH_DETECTOR_MODEL")
                .unwrap_or_else(|_| "det_500m.onnx".to_string()),
            embedder_model: std::env::var("FACEMATCH_EMBEDDER_MODEL")
                .unwrap_or_else(|_| "mobilefacenet.onnx".to_string()),
            embedding_dim: env_parse("FACEMATCH_EMBEDDING_DIM", defaults.dimension),
            embedder_input: env_parse("FACEMATCH_EMBEDDER_INPUT", defaults.input_size),
            similarity_threshold: env_parse("FACEMATCH_SIMILARITY_THRESHOLD", DEFAULT_THRESHOLD),
            reference_rotation: env_parse("FACEMATCH_REFERENCE_ROTATION", DEFAULT_REFERENCE_ROTATION),
            frame_rate: env_parse("FACEMATCH_FRAME_RATE", 30.0),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    /// Path to the embedding model.
    pub fn embedder_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.embedder_model)
    }

    pub fn recognizer_spec(&self) -> RecognizerSpec {
        RecognizerSpec {
            input_size: self.embedder_input,
            dimension: self.embedding_dim,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
