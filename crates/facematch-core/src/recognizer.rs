//! Embedding extraction: the [`EmbeddingProvider`] capability and its ONNX implementation.
//!
//! The bundled recognizer takes a square RGB face crop (MobileFaceNet/ArcFace
//! style, 112x112 by default) and returns an L2-normalized embedding.

use crate::similarity::SimilarityError;
use crate::types::Embedding;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DEFAULT_INPUT_SIZE: u32 = 112;
const DEFAULT_EMBEDDING_DIM: usize = 128;
const RECOGNIZER_MEAN: f32 = 127.5;
const RECOGNIZER_STD: f32 = 127.5; // symmetric: maps [0, 255] to [-1, 1]

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("input must be {expected:?}, got {actual:?}")]
    InputSize {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("embedding: {0}")]
    Embedding(#[from] SimilarityError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Turns a cropped, resized face into a fixed-length embedding.
///
/// Must be deterministic: the same input always yields the same output.
pub trait EmbeddingProvider: Send {
    /// Required input `(width, height)`; callers resize crops to this.
    fn input_size(&self) -> (u32, u32);

    /// Length of every embedding this provider returns.
    fn dimension(&self) -> usize;

    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, RecognizerError>;
}

/// Shape of the embedding model, agreed at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecognizerSpec {
    pub input_size: u32,
    pub dimension: usize,
}

impl Default for RecognizerSpec {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            dimension: DEFAULT_EMBEDDING_DIM,
        }
    }
}

/// ONNX face recognizer (MobileFaceNet, ArcFace, ...).
pub struct OnnxRecognizer {
    session: Session,
    spec: RecognizerSpec,
}

impl OnnxRecognizer {
    /// Load an embedding model from the given path.
    pub fn load(model_path: &Path, spec: RecognizerSpec) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            input_size = spec.input_size,
            dimension = spec.dimension,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self { session, spec })
    }

    /// Convert an RGB face crop into a normalized NCHW float tensor.
    fn preprocess(face: &RgbImage) -> Array4<f32> {
        let (w, h) = (face.width() as usize, face.height() as usize);
        let mut tensor = Array4::<f32>::zeros((1, 3, h, w));

        for (x, y, pixel) in face.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel.0[c] as f32 - RECOGNIZER_MEAN) / RECOGNIZER_STD;
            }
        }

        tensor
    }
}

impl EmbeddingProvider for OnnxRecognizer {
    fn input_size(&self) -> (u32, u32) {
        (self.spec.input_size, self.spec.input_size)
    }

    fn dimension(&self) -> usize {
        self.spec.dimension
    }

    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, RecognizerError> {
        let expected = self.input_size();
        if face.dimensions() != expected {
            return Err(RecognizerError::InputSize {
                expected,
                actual: face.dimensions(),
            });
        }

        let input = Self::preprocess(face);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw_data.len() != self.spec.dimension {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {}-dim embedding, got {}",
                self.spec.dimension,
                raw_data.len()
            )));
        }

        Ok(Embedding::normalized(raw_data.to_vec())?)
    }
}
