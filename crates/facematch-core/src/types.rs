use crate::similarity::{SimilarityError, NORM_EPSILON};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounding box for a detected face in image pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub confidence: f32,
}

/// Integer crop rectangle that lies entirely inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self { left, top, right, bottom, confidence: 1.0 }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Clamp to `[0, width) x [0, height)` and snap to whole pixels.
    ///
    /// Returns `None` when nothing of the box survives (zero area, NaN
    /// coordinates, or entirely outside the image).
    pub fn clamp(&self, width: u32, height: u32) -> Option<PixelRect> {
        let coords = [self.left, self.top, self.right, self.bottom];
        if coords.iter().any(|c| !c.is_finite()) {
            return None;
        }

        let left = self.left.floor().clamp(0.0, width as f32) as u32;
        let top = self.top.floor().clamp(0.0, height as f32) as u32;
        let right = self.right.ceil().clamp(0.0, width as f32) as u32;
        let bottom = self.bottom.ceil().clamp(0.0, height as f32) as u32;

        if right <= left || bottom <= top {
            return None;
        }

        Some(PixelRect {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        })
    }
}

/// Face embedding vector (model output dimension, e.g. 128).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    /// Wrap values as-is. Scoring still divides by the real norms.
    pub fn from_values(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// L2-normalize raw model output.
    pub fn normalized(raw: Vec<f32>) -> Result<Self, SimilarityError> {
        let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        if !norm.is_finite() || norm <= NORM_EPSILON {
            return Err(SimilarityError::DegenerateEmbedding);
        }
        Ok(Self {
            values: raw.into_iter().map(|x| x / norm).collect(),
        })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }
}

/// Memory layout of the pixel bytes in a [`RawFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    /// Packed 8-bit RGB, 3 bytes/pixel.
    Rgb8,
    /// Packed 8-bit RGBA, 4 bytes/pixel. Alpha is discarded.
    Rgba8,
    /// 8-bit grayscale, 1 byte/pixel.
    Gray8,
    /// YUYV 4:2:2 packed, 2 bytes/pixel.
    Yuyv,
    /// NV21 4:2:0: full Y plane followed by interleaved V/U at quarter resolution.
    Nv21,
}

/// Clockwise rotation needed to bring an image upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Normalize any multiple of 90 degrees (negative values allowed).
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        if degrees % 90 != 0 {
            return None;
        }
        match degrees.rem_euclid(360) {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> i32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }
}

/// Raw camera pixels as delivered by the producer.
#[derive(Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("bytes", &self.data.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layout", &self.layout)
            .finish()
    }
}

/// A single camera frame handed to the pipeline.
#[derive(Debug, Clone)]
pub struct FrameTask {
    pub frame: RawFrame,
    pub rotation: Rotation,
    /// Monotonically increasing per producer.
    pub sequence: u64,
}

/// Result of scoring one processed frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameOutcome {
    NoFaceDetected,
    Scored {
        /// Cosine similarity in [-1, 1].
        similarity: f32,
        matched: bool,
    },
}

/// Value emitted for "no face" by consumers that expect a bare float.
pub const NO_FACE_SENTINEL: f32 = -1.0;

impl FrameOutcome {
    pub fn matched(&self) -> bool {
        matches!(self, Self::Scored { matched: true, .. })
    }

    pub fn similarity(&self) -> Option<f32> {
        match self {
            Self::Scored { similarity, .. } => Some(*similarity),
            Self::NoFaceDetected => None,
        }
    }

    /// Single-float encoding where no face maps to [`NO_FACE_SENTINEL`].
    pub fn legacy_value(&self) -> f32 {
        self.similarity().unwrap_or(NO_FACE_SENTINEL)
    }
}

/// One emitted score, delivered to the [`crate::sink::ScoreSink`].
#[derive(Debug, Clone, Serialize)]
pub struct ScoreReport {
    pub sequence: u64,
    pub outcome: FrameOutcome,
    /// Wall time spent processing the frame on the worker.
    pub elapsed: Duration,
}
