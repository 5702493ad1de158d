use crate::similarity::DEFAULT_THRESHOLD;
use crate::types::Rotation;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reference images from portrait-held phone cameras arrive rotated a quarter turn.
pub const DEFAULT_REFERENCE_ROTATION: i32 = 90;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reference image is empty")]
    MissingReferenceImage,
    #[error("similarity threshold must be a finite value in [-1, 1], got {0}")]
    InvalidThreshold(f32),
    #[error("reference rotation must be a multiple of 90 degrees, got {0}")]
    InvalidRotation(i32),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Session settings, supplied once when the session is configured.
///
/// Everything except the reference image can be loaded from TOML:
///
/// ```toml
/// similarity_threshold = 0.55
/// reference_rotation = 270
/// show_score_overlay = false
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Encoded reference image (JPEG, PNG, ...).
    #[serde(skip)]
    pub reference_image: Vec<u8>,
    /// Minimum cosine similarity for a match (default 0.5).
    pub similarity_threshold: f32,
    /// Clockwise rotation applied to the reference image (default 90).
    pub reference_rotation: i32,
    /// Display hint for the host UI; not used by the pipeline.
    pub show_reference_preview: bool,
    /// Display hint for the host UI; not used by the pipeline.
    pub show_score_overlay: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reference_image: Vec::new(),
            similarity_threshold: DEFAULT_THRESHOLD,
            reference_rotation: DEFAULT_REFERENCE_ROTATION,
            show_reference_preview: true,
            show_score_overlay: true,
        }
    }
}

/// A [`SessionConfig`] that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValidatedConfig {
    pub similarity_threshold: f32,
    pub reference_rotation: Rotation,
    pub show_reference_preview: bool,
    pub show_score_overlay: bool,
}

impl SessionConfig {
    pub fn new(reference_image: Vec<u8>) -> Self {
        Self {
            reference_image,
            ..Self::default()
        }
    }

    /// Parse settings from TOML. The reference image must be attached separately.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn with_reference_image(mut self, reference_image: Vec<u8>) -> Self {
        self.reference_image = reference_image;
        self
    }

    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        if self.reference_image.is_empty() {
            return Err(ConfigError::MissingReferenceImage);
        }

        let threshold = self.similarity_threshold;
        if !threshold.is_finite() || !(-1.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidThreshold(threshold));
        }

        let rotation = Rotation::from_degrees(self.reference_rotation)
            .ok_or(ConfigError::InvalidRotation(self.reference_rotation))?;

        Ok(ValidatedConfig {
            similarity_threshold: threshold,
            reference_rotation: rotation,
            show_reference_preview: self.show_reference_preview,
            show_score_overlay: self.show_score_overlay,
        })
    }
}
