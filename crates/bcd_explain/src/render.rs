//! Encoding rendered explanations.

use std::fmt;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::{ExplainError, Result};

/// Output encoding for explanation images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EncodeFormat {
    /// Baseline JPEG with the given quality (1-100).
    Jpeg {
        /// Encoder quality.
        quality: u8,
    },
    /// Lossless PNG.
    Png,
}

impl Default for EncodeFormat {
    fn default() -> Self {
        Self::Jpeg { quality: 95 }
    }
}

impl EncodeFormat {
    /// MIME type of the encoded bytes.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg { .. } => "image/jpeg",
            Self::Png => "image/png",
        }
    }

    /// Conventional file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg { .. } => "jpg",
            Self::Png => "png",
        }
    }

    /// Encode an RGB image.
    ///
    /// # Errors
    ///
    /// Returns [`ExplainError::Encode`] if the encoder fails.
    pub fn encode(&self, image: &RgbImage) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        let result = match *self {
            Self::Jpeg { quality } => {
                image.write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100)))
            }
            Self::Png => image.write_with_encoder(PngEncoder::new(&mut bytes)),
        };
        result.map_err(|e| ExplainError::Encode(e.to_string()))?;
        Ok(bytes)
    }
}

/// Which explainer produced an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplanationKind {
    /// Grad-CAM heatmap overlay.
    Saliency,
    /// Superpixel surrogate mask.
    Surrogate,
}

impl fmt::Display for ExplanationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Saliency => f.write_str("gradcam"),
            Self::Surrogate => f.write_str("lime"),
        }
    }
}

/// An encoded explanation image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplanationImage {
    /// Producing explainer.
    pub kind: ExplanationKind,
    /// Encoding of `bytes`.
    pub format: EncodeFormat,
    /// Encoded image.
    pub bytes: Vec<u8>,
    /// Pixel width.
    pub width: u32,
    /// Pixel height.
    pub height: u32,
}

impl ExplanationImage {
    /// Encode `image` as an explanation of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ExplainError::Encode`] if encoding fails.
    pub fn encode(kind: ExplanationKind, image: &RgbImage, format: EncodeFormat) -> Result<Self> {
        Ok(Self {
            kind,
            format,
            bytes: format.encode(image)?,
            width: image.width(),
            height: image.height(),
        })
    }

    /// Suggested file name, e.g. `gradcam.jpg`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.kind, self.format.extension())
    }
}
