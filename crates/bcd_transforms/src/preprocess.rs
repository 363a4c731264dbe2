//! Image-to-tensor preprocessing.

use std::io::Cursor;
use std::path::Path;

use bcd_core::{BcdError, ImageTensor, Result, TARGET_HEIGHT, TARGET_WIDTH};
use image::{DynamicImage, GrayImage, ImageReader, Luma, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clahe::{Clahe, ClaheConfig};
use crate::resize::{Resize, ResizeFilter};
use crate::transform::{Compose, ImageTransform};

/// Configuration for [`Preprocessor`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Local contrast enhancement.
    pub clahe: ClaheConfig,
    /// Interpolation used when resizing to 224×224.
    pub filter: ResizeFilter,
}

/// Turns raw images into [`ImageTensor`]s.
///
/// Pipeline: decode as grayscale → CLAHE → resize to 224×224 → replicate the
/// channel three times. Values stay in pixel range; network-specific
/// normalization happens inside the classifier.
pub struct Preprocessor {
    config: PreprocessConfig,
    pipeline: Compose,
}

impl Preprocessor {
    /// Build a preprocessor.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Input`] for an invalid CLAHE configuration.
    pub fn new(config: PreprocessConfig) -> Result<Self> {
        let pipeline = Compose::new()
            .then(Clahe::new(config.clahe)?)
            .then(Resize::new(
                TARGET_WIDTH as u32,
                TARGET_HEIGHT as u32,
                config.filter,
            ));
        Ok(Self { config, pipeline })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Preprocess the image stored at `path`.
    ///
    /// The format is sniffed from the content, not the extension.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Input`] if the file cannot be opened or decoded.
    pub fn preprocess(&self, path: impl AsRef<Path>) -> Result<ImageTensor> {
        let path = path.as_ref();
        let image = ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|e| {
                BcdError::input(format!("Could not open image {}: {e}", path.display()))
            })?
            .decode()
            .map_err(|e| {
                BcdError::input(format!("Could not decode image {}: {e}", path.display()))
            })?;
        self.preprocess_dynamic(image)
    }

    /// Preprocess an encoded image held in memory.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Input`] if the bytes cannot be decoded.
    pub fn preprocess_bytes(&self, bytes: &[u8]) -> Result<ImageTensor> {
        let image = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| BcdError::input(format!("Could not read image bytes: {e}")))?
            .decode()
            .map_err(|e| BcdError::input(format!("Could not decode image bytes: {e}")))?;
        self.preprocess_dynamic(image)
    }

    /// Preprocess an already decoded grayscale image.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Input`] for an empty image.
    pub fn preprocess_luma(&self, image: GrayImage) -> Result<ImageTensor> {
        let (width, height) = image.dimensions();
        let resized = self.pipeline.apply(image)?;
        debug!(width, height, "preprocessed image to 224x224x3");
        ImageTensor::from_rgb(&replicate_channels(&resized))
    }

    fn preprocess_dynamic(&self, image: DynamicImage) -> Result<ImageTensor> {
        self.preprocess_luma(to_luma_bt601(&image))
    }
}

/// Fixed-point BT.601 weights (0.299, 0.587, 0.114) scaled by `2^14`.
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;
const LUMA_SHIFT: u32 = 14;

/// Grayscale conversion with BT.601 weights and round-half-up.
///
/// `DynamicImage::to_luma8` weights channels with Rec.709 coefficients, which
/// disagrees with common decoders on colour inputs. Gray inputs pass through
/// unchanged; alpha is ignored.
fn to_luma_bt601(image: &DynamicImage) -> GrayImage {
    if let DynamicImage::ImageLuma8(gray) = image {
        return gray.clone();
    }
    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let weighted = u32::from(r) * LUMA_R + u32::from(g) * LUMA_G + u32::from(b) * LUMA_B;
        Luma([((weighted + (1 << (LUMA_SHIFT - 1))) >> LUMA_SHIFT) as u8])
    })
}

fn replicate_channels(gray: &GrayImage) -> RgbImage {
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y).0[0];
        Rgb([v, v, v])
    })
}
