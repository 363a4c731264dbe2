//! Preprocessed image tensor.

use burn::prelude::*;
use image::{Rgb, RgbImage};

use crate::error::{BcdError, Result};

/// Height of every preprocessed image.
pub const TARGET_HEIGHT: usize = 224;
/// Width of every preprocessed image.
pub const TARGET_WIDTH: usize = 224;
/// Channels of every preprocessed image.
pub const CHANNELS: usize = 3;

const LEN: usize = TARGET_HEIGHT * TARGET_WIDTH * CHANNELS;

/// A preprocessed image of shape `(224, 224, 3)`.
///
/// Values are pixel intensities in `[0, 255]`, stored row-major in `(H, W, C)`
/// order. The type can only be built through validating constructors and is
/// immutable afterwards, so the classifier and both explainers see exactly the
/// same input.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
}

impl ImageTensor {
    /// Wrap raw `(H, W, C)` data.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Input`] if the length is not `224 * 224 * 3` or a
    /// value is non-finite or outside `[0, 255]`.
    pub fn new(data: Vec<f32>) -> Result<Self> {
        if data.len() != LEN {
            return Err(BcdError::input(format!(
                "expected {LEN} values for a ({TARGET_HEIGHT}, {TARGET_WIDTH}, {CHANNELS}) image, got {}",
                data.len()
            )));
        }
        if let Some(bad) = data
            .iter()
            .find(|v| !v.is_finite() || **v < 0.0 || **v > 255.0)
        {
            return Err(BcdError::input(format!(
                "pixel value {bad} outside [0, 255]"
            )));
        }
        Ok(Self { data })
    }

    /// Build from an 8-bit RGB image of the target size.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Input`] if the image is not 224×224.
    pub fn from_rgb(image: &RgbImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        if width as usize != TARGET_WIDTH || height as usize != TARGET_HEIGHT {
            return Err(BcdError::input(format!(
                "expected a {TARGET_WIDTH}x{TARGET_HEIGHT} image, got {width}x{height}"
            )));
        }
        let data = image.as_raw().iter().map(|&v| f32::from(v)).collect();
        Ok(Self { data })
    }

    /// Shape as `[height, width, channels]`.
    #[must_use]
    pub const fn shape(&self) -> [usize; 3] {
        [TARGET_HEIGHT, TARGET_WIDTH, CHANNELS]
    }

    /// Raw `(H, W, C)` values.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Value at row `y`, column `x`, channel `c`.
    #[must_use]
    pub fn get(&self, y: usize, x: usize, c: usize) -> f32 {
        self.data[(y * TARGET_WIDTH + x) * CHANNELS + c]
    }

    /// Largest value in the image.
    #[must_use]
    pub fn max_value(&self) -> f32 {
        self.data.iter().copied().fold(0.0, f32::max)
    }

    /// Convert to an 8-bit RGB image, truncating towards zero.
    #[must_use]
    pub fn to_rgb_image(&self) -> RgbImage {
        RgbImage::from_fn(TARGET_WIDTH as u32, TARGET_HEIGHT as u32, |x, y| {
            let base = (y as usize * TARGET_WIDTH + x as usize) * CHANNELS;
            Rgb([
                self.data[base] as u8,
                self.data[base + 1] as u8,
                self.data[base + 2] as u8,
            ])
        })
    }

    /// Convert to a `(1, C, H, W)` tensor.
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4> {
        let data = TensorData::new(self.to_chw(), [1, CHANNELS, TARGET_HEIGHT, TARGET_WIDTH]);
        Tensor::from_data(data, device)
    }

    /// Stack several images into one `(N, C, H, W)` tensor.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Input`] if `images` is empty.
    pub fn batch_to_tensor<B: Backend>(
        images: &[ImageTensor],
        device: &B::Device,
    ) -> Result<Tensor<B, 4>> {
        if images.is_empty() {
            return Err(BcdError::input("cannot build a tensor from an empty batch"));
        }
        let mut values = Vec::with_capacity(images.len() * LEN);
        for image in images {
            values.extend(image.to_chw());
        }
        let data = TensorData::new(
            values,
            [images.len(), CHANNELS, TARGET_HEIGHT, TARGET_WIDTH],
        );
        Ok(Tensor::from_data(data, device))
    }

    fn to_chw(&self) -> Vec<f32> {
        let plane = TARGET_HEIGHT * TARGET_WIDTH;
        let mut chw = vec![0.0f32; LEN];
        for (i, pixel) in self.data.chunks_exact(CHANNELS).enumerate() {
            for (c, value) in pixel.iter().enumerate() {
                chw[c * plane + i] = *value;
            }
        }
        chw
    }
}
