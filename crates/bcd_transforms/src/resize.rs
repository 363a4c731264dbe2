//! Deterministic resize to a fixed resolution.

use bcd_core::{BcdError, Result};
use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::transform::ImageTransform;

/// Interpolation filter for [`Resize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFilter {
    /// Nearest neighbour.
    Nearest,
    /// Bilinear (triangle).
    Bilinear,
    /// Bicubic (Catmull-Rom).
    #[default]
    Bicubic,
    /// Lanczos with window 3.
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Bilinear => FilterType::Triangle,
            ResizeFilter::Bicubic => FilterType::CatmullRom,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Resizes to exactly `width × height`, ignoring aspect ratio.
#[derive(Debug, Clone)]
pub struct Resize {
    width: u32,
    height: u32,
    filter: ResizeFilter,
}

impl Resize {
    /// Create a resize transform.
    #[must_use]
    pub fn new(width: u32, height: u32, filter: ResizeFilter) -> Self {
        Self {
            width,
            height,
            filter,
        }
    }
}

impl ImageTransform for Resize {
    fn apply(&self, image: GrayImage) -> Result<GrayImage> {
        if image.width() == 0 || image.height() == 0 {
            return Err(BcdError::input("cannot resize an empty image"));
        }
        if image.dimensions() == (self.width, self.height) {
            return Ok(image);
        }
        Ok(imageops::resize(
            &image,
            self.width,
            self.height,
            self.filter.into(),
        ))
    }

    fn name(&self) -> &str {
        "Resize"
    }
}
