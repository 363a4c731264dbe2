//! Contrast Limited Adaptive Histogram Equalization.
//!
//! The image is split into a grid of tiles. Each tile gets its own histogram
//! equalization lookup table, with histogram bins clipped at a limit and the
//! excess redistributed so noise in flat regions is not amplified. Output
//! pixels blend the lookup tables of the four nearest tiles bilinearly, which
//! removes tile seams.
//!
//! Semantics match the widely used OpenCV implementation: sides that are not a
//! multiple of the grid are padded by reflect-101 before histograms are taken,
//! the clip limit is scaled by `tile_area / 256`, and residual clipped counts
//! are spread with a fixed stride from bin 0.

use bcd_core::{BcdError, Result};
use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::transform::ImageTransform;

const BINS: usize = 256;

/// Configuration for [`Clahe`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaheConfig {
    /// Contrast limit relative to a uniform histogram. `0` disables clipping.
    pub clip_limit: f32,
    /// Number of tile columns.
    pub tiles_x: u32,
    /// Number of tile rows.
    pub tiles_y: u32,
}

impl Default for ClaheConfig {
    fn default() -> Self {
        Self {
            clip_limit: 2.0,
            tiles_x: 8,
            tiles_y: 8,
        }
    }
}

/// CLAHE transform.
#[derive(Debug, Clone)]
pub struct Clahe {
    config: ClaheConfig,
}

impl Clahe {
    /// Create a CLAHE transform.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Input`] for an empty tile grid or a negative or
    /// non-finite clip limit.
    pub fn new(config: ClaheConfig) -> Result<Self> {
        if config.tiles_x == 0 || config.tiles_y == 0 {
            return Err(BcdError::input("CLAHE tile grid must be at least 1x1"));
        }
        if !config.clip_limit.is_finite() || config.clip_limit < 0.0 {
            return Err(BcdError::input(format!(
                "invalid CLAHE clip limit {}",
                config.clip_limit
            )));
        }
        Ok(Self { config })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &ClaheConfig {
        &self.config
    }

    /// Equalize `image`, returning an image of the same size.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Input`] for an image with a zero dimension.
    pub fn equalize(&self, image: &GrayImage) -> Result<GrayImage> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(BcdError::input(format!(
                "cannot equalize a {width}x{height} image"
            )));
        }

        let width = width as usize;
        let height = height as usize;
        let tiles_x = self.config.tiles_x as usize;
        let tiles_y = self.config.tiles_y as usize;

        let padded_w = width.div_ceil(tiles_x) * tiles_x;
        let padded_h = height.div_ceil(tiles_y) * tiles_y;
        let tile_w = padded_w / tiles_x;
        let tile_h = padded_h / tiles_y;

        let src = image.as_raw();
        let luts = self.tile_luts(src, width, height, tile_w, tile_h);

        let inv_tw = 1.0 / tile_w as f32;
        let inv_th = 1.0 / tile_h as f32;
        let mut out = Vec::with_capacity(width * height);

        for y in 0..height {
            let tyf = y as f32 * inv_th - 0.5;
            let ty1 = tyf.floor() as isize;
            let ya = tyf - ty1 as f32;
            let ty2 = ((ty1 + 1) as usize).min(tiles_y - 1);
            let ty1 = ty1.max(0) as usize;

            for x in 0..width {
                let txf = x as f32 * inv_tw - 0.5;
                let tx1 = txf.floor() as isize;
                let xa = txf - tx1 as f32;
                let tx2 = ((tx1 + 1) as usize).min(tiles_x - 1);
                let tx1 = tx1.max(0) as usize;

                let v = src[y * width + x] as usize;
                let lut = |ty: usize, tx: usize| f32::from(luts[ty * tiles_x + tx][v]);

                let top = lut(ty1, tx1) * (1.0 - xa) + lut(ty1, tx2) * xa;
                let bottom = lut(ty2, tx1) * (1.0 - xa) + lut(ty2, tx2) * xa;
                let res = top * (1.0 - ya) + bottom * ya;
                out.push(res.round().clamp(0.0, 255.0) as u8);
            }
        }

        GrayImage::from_raw(width as u32, height as u32, out)
            .ok_or_else(|| BcdError::computation("CLAHE output buffer size mismatch"))
    }

    /// One clipped, equalized lookup table per tile, row-major over the grid.
    fn tile_luts(
        &self,
        src: &[u8],
        width: usize,
        height: usize,
        tile_w: usize,
        tile_h: usize,
    ) -> Vec<[u8; BINS]> {
        let tiles_x = self.config.tiles_x as usize;
        let tiles_y = self.config.tiles_y as usize;
        let tile_area = tile_w * tile_h;

        let clip = if self.config.clip_limit > 0.0 {
            ((self.config.clip_limit * tile_area as f32 / BINS as f32) as usize).max(1)
        } else {
            0
        };
        let lut_scale = 255.0 / tile_area as f32;

        let mut luts = Vec::with_capacity(tiles_x * tiles_y);
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let mut hist = [0usize; BINS];
                for py in ty * tile_h..(ty + 1) * tile_h {
                    let sy = reflect_101(py, height);
                    for px in tx * tile_w..(tx + 1) * tile_w {
                        let sx = reflect_101(px, width);
                        hist[src[sy * width + sx] as usize] += 1;
                    }
                }

                if clip > 0 {
                    clip_histogram(&mut hist, clip);
                }

                let mut lut = [0u8; BINS];
                let mut sum = 0usize;
                for (bin, count) in hist.iter().enumerate() {
                    sum += count;
                    lut[bin] = (sum as f32 * lut_scale).round().clamp(0.0, 255.0) as u8;
                }
                luts.push(lut);
            }
        }
        luts
    }
}

impl ImageTransform for Clahe {
    fn apply(&self, image: GrayImage) -> Result<GrayImage> {
        self.equalize(&image)
    }

    fn name(&self) -> &str {
        "Clahe"
    }
}

/// Clip bins at `limit` and spread the excess over all bins.
fn clip_histogram(hist: &mut [usize; BINS], limit: usize) {
    let mut clipped = 0;
    for count in hist.iter_mut() {
        if *count > limit {
            clipped += *count - limit;
            *count = limit;
        }
    }

    let batch = clipped / BINS;
    let mut residual = clipped - batch * BINS;
    for count in hist.iter_mut() {
        *count += batch;
    }

    if residual > 0 {
        let step = (BINS / residual).max(1);
        let mut bin = 0;
        while bin < BINS && residual > 0 {
            hist[bin] += 1;
            bin += step;
            residual -= 1;
        }
    }
}

/// Reflect-101 border index (`gfedcb|abcdefgh|gfedcba`).
fn reflect_101(index: usize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len - 1);
    let i = index % period;
    if i >= len {
        period - i
    } else {
        i
    }
}
