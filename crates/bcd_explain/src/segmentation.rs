//! Quickshift superpixel segmentation.
//!
//! Each pixel is a point in a joint space of scaled CIE-Lab color and image
//! position. A Parzen density is estimated with a Gaussian kernel over a
//! square window, every pixel links to the nearest pixel of higher density,
//! links longer than `max_dist` are cut, and the resulting trees become
//! segments. A tiny seeded perturbation of the densities breaks ties.

use bcd_core::{ImageTensor, Seed, CHANNELS, TARGET_HEIGHT, TARGET_WIDTH};
use palette::{IntoColor, Lab, Srgb};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::error::{ExplainError, Result};

const DENSITY_NOISE: f64 = 1e-5;

/// Quickshift parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuickshiftConfig {
    /// Width of the Gaussian density kernel, in pixels.
    pub kernel_size: f64,
    /// Longest link kept between a pixel and its parent.
    pub max_dist: f64,
    /// Weight of color against position, in `[0, 1]`.
    pub ratio: f64,
}

impl Default for QuickshiftConfig {
    fn default() -> Self {
        Self {
            kernel_size: 4.0,
            max_dist: 200.0,
            ratio: 0.2,
        }
    }
}

impl QuickshiftConfig {
    fn validate(&self) -> Result<()> {
        if !(self.kernel_size > 0.0 && self.kernel_size.is_finite()) {
            return Err(ExplainError::Config(format!(
                "quickshift kernel_size must be positive, got {}",
                self.kernel_size
            )));
        }
        if !(0.0..=1.0).contains(&self.ratio) || self.max_dist < 0.0 {
            return Err(ExplainError::Config(format!(
                "invalid quickshift ratio {} or max_dist {}",
                self.ratio, self.max_dist
            )));
        }
        Ok(())
    }
}

/// Superpixel labels over an image, numbered `0..num_segments`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segmentation {
    width: usize,
    height: usize,
    labels: Vec<usize>,
    num_segments: usize,
}

impl Segmentation {
    /// Build from row-major labels, renumbering them densely in ascending
    /// order of value.
    ///
    /// # Errors
    ///
    /// Returns [`ExplainError::Segmentation`] if the length does not match.
    pub fn from_labels(width: usize, height: usize, labels: Vec<usize>) -> Result<Self> {
        if labels.len() != width * height || labels.is_empty() {
            return Err(ExplainError::Segmentation(format!(
                "{} labels for a {width}x{height} image",
                labels.len()
            )));
        }
        let mut distinct = labels.clone();
        distinct.sort_unstable();
        distinct.dedup();
        let labels = labels
            .iter()
            .map(|label| distinct.binary_search(label).unwrap_or_default())
            .collect();
        Ok(Self {
            width,
            height,
            labels,
            num_segments: distinct.len(),
        })
    }

    /// Image width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Image height.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of segments.
    pub fn num_segments(&self) -> usize {
        self.num_segments
    }

    /// Row-major labels.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Label at row `y`, column `x`.
    pub fn label(&self, y: usize, x: usize) -> usize {
        self.labels[y * self.width + x]
    }

    /// Pixel indices of every segment.
    pub fn pixels_by_segment(&self) -> Vec<Vec<usize>> {
        let mut pixels = vec![Vec::new(); self.num_segments];
        for (i, &label) in self.labels.iter().enumerate() {
            pixels[label].push(i);
        }
        pixels
    }
}

/// Segment `image` with quickshift.
///
/// # Errors
///
/// Returns [`ExplainError::Config`] for invalid parameters.
pub fn quickshift(image: &ImageTensor, config: &QuickshiftConfig, seed: Seed) -> Result<Segmentation> {
    config.validate()?;
    let (h, w) = (TARGET_HEIGHT, TARGET_WIDTH);
    let features = lab_features(image, config.ratio);

    let inv_kernel = -0.5 / (config.kernel_size * config.kernel_size);
    let window = (3.0 * config.kernel_size).ceil() as usize;

    let sq_dist = |a: usize, b: usize, dy: usize, dx: usize| -> f64 {
        let fa = &features[a * CHANNELS..(a + 1) * CHANNELS];
        let fb = &features[b * CHANNELS..(b + 1) * CHANNELS];
        let color: f64 = fa.iter().zip(fb).map(|(p, q)| (p - q) * (p - q)).sum();
        color + (dy * dy + dx * dx) as f64
    };

    let mut densities = vec![0.0f64; h * w];
    for r in 0..h {
        for c in 0..w {
            let here = r * w + c;
            let mut density = 0.0;
            for rr in r.saturating_sub(window)..(r + window + 1).min(h) {
                for cc in c.saturating_sub(window)..(c + window + 1).min(w) {
                    let d = sq_dist(here, rr * w + cc, r.abs_diff(rr), c.abs_diff(cc));
                    density += (d * inv_kernel).exp();
                }
            }
            densities[here] = density;
        }
    }

    let mut rng = seed.to_rng();
    for density in &mut densities {
        let noise: f64 = StandardNormal.sample(&mut rng);
        *density += DENSITY_NOISE * noise;
    }

    let mut parent: Vec<usize> = (0..h * w).collect();
    for r in 0..h {
        for c in 0..w {
            let here = r * w + c;
            let current = densities[here];
            let mut closest = f64::INFINITY;
            for rr in r.saturating_sub(window)..(r + window + 1).min(h) {
                for cc in c.saturating_sub(window)..(c + window + 1).min(w) {
                    let there = rr * w + cc;
                    if densities[there] > current {
                        let d = sq_dist(here, there, r.abs_diff(rr), c.abs_diff(cc));
                        if d < closest {
                            closest = d;
                            parent[here] = there;
                        }
                    }
                }
            }
            if closest.sqrt() > config.max_dist {
                parent[here] = here;
            }
        }
    }

    // Point every pixel at its root.
    loop {
        let next: Vec<usize> = parent.iter().map(|&p| parent[p]).collect();
        if next == parent {
            break;
        }
        parent = next;
    }

    Segmentation::from_labels(w, h, parent)
}

/// Per-pixel `ratio * Lab`, row-major with three values per pixel.
fn lab_features(image: &ImageTensor, ratio: f64) -> Vec<f64> {
    image
        .as_slice()
        .chunks_exact(CHANNELS)
        .flat_map(|px| {
            let lab: Lab = Srgb::new(px[0] / 255.0, px[1] / 255.0, px[2] / 255.0).into_color();
            [
                ratio * f64::from(lab.l),
                ratio * f64::from(lab.a),
                ratio * f64::from(lab.b),
            ]
        })
        .collect()
}
