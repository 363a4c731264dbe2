//! Grad-CAM saliency explanations.
//!
//! The backbone is run on its own, starting after the classifier's input
//! normalization, with the target layer tapped as a gradient leaf. The
//! differentiated score is the maximum of the backbone output, not the class
//! score at the end of the head, so the map is the same for every class.

use bcd_core::{ImageTensor, TARGET_HEIGHT, TARGET_WIDTH};
use bcd_models::Classifier;
use burn::tensor::backend::AutodiffBackend;
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::activation::capture_max_gradient;
use crate::attribution::{grad_cam, Heatmap};
use crate::colormap::jet;
use crate::render::{EncodeFormat, ExplanationImage, ExplanationKind};

/// Configuration for [`SaliencyExplainer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaliencyConfig {
    /// Backbone layer to explain. Defaults to the last block output.
    pub target_layer: Option<String>,
    /// Heatmap weight in the overlay.
    pub alpha: f32,
    /// Output encoding.
    pub format: EncodeFormat,
}

impl Default for SaliencyConfig {
    fn default() -> Self {
        Self {
            target_layer: None,
            alpha: 0.4,
            format: EncodeFormat::default(),
        }
    }
}

/// Produces Grad-CAM overlays.
#[derive(Debug, Clone, Default)]
pub struct SaliencyExplainer {
    config: SaliencyConfig,
}

impl SaliencyExplainer {
    /// Create an explainer.
    pub fn new(config: SaliencyConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    pub fn config(&self) -> &SaliencyConfig {
        &self.config
    }

    /// Compute the rectified, max-normalized Grad-CAM map on the target
    /// layer's grid (7×7 for ResNet-50).
    ///
    /// # Errors
    ///
    /// Returns [`bcd_core::BcdError::Computation`] if the target layer is
    /// unknown or the backward pass fails.
    pub fn heatmap<B: AutodiffBackend>(
        &self,
        classifier: &Classifier<B>,
        image: &ImageTensor,
    ) -> bcd_core::Result<Heatmap> {
        let target = match &self.config.target_layer {
            Some(layer) => layer.clone(),
            None => classifier.target_layer()?,
        };
        let backbone = classifier.backbone()?;
        let input = classifier.backbone_input(std::slice::from_ref(image))?;

        let (activation, gradient) = capture_max_gradient(backbone, input, &target)?.into_parts();
        let heatmap = grad_cam(activation, gradient)
            .normalize_by_max()
            .to_heatmap()?;
        debug!(
            layer = %target,
            width = heatmap.width(),
            height = heatmap.height(),
            "computed Grad-CAM heatmap"
        );
        Ok(heatmap)
    }

    /// Blend a colorized heatmap over `image`.
    pub fn overlay(&self, heatmap: &Heatmap, image: &ImageTensor) -> RgbImage {
        let resized = heatmap.resize(TARGET_WIDTH, TARGET_HEIGHT);
        let alpha = self.config.alpha;
        RgbImage::from_fn(TARGET_WIDTH as u32, TARGET_HEIGHT as u32, |x, y| {
            let (x, y) = (x as usize, y as usize);
            let level = (255.0 * resized[y * TARGET_WIDTH + x]) as u8;
            let color = jet(level);
            let mut out = [0u8; 3];
            for (c, value) in out.iter_mut().enumerate() {
                let blended = f32::from(color[c]) * alpha + image.get(y, x, c);
                *value = blended.clamp(0.0, 255.0) as u8;
            }
            Rgb(out)
        })
    }

    /// Grad-CAM overlay of `image`, encoded.
    ///
    /// # Errors
    ///
    /// See [`SaliencyExplainer::heatmap`]; encoding failures are
    /// [`bcd_core::BcdError::Computation`] as well.
    pub fn explain<B: AutodiffBackend>(
        &self,
        classifier: &Classifier<B>,
        image: &ImageTensor,
    ) -> bcd_core::Result<ExplanationImage> {
        let heatmap = self.heatmap(classifier, image)?;
        let overlay = self.overlay(&heatmap, image);
        Ok(ExplanationImage::encode(
            ExplanationKind::Saliency,
            &overlay,
            self.config.format,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcd_core::backend::InferenceBackend;
    use bcd_core::{BcdError, ErrorKind};
    use bcd_models::ClassifierConfig;

    fn classifier() -> Classifier<InferenceBackend> {
        Classifier::new(ClassifierConfig::tiny(), &Default::default()).unwrap()
    }

    fn image() -> ImageTensor {
        let rgb = RgbImage::from_fn(224, 224, |x, y| {
            let v = if (x / 32 + y / 32) % 2 == 0 { 200 } else { 40 };
            Rgb([v, v, v])
        });
        ImageTensor::from_rgb(&rgb).unwrap()
    }

    #[test]
    fn test_heatmap_on_last_block_grid() {
        let heatmap = SaliencyExplainer::default()
            .heatmap(&classifier(), &image())
            .unwrap();
        assert_eq!((heatmap.width(), heatmap.height()), (7, 7));
        assert!(heatmap
            .values()
            .iter()
            .all(|v| v.is_finite() && (0.0..=1.0).contains(v)));
        let max = heatmap.values().iter().copied().fold(0.0f32, f32::max);
        assert!(max == 0.0 || (max - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_custom_target_layer() {
        let explainer = SaliencyExplainer::new(SaliencyConfig {
            target_layer: Some("conv4_block6_out".to_string()),
            ..Default::default()
        });
        let heatmap = explainer.heatmap(&classifier(), &image()).unwrap();
        assert_eq!((heatmap.width(), heatmap.height()), (14, 14));

        let explainer = SaliencyExplainer::new(SaliencyConfig {
            target_layer: Some("no_such_layer".to_string()),
            ..Default::default()
        });
        let err: BcdError = explainer.heatmap(&classifier(), &image()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Computation);
    }

    #[test]
    fn test_zero_heatmap_overlay_adds_base_color() {
        let explainer = SaliencyExplainer::default();
        let heatmap = Heatmap::new(7, 7, vec![0.0; 49]).unwrap();
        let overlay = explainer.overlay(&heatmap, &image());
        // jet(0) = (0, 0, 128), scaled by 0.4 on top of the image
        let pixel = overlay.get_pixel(0, 0).0;
        assert_eq!(pixel, [200, 200, 251]);
        let pixel = overlay.get_pixel(40, 0).0;
        assert_eq!(pixel, [40, 40, 91]);
    }

    #[test]
    fn test_explain_is_deterministic_jpeg() {
        let explainer = SaliencyExplainer::default();
        let classifier = classifier();
        let a = explainer.explain(&classifier, &image()).unwrap();
        let b = explainer.explain(&classifier, &image()).unwrap();
        assert_eq!(a, b);
        assert_eq!(&a.bytes[..2], &[0xFF, 0xD8]);
        assert_eq!((a.width, a.height), (224, 224));
    }
}
