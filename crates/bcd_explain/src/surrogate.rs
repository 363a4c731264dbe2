//! Local surrogate explanations over superpixels.
//!
//! The image is segmented into superpixels. Random on/off patterns over the
//! superpixels produce perturbed copies in which "off" segments are filled
//! with a constant color, and the classifier labels every copy. A weighted
//! ridge regression from patterns to class probability, with samples weighted
//! by their cosine proximity to the unperturbed pattern, gives each
//! superpixel a local importance. The most important superpixels are then
//! tinted: green where they support the label, red where they oppose it.

use bcd_core::{ClassLabel, ImageTensor, Seed, CHANNELS, NUM_CLASSES};
use bcd_models::Classifier;
use burn::prelude::Backend;
use image::RgbImage;
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ExplainError;
use crate::render::{EncodeFormat, ExplanationImage, ExplanationKind};
use crate::ridge::fit_weighted_ridge;
use crate::segmentation::{quickshift, QuickshiftConfig, Segmentation};

/// Configuration for [`SurrogateExplainer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurrogateConfig {
    /// Perturbed samples, including the unperturbed one.
    pub num_samples: usize,
    /// Superpixels highlighted in the rendered image.
    pub num_features: usize,
    /// Samples per classifier call.
    pub batch_size: usize,
    /// Width of the exponential proximity kernel over cosine distance.
    pub kernel_width: f64,
    /// Fill value for hidden superpixels.
    pub hide_color: f32,
    /// Number of labels explained, most probable first.
    pub top_labels: usize,
    /// Ridge regularization strength.
    pub ridge_alpha: f64,
    /// Seed for segmentation tie-breaking and sampling.
    pub seed: Seed,
    /// Superpixel parameters.
    pub quickshift: QuickshiftConfig,
    /// Output encoding.
    pub format: EncodeFormat,
}

impl Default for SurrogateConfig {
    fn default() -> Self {
        Self {
            num_samples: 500,
            num_features: 5,
            batch_size: 10,
            kernel_width: 0.25,
            hide_color: 0.0,
            top_labels: NUM_CLASSES,
            ridge_alpha: 1.0,
            seed: Seed::default(),
            quickshift: QuickshiftConfig::default(),
            format: EncodeFormat::default(),
        }
    }
}

/// Surrogate model for one label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelExplanation {
    /// Explained label.
    pub label: ClassLabel,
    /// Surrogate intercept.
    pub intercept: f64,
    /// `(superpixel, weight)` sorted by decreasing absolute weight.
    pub weights: Vec<(usize, f64)>,
    /// Weighted R² of the surrogate on the samples.
    pub score: f64,
    /// Surrogate prediction for the unperturbed image.
    pub local_prediction: f64,
}

/// Full surrogate explanation of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct SurrogateExplanation {
    /// Superpixels the explanation refers to.
    pub segmentation: Segmentation,
    /// Most probable label of the unperturbed image.
    pub predicted: ClassLabel,
    /// Classifier output on the unperturbed image.
    pub probabilities: [f32; NUM_CLASSES],
    /// One surrogate per explained label, most probable first.
    pub labels: Vec<LabelExplanation>,
}

impl SurrogateExplanation {
    /// The surrogate of `label`, if it was explained.
    pub fn for_label(&self, label: ClassLabel) -> Option<&LabelExplanation> {
        self.labels.iter().find(|l| l.label == label)
    }

    /// Tint the `num_features` strongest superpixels of `label` on a copy of
    /// `image`.
    ///
    /// Returns the tinted image and a per-pixel mask: `1` for superpixels
    /// supporting the label, `-1` for opposing ones, `0` elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`ExplainError::Config`] if `label` was not explained.
    pub fn image_and_mask(
        &self,
        image: &ImageTensor,
        label: ClassLabel,
        num_features: usize,
    ) -> Result<(RgbImage, Vec<i8>), ExplainError> {
        let explanation = self
            .for_label(label)
            .ok_or_else(|| ExplainError::Config(format!("label {label} was not explained")))?;

        let pixels = self.segmentation.pixels_by_segment();
        let peak = image.max_value();
        let mut values = image.as_slice().to_vec();
        let mut mask = vec![0i8; self.segmentation.labels().len()];

        for &(segment, weight) in explanation.weights.iter().take(num_features) {
            let (channel, sign) = if weight < 0.0 { (0, -1) } else { (1, 1) };
            for &p in &pixels[segment] {
                mask[p] = sign;
                values[p * CHANNELS + channel] = peak;
            }
        }

        let tinted = ImageTensor::new(values)
            .map_err(|e| ExplainError::Tensor(e.to_string()))?
            .to_rgb_image();
        Ok((tinted, mask))
    }
}

/// Produces superpixel surrogate explanations.
#[derive(Debug, Clone)]
pub struct SurrogateExplainer {
    config: SurrogateConfig,
}

impl SurrogateExplainer {
    /// Create an explainer.
    ///
    /// # Errors
    ///
    /// Returns [`bcd_core::BcdError::Computation`] for zero samples, batch
    /// size or labels, or a non-positive kernel width.
    pub fn new(config: SurrogateConfig) -> bcd_core::Result<Self> {
        if config.num_samples == 0 || config.batch_size == 0 {
            return Err(ExplainError::Config("num_samples and batch_size must be positive".into()).into());
        }
        if config.top_labels == 0 || config.top_labels > NUM_CLASSES {
            return Err(ExplainError::Config(format!(
                "top_labels must be in 1..={NUM_CLASSES}, got {}",
                config.top_labels
            ))
            .into());
        }
        if !(config.kernel_width > 0.0) || !(0.0..=255.0).contains(&config.hide_color) {
            return Err(ExplainError::Config(format!(
                "invalid kernel_width {} or hide_color {}",
                config.kernel_width, config.hide_color
            ))
            .into());
        }
        Ok(Self { config })
    }

    /// The active configuration.
    pub fn config(&self) -> &SurrogateConfig {
        &self.config
    }

    /// Fit surrogates for the most probable labels of `image`.
    ///
    /// # Errors
    ///
    /// Returns [`bcd_core::BcdError::Computation`] if segmentation, a
    /// classifier call or a fit fails.
    pub fn explain_instance<B: Backend>(
        &self,
        classifier: &Classifier<B>,
        image: &ImageTensor,
    ) -> bcd_core::Result<SurrogateExplanation> {
        let config = &self.config;
        let segmentation = quickshift(image, &config.quickshift, config.seed.derive("segmentation"))?;
        let num_segments = segmentation.num_segments();
        let pixels = segmentation.pixels_by_segment();

        let patterns = self.sample_patterns(num_segments);
        let mut predictions: Vec<[f32; NUM_CLASSES]> = Vec::with_capacity(config.num_samples);
        for chunk in patterns.outer_iter().collect::<Vec<_>>().chunks(config.batch_size) {
            let batch = chunk
                .iter()
                .map(|row| self.perturb(image, &pixels, *row))
                .collect::<bcd_core::Result<Vec<_>>>()?;
            predictions.extend(classifier.predict_batch(&batch)?);
        }
        debug!(
            segments = num_segments,
            samples = predictions.len(),
            "classified perturbed samples"
        );

        let probabilities = predictions[0];
        let ranked = rank_labels(&probabilities);
        let original = patterns.row(0);
        let sample_weights = patterns
            .outer_iter()
            .map(|row| {
                let d = cosine_distance(row, original);
                (-(d * d) / (config.kernel_width * config.kernel_width)).exp().sqrt()
            })
            .collect::<Array1<f64>>();

        let mut labels = Vec::with_capacity(config.top_labels);
        for &label in ranked.iter().take(config.top_labels) {
            let targets: Array1<f64> = predictions
                .iter()
                .map(|p| f64::from(p[label.index()]))
                .collect();
            let fit = fit_weighted_ridge(
                patterns.view(),
                targets.view(),
                sample_weights.view(),
                config.ridge_alpha,
            )?;

            let mut weights: Vec<(usize, f64)> = fit.coefficients.iter().copied().enumerate().collect();
            weights.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()).then(a.0.cmp(&b.0)));

            labels.push(LabelExplanation {
                label,
                intercept: fit.intercept,
                score: fit.score(patterns.view(), targets.view(), sample_weights.view()),
                local_prediction: fit.predict(patterns.row(0)),
                weights,
            });
        }

        Ok(SurrogateExplanation {
            segmentation,
            predicted: ranked[0],
            probabilities,
            labels,
        })
    }

    /// Surrogate image for the predicted label of `image`, encoded.
    ///
    /// # Errors
    ///
    /// See [`SurrogateExplainer::explain_instance`].
    pub fn explain<B: Backend>(
        &self,
        classifier: &Classifier<B>,
        image: &ImageTensor,
    ) -> bcd_core::Result<ExplanationImage> {
        let explanation = self.explain_instance(classifier, image)?;
        self.render(&explanation, image)
    }

    /// Encode the tinted image of an explanation's predicted label.
    ///
    /// # Errors
    ///
    /// Returns [`bcd_core::BcdError::Computation`] if rendering fails.
    pub fn render(
        &self,
        explanation: &SurrogateExplanation,
        image: &ImageTensor,
    ) -> bcd_core::Result<ExplanationImage> {
        let (tinted, _) =
            explanation.image_and_mask(image, explanation.predicted, self.config.num_features)?;
        Ok(ExplanationImage::encode(
            ExplanationKind::Surrogate,
            &tinted,
            self.config.format,
        )?)
    }

    /// Binary on/off patterns, one row per sample. Row 0 keeps everything.
    fn sample_patterns(&self, num_segments: usize) -> Array2<f64> {
        let mut rng = self.config.seed.derive("perturbation").to_rng();
        let mut patterns = Array2::from_shape_simple_fn((self.config.num_samples, num_segments), || {
            f64::from(rng.gen_range(0u8..2))
        });
        patterns.row_mut(0).fill(1.0);
        patterns
    }

    fn perturb(
        &self,
        image: &ImageTensor,
        pixels: &[Vec<usize>],
        pattern: ArrayView1<f64>,
    ) -> bcd_core::Result<ImageTensor> {
        let mut values = image.as_slice().to_vec();
        for (segment, &on) in pattern.iter().enumerate() {
            if on == 0.0 {
                for &p in &pixels[segment] {
                    values[p * CHANNELS..(p + 1) * CHANNELS].fill(self.config.hide_color);
                }
            }
        }
        ImageTensor::new(values)
    }
}

/// Labels by decreasing probability; ties keep class order.
fn rank_labels(probabilities: &[f32; NUM_CLASSES]) -> Vec<ClassLabel> {
    let mut ranked = ClassLabel::ALL.to_vec();
    ranked.sort_by(|a, b| probabilities[b.index()].total_cmp(&probabilities[a.index()]));
    ranked
}

/// `1 - cos(a, b)`; a zero vector is at distance 1 from everything.
fn cosine_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let dot = a.dot(&b);
    let na = a.dot(&a).sqrt();
    let nb = b.dot(&b).sqrt();
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    (1.0 - dot / (na * nb)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcd_core::backend::NdArray;
    use bcd_models::ClassifierConfig;
    use image::Rgb;
    use ndarray::array;

    fn classifier() -> Classifier<NdArray> {
        Classifier::new(ClassifierConfig::tiny(), &Default::default()).unwrap()
    }

    fn image() -> ImageTensor {
        let rgb = RgbImage::from_fn(224, 224, |x, y| {
            let v = match (x < 112, y < 112) {
                (true, true) => 230,
                (false, true) => 30,
                (true, false) => 140,
                (false, false) => 80,
            };
            Rgb([v, v, v])
        });
        ImageTensor::from_rgb(&rgb).unwrap()
    }

    fn fast_config() -> SurrogateConfig {
        SurrogateConfig {
            num_samples: 12,
            batch_size: 5,
            quickshift: QuickshiftConfig {
                kernel_size: 2.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_cosine_distance() {
        let ones = array![1.0, 1.0];
        assert_eq!(cosine_distance(ones.view(), ones.view()), 0.0);
        assert_eq!(cosine_distance(array![0.0, 0.0].view(), ones.view()), 1.0);
        let d = cosine_distance(array![1.0, 0.0, 0.0, 0.0].view(), array![1.0, 1.0, 1.0, 1.0].view());
        assert!((d - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_strided_patterns_are_read_in_full() {
        // columns of a row-major matrix are not contiguous
        let columns = array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let (a, b) = (columns.column(0), columns.column(1));
        assert!(a.as_slice().is_none());
        assert!((cosine_distance(a, b) - 0.5).abs() < 1e-12);

        let explainer = SurrogateExplainer::new(fast_config()).unwrap();
        let image = image();
        let pixels = vec![vec![0], vec![1], vec![2]];
        let perturbed = explainer.perturb(&image, &pixels, b).unwrap();
        let values = perturbed.as_slice();
        assert_eq!(&values[..CHANNELS], &[0.0; CHANNELS]);
        assert_eq!(&values[CHANNELS..3 * CHANNELS], &image.as_slice()[CHANNELS..3 * CHANNELS]);
    }

    #[test]
    fn test_rank_labels() {
        let ranked = rank_labels(&[0.2, 0.5, 0.3]);
        assert_eq!(ranked, vec![ClassLabel::Malignant, ClassLabel::Normal, ClassLabel::Benign]);
        let tied = rank_labels(&[0.4, 0.2, 0.4]);
        assert_eq!(tied[0], ClassLabel::Benign);
    }

    #[test]
    fn test_patterns_keep_first_row() {
        let explainer = SurrogateExplainer::new(fast_config()).unwrap();
        let patterns = explainer.sample_patterns(7);
        assert_eq!(patterns.dim(), (12, 7));
        assert!(patterns.row(0).iter().all(|&v| v == 1.0));
        assert!(patterns.iter().all(|&v| v == 0.0 || v == 1.0));
        assert_eq!(patterns, explainer.sample_patterns(7));
    }

    #[test]
    fn test_invalid_config() {
        for config in [
            SurrogateConfig { num_samples: 0, ..Default::default() },
            SurrogateConfig { batch_size: 0, ..Default::default() },
            SurrogateConfig { top_labels: 4, ..Default::default() },
            SurrogateConfig { kernel_width: 0.0, ..Default::default() },
        ] {
            assert!(SurrogateExplainer::new(config).is_err());
        }
    }

    #[test]
    fn test_explain_instance() {
        let classifier = classifier();
        let image = image();
        let explainer = SurrogateExplainer::new(fast_config()).unwrap();
        let explanation = explainer.explain_instance(&classifier, &image).unwrap();

        let expected = classifier.predict(&image).unwrap();
        for (p, q) in explanation.probabilities.iter().zip(expected.probabilities) {
            assert!((p - q).abs() < 1e-4);
        }
        let from_probabilities =
            bcd_core::PredictionResult::from_probabilities(explanation.probabilities).unwrap();
        assert_eq!(explanation.predicted, from_probabilities.label);
        assert_eq!(explanation.labels.len(), NUM_CLASSES);
        assert_eq!(explanation.labels[0].label, explanation.predicted);

        let segments = explanation.segmentation.num_segments();
        for label in &explanation.labels {
            assert_eq!(label.weights.len(), segments);
            for pair in label.weights.windows(2) {
                assert!(pair[0].1.abs() >= pair[1].1.abs());
            }
        }

        let (tinted, mask) = explanation
            .image_and_mask(&image, explanation.predicted, 5)
            .unwrap();
        assert_eq!(tinted.dimensions(), (224, 224));
        let touched: std::collections::BTreeSet<usize> = mask
            .iter()
            .zip(explanation.segmentation.labels())
            .filter(|(m, _)| **m != 0)
            .map(|(_, s)| *s)
            .collect();
        assert!(touched.len() <= 5);
    }

    #[test]
    fn test_tint_channels_follow_sign() {
        let image = image();
        let segmentation = Segmentation::from_labels(
            224,
            224,
            (0..224 * 224).map(|i| usize::from(i % 224 >= 112)).collect(),
        )
        .unwrap();
        let explanation = SurrogateExplanation {
            segmentation,
            predicted: ClassLabel::Benign,
            probabilities: [0.5, 0.3, 0.2],
            labels: vec![LabelExplanation {
                label: ClassLabel::Benign,
                intercept: 0.0,
                weights: vec![(1, -0.4), (0, 0.2)],
                score: 1.0,
                local_prediction: 0.5,
            }],
        };

        let (tinted, mask) = explanation.image_and_mask(&image, ClassLabel::Benign, 1).unwrap();
        // only the right half, pushed to red
        assert_eq!(tinted.get_pixel(200, 10).0, [230, 30, 30]);
        assert_eq!(tinted.get_pixel(10, 10).0, [230, 230, 230]);
        assert_eq!(mask[10], 0);
        assert_eq!(mask[200], -1);

        let (tinted, _) = explanation.image_and_mask(&image, ClassLabel::Benign, 2).unwrap();
        assert_eq!(tinted.get_pixel(10, 200).0, [140, 230, 140]);

        assert!(explanation.image_and_mask(&image, ClassLabel::Normal, 2).is_err());
    }

    #[test]
    fn test_explain_is_byte_stable() {
        let classifier = classifier();
        let explainer = SurrogateExplainer::new(fast_config()).unwrap();
        let a = explainer.explain(&classifier, &image()).unwrap();
        let b = explainer.explain(&classifier, &image()).unwrap();
        assert_eq!(a.bytes, b.bytes);
        assert_eq!(a.kind, ExplanationKind::Surrogate);
    }
}
