//! Integration tests for the preprocessing → classification → explanation pipeline.
//!
//! These tests run the narrow backbone on CPU with synthetic images and
//! seeded random archives.

use std::path::{Path, PathBuf};

use bcd::explain::QuickshiftConfig;
use bcd::models::OUTPUT_LAYER;
use bcd::prelude::*;
use image::{GrayImage, Luma};
use tempfile::TempDir;

/// Synthetic scan: bright speckled background with a dark elliptical lesion.
fn write_scan(dir: &Path, width: u32, height: u32) -> PathBuf {
    let img = GrayImage::from_fn(width, height, |x, y| {
        let dx = (x as f32 - width as f32 * 0.55) / (width as f32 * 0.2);
        let dy = (y as f32 - height as f32 * 0.45) / (height as f32 * 0.15);
        let speckle = ((x * 7 + y * 13) % 23) as u8;
        Luma([if dx * dx + dy * dy < 1.0 { 30 + speckle } else { 150 + speckle }])
    });
    let path = dir.join(format!("scan_{width}x{height}.png"));
    img.save(&path).unwrap();
    path
}

/// Archive from a classifier seeded differently from the default config.
fn write_archive(dir: &Path, seed: u64) -> PathBuf {
    let config = ClassifierConfig {
        init_seed: Seed::new(seed),
        ..ClassifierConfig::tiny()
    };
    let classifier = Classifier::<NdArray>::new(config, &Default::default()).unwrap();
    let path = dir.join(format!("weights_{seed}.mpk"));
    classifier.export_archive().unwrap().save(&path).unwrap();
    path
}

fn load_classifier(path: &Path) -> Classifier<InferenceBackend> {
    Classifier::load(ClassifierConfig::tiny(), path, LoadMode::Strict, &Default::default()).unwrap()
}

fn fast_surrogate() -> SurrogateConfig {
    SurrogateConfig {
        num_samples: 10,
        batch_size: 5,
        quickshift: QuickshiftConfig {
            kernel_size: 2.0,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn test_preprocess_any_aspect_ratio() {
    let dir = TempDir::new().unwrap();
    let preprocessor = Preprocessor::new(PreprocessConfig::default()).unwrap();
    for (w, h) in [(500, 300), (64, 200), (224, 224)] {
        let tensor = preprocessor.preprocess(write_scan(dir.path(), w, h)).unwrap();
        assert_eq!(tensor.shape(), [224, 224, 3]);
        assert!(tensor
            .as_slice()
            .iter()
            .all(|v| (0.0..=255.0).contains(v) && v.fract() == 0.0));
    }
}

#[test]
fn test_unreadable_path_is_input_error() {
    let preprocessor = Preprocessor::new(PreprocessConfig::default()).unwrap();
    let err = preprocessor.preprocess("/nonexistent/scan.png").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);
}

#[test]
fn test_loaded_classifier_predicts_deterministically() {
    let dir = TempDir::new().unwrap();
    let archive = write_archive(dir.path(), 11);
    let classifier = load_classifier(&archive);

    let preprocessor = Preprocessor::new(PreprocessConfig::default()).unwrap();
    let image = preprocessor.preprocess(write_scan(dir.path(), 300, 260)).unwrap();

    let first = classifier.predict(&image).unwrap();
    let second = classifier.predict(&image).unwrap();
    assert_eq!(first, second);

    let sum: f32 = first.probabilities.iter().sum();
    assert!((sum - 1.0).abs() < 1e-4);
    assert!(first.probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
    assert_eq!(first.confidence, first.probability(first.label));
}

#[test]
fn test_load_changes_output_checksum() {
    let dir = TempDir::new().unwrap();
    let archive = WeightArchive::load(write_archive(dir.path(), 11)).unwrap();

    let mut classifier =
        Classifier::<NdArray>::new(ClassifierConfig::tiny(), &Default::default()).unwrap();
    let before = classifier.output_checksum().unwrap();
    classifier.load_archive(&archive, LoadMode::Strict).unwrap();
    let after = classifier.output_checksum().unwrap();
    assert_ne!(before, after);
    let expected = archive.layer_checksum(OUTPUT_LAYER).unwrap();
    assert!((after - expected).abs() < 1e-9);
}

#[test]
fn test_archive_without_matching_layers_fails_initialization() {
    let dir = TempDir::new().unwrap();
    let mut archive = WeightArchive::load(write_archive(dir.path(), 5)).unwrap();
    for layer in archive
        .layer_names()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>()
    {
        archive.remove_layer(&layer);
    }

    for mode in [LoadMode::Strict, LoadMode::Lenient] {
        let err = Classifier::<NdArray>::from_archive(
            ClassifierConfig::tiny(),
            &archive,
            mode,
            &Default::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Initialization);
    }
}

#[test]
fn test_explanations_on_loaded_model() {
    let dir = TempDir::new().unwrap();
    let classifier = load_classifier(&write_archive(dir.path(), 23));
    let preprocessor = Preprocessor::new(PreprocessConfig::default()).unwrap();
    let image = preprocessor.preprocess(write_scan(dir.path(), 256, 256)).unwrap();

    let heatmap = SaliencyExplainer::default().heatmap(&classifier, &image).unwrap();
    assert!(heatmap.values().iter().all(|v| v.is_finite() && (0.0..=1.0).contains(v)));

    let explainer = SurrogateExplainer::new(fast_surrogate()).unwrap();
    let explanation = explainer.explain_instance(&classifier, &image).unwrap();
    let (_, mask) = explanation
        .image_and_mask(&image, explanation.predicted, 5)
        .unwrap();
    let mut highlighted: Vec<usize> = mask
        .iter()
        .zip(explanation.segmentation.labels())
        .filter(|(m, _)| **m != 0)
        .map(|(_, s)| *s)
        .collect();
    highlighted.sort_unstable();
    highlighted.dedup();
    assert!(highlighted.len() <= 5);
}

#[test]
fn test_fixed_seed_gives_byte_stable_output() {
    let dir = TempDir::new().unwrap();
    let archive = write_archive(dir.path(), 31);
    let scan = write_scan(dir.path(), 240, 180);
    let preprocessor = Preprocessor::new(PreprocessConfig::default()).unwrap();

    let run = || {
        let classifier = load_classifier(&archive);
        let image = preprocessor.preprocess(&scan).unwrap();
        let prediction = classifier.predict(&image).unwrap();
        let lime = SurrogateExplainer::new(fast_surrogate())
            .unwrap()
            .explain(&classifier, &image)
            .unwrap();
        (prediction, lime.bytes)
    };

    let (p1, lime1) = run();
    let (p2, lime2) = run();
    assert_eq!(p1.label, p2.label);
    assert_eq!(p1.confidence, p2.confidence);
    assert_eq!(lime1, lime2);
}
