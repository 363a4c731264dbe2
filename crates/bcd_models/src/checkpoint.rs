//! Weight archives and verified loading.
//!
//! A [`WeightArchive`] is a named MessagePack file holding every parameter
//! of a classifier, grouped by top-level layer:
//!
//! ```text
//! layers:
//!   resnet50:      { "conv1_conv/kernel": {shape, values}, "conv1_bn/gamma": … }
//!   dense_128:     { "kernel": …, "bias": … }
//!   output_layer:  { "kernel": …, "bias": … }
//! ```
//!
//! Convolution kernels are stored `[out, in, kh, kw]`, dense kernels
//! `[in, out]`. The schema is specific to this crate; burn's record
//! recorders cannot read it.
//!
//! # Loading
//!
//! [`load_weights`] matches the archive against the graph's
//! [`WeightManifest`]. In [`LoadMode::Strict`] any missing or unexpected
//! layer, parameter or shape is an error and nothing is assigned until the
//! whole archive has been validated. [`LoadMode::Lenient`] matches layers by
//! name and skips the rest with a warning, but still rejects shape
//! mismatches among matched layers.
//!
//! Independently of the mode, callers compare the output layer checksum
//! before and after loading with [`verify_checksum`] so a load that
//! silently matched nothing is caught.
//!
//! # Example
//!
//! ```rust,ignore
//! use bcd_models::checkpoint::{load_weights, LoadMode, WeightArchive};
//!
//! let archive = WeightArchive::load("model.weights.mpk")?;
//! let report = load_weights(&mut graph, &archive, LoadMode::Strict)?;
//! println!("{} layers loaded", report.matched.len());
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use bcd_core::BcdError;
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::graph::{Graph, GraphError, ParamShapes};

/// Current archive format version.
pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

/// One parameter tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayRecord {
    /// Tensor shape.
    pub shape: Vec<usize>,
    /// Row-major values.
    pub values: Vec<f32>,
}

impl ArrayRecord {
    /// Create a record, checking that the value count matches the shape.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::InvalidFormat`] on a size mismatch.
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        let record = Self { shape, values };
        record.validate()?;
        Ok(record)
    }

    /// Copy a tensor's data.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::InvalidFormat`] for non-f32 data.
    pub fn from_data(data: &TensorData) -> Result<Self> {
        let values = data
            .to_vec::<f32>()
            .map_err(|e| CheckpointError::InvalidFormat(format!("{e:?}")))?;
        Self::new(data.shape.clone(), values)
    }

    /// Convert to tensor data.
    pub fn to_data(&self) -> TensorData {
        TensorData::new(self.values.clone(), self.shape.clone())
    }

    /// Sum of all values.
    pub fn sum(&self) -> f64 {
        self.values.iter().map(|&v| f64::from(v)).sum()
    }

    fn validate(&self) -> Result<()> {
        let expected: usize = self.shape.iter().product();
        if expected != self.values.len() {
            return Err(CheckpointError::InvalidFormat(format!(
                "shape {:?} needs {expected} values, found {}",
                self.shape,
                self.values.len()
            )));
        }
        Ok(())
    }
}

/// Named parameters of a whole model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightArchive {
    /// Archive format version.
    pub format_version: u32,
    /// Architecture the weights were exported from.
    pub arch: String,
    /// Parameters per top-level layer, keyed by parameter path.
    pub layers: BTreeMap<String, BTreeMap<String, ArrayRecord>>,
}

impl WeightArchive {
    /// Create an empty archive.
    pub fn new(arch: impl Into<String>) -> Self {
        Self {
            format_version: ARCHIVE_FORMAT_VERSION,
            arch: arch.into(),
            layers: BTreeMap::new(),
        }
    }

    /// Export every parameter of `graph`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::InvalidFormat`] if a parameter cannot be
    /// read back as f32.
    pub fn from_graph<B: Backend>(graph: &Graph<B>, arch: impl Into<String>) -> Result<Self> {
        let mut archive = Self::new(arch);
        for (layer, params) in graph.param_shapes() {
            for path in params.keys() {
                let full = format!("{layer}/{path}");
                let data = graph
                    .param(&full)
                    .ok_or_else(|| CheckpointError::InvalidFormat(format!("unreadable {full}")))?;
                archive.insert(&layer, path, ArrayRecord::from_data(&data)?);
            }
        }
        Ok(archive)
    }

    /// Add or replace one parameter.
    pub fn insert(&mut self, layer: &str, param: &str, record: ArrayRecord) {
        self.layers
            .entry(layer.to_string())
            .or_default()
            .insert(param.to_string(), record);
    }

    /// Remove a whole layer, returning its parameters.
    pub fn remove_layer(&mut self, layer: &str) -> Option<BTreeMap<String, ArrayRecord>> {
        self.layers.remove(layer)
    }

    /// Parameters of one layer.
    pub fn layer(&self, layer: &str) -> Option<&BTreeMap<String, ArrayRecord>> {
        self.layers.get(layer)
    }

    /// Layer names in sorted order.
    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.keys().map(String::as_str).collect()
    }

    /// Total number of scalar values.
    pub fn num_values(&self) -> usize {
        self.layers
            .values()
            .flat_map(BTreeMap::values)
            .map(|r| r.values.len())
            .sum()
    }

    /// Sum of all values of one layer.
    pub fn layer_checksum(&self, layer: &str) -> Option<f64> {
        self.layer(layer)
            .map(|params| params.values().map(ArrayRecord::sum).sum())
    }

    /// The layers and shapes this archive provides.
    pub fn manifest(&self) -> WeightManifest {
        let layers = self
            .layers
            .iter()
            .map(|(layer, params)| {
                let shapes = params
                    .iter()
                    .map(|(path, record)| (path.clone(), record.shape.clone()))
                    .collect();
                (layer.clone(), shapes)
            })
            .collect();
        WeightManifest { layers }
    }

    /// Write to `path` as named MessagePack.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Save`] on I/O or encoding failure.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .map_err(|e| CheckpointError::Save(format!("{}: {e}", path.display())))?;
        let mut writer = BufWriter::new(file);
        rmp_serde::encode::write_named(&mut writer, self)
            .map_err(|e| CheckpointError::Save(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| CheckpointError::Save(e.to_string()))?;
        debug!(path = %path.display(), layers = self.layers.len(), "saved weight archive");
        Ok(())
    }

    /// Read an archive written by [`WeightArchive::save`].
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Load`] if the file cannot be read or
    /// decoded, and [`CheckpointError::InvalidFormat`] for an unsupported
    /// version or inconsistent records.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| CheckpointError::Load(format!("{}: {e}", path.display())))?;
        let archive: Self = rmp_serde::decode::from_read(BufReader::new(file))
            .map_err(|e| CheckpointError::Load(format!("{}: {e}", path.display())))?;

        if archive.format_version != ARCHIVE_FORMAT_VERSION {
            return Err(CheckpointError::InvalidFormat(format!(
                "unsupported archive version {} (expected {ARCHIVE_FORMAT_VERSION})",
                archive.format_version
            )));
        }
        for params in archive.layers.values() {
            for record in params.values() {
                record.validate()?;
            }
        }
        Ok(archive)
    }
}

/// Expected layers and parameter shapes of an architecture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightManifest {
    layers: ParamShapes,
}

impl WeightManifest {
    /// The manifest of a built graph.
    pub fn from_graph<B: Backend>(graph: &Graph<B>) -> Self {
        Self {
            layers: graph.param_shapes(),
        }
    }

    /// Layer names in sorted order.
    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.keys().map(String::as_str).collect()
    }

    /// Parameter shapes of one layer.
    pub fn params(&self, layer: &str) -> Option<&BTreeMap<String, Vec<usize>>> {
        self.layers.get(layer)
    }

    /// Whether the manifest lists `layer`.
    pub fn contains(&self, layer: &str) -> bool {
        self.layers.contains_key(layer)
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the manifest is empty.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Total number of parameter tensors.
    pub fn num_params(&self) -> usize {
        self.layers.values().map(BTreeMap::len).sum()
    }
}

/// How strictly an archive must match the architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Every layer must be present and nothing extra allowed.
    #[default]
    Strict,
    /// Match layers by name, skip the rest.
    Lenient,
}

/// Outcome of [`load_weights`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    /// Layers assigned from the archive.
    pub matched: Vec<String>,
    /// Architecture layers absent from the archive.
    pub missing: Vec<String>,
    /// Archive layers absent from the architecture.
    pub unexpected: Vec<String>,
    /// Number of parameter tensors assigned.
    pub params_loaded: usize,
}

/// Assign archive parameters to `graph`.
///
/// All matched layers are validated before the first assignment, so an error
/// leaves the graph untouched.
///
/// # Errors
///
/// - [`CheckpointError::ManifestMismatch`] in strict mode when layers are
///   missing or unexpected
/// - [`CheckpointError::MissingParam`], [`CheckpointError::UnexpectedParam`]
///   or [`CheckpointError::ShapeMismatch`] for a matched layer whose
///   parameters differ, in either mode
pub fn load_weights<B: Backend>(
    graph: &mut Graph<B>,
    archive: &WeightArchive,
    mode: LoadMode,
) -> Result<LoadReport> {
    let manifest = WeightManifest::from_graph(graph);

    let missing: Vec<String> = manifest
        .layer_names()
        .into_iter()
        .filter(|layer| archive.layer(layer).is_none())
        .map(str::to_string)
        .collect();
    let unexpected: Vec<String> = archive
        .layer_names()
        .into_iter()
        .filter(|layer| !manifest.contains(layer))
        .map(str::to_string)
        .collect();

    if mode == LoadMode::Strict && (!missing.is_empty() || !unexpected.is_empty()) {
        return Err(CheckpointError::ManifestMismatch {
            missing,
            unexpected,
        });
    }

    let mut matched = Vec::new();
    for (layer, expected) in &manifest.layers {
        let Some(params) = archive.layer(layer) else {
            continue;
        };
        for (param, shape) in expected {
            let record = params.get(param).ok_or_else(|| CheckpointError::MissingParam {
                layer: layer.clone(),
                param: param.clone(),
            })?;
            if &record.shape != shape {
                return Err(CheckpointError::ShapeMismatch {
                    layer: layer.clone(),
                    param: param.clone(),
                    expected: shape.clone(),
                    got: record.shape.clone(),
                });
            }
        }
        if let Some(extra) = params.keys().find(|p| !expected.contains_key(*p)) {
            return Err(CheckpointError::UnexpectedParam {
                layer: layer.clone(),
                param: extra.clone(),
            });
        }
        matched.push(layer.clone());
    }

    let mut params_loaded = 0;
    for layer in &matched {
        for (param, record) in archive.layer(layer).into_iter().flatten() {
            graph.set_param(&format!("{layer}/{param}"), record.to_data())?;
            params_loaded += 1;
        }
    }

    if !missing.is_empty() {
        warn!(layers = ?missing, "architecture layers not found in weight archive");
    }
    if !unexpected.is_empty() {
        warn!(layers = ?unexpected, "weight archive layers not used by the architecture");
    }
    info!(
        matched = matched.len(),
        expected = manifest.len(),
        params = params_loaded,
        ?mode,
        "assigned archive weights"
    );

    Ok(LoadReport {
        matched,
        missing,
        unexpected,
        params_loaded,
    })
}

/// Fail when a weight load left the guarded layer unchanged.
///
/// Equal, non-zero checksums mean no value of the layer was replaced, which
/// happens when an archive silently matched nothing.
///
/// # Errors
///
/// Returns [`CheckpointError::Unchanged`] in that case.
pub fn verify_checksum(layer: &str, before: f64, after: f64) -> Result<()> {
    if before == after && before != 0.0 {
        return Err(CheckpointError::Unchanged {
            layer: layer.to_string(),
            checksum: before,
        });
    }
    debug!(layer, before, after, "checksum changed after load");
    Ok(())
}

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Checkpoint-related errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Error saving an archive.
    #[error("Failed to save weight archive: {0}")]
    Save(String),

    /// Error loading an archive.
    #[error("Failed to load weight archive: {0}")]
    Load(String),

    /// Malformed archive contents.
    #[error("Invalid weight archive: {0}")]
    InvalidFormat(String),

    /// Layer sets differ in strict mode.
    #[error("Weight archive does not match the architecture (missing layers: {missing:?}, unexpected layers: {unexpected:?})")]
    ManifestMismatch {
        /// Architecture layers absent from the archive.
        missing: Vec<String>,
        /// Archive layers absent from the architecture.
        unexpected: Vec<String>,
    },

    /// A matched layer lacks a parameter.
    #[error("Layer {layer} is missing parameter {param}")]
    MissingParam {
        /// Layer name.
        layer: String,
        /// Parameter path.
        param: String,
    },

    /// A matched layer has an extra parameter.
    #[error("Layer {layer} has unexpected parameter {param}")]
    UnexpectedParam {
        /// Layer name.
        layer: String,
        /// Parameter path.
        param: String,
    },

    /// A parameter has the wrong shape.
    #[error("Parameter {layer}/{param} has shape {got:?}, expected {expected:?}")]
    ShapeMismatch {
        /// Layer name.
        layer: String,
        /// Parameter path.
        param: String,
        /// Shape required by the architecture.
        expected: Vec<usize>,
        /// Shape found in the archive.
        got: Vec<usize>,
    },

    /// The guarded layer did not change.
    #[error("Weights of {layer} unchanged after loading (checksum {checksum}); no weights were applied")]
    Unchanged {
        /// Guarded layer.
        layer: String,
        /// Checksum before and after.
        checksum: f64,
    },

    /// Assignment failed inside the graph.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl From<CheckpointError> for BcdError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::Save(_) => BcdError::computation(err.to_string()),
            _ => BcdError::initialization(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Op;
    use crate::layers::{DenseActivation, DenseLayer};
    use bcd_core::backend::NdArray;
    use bcd_core::{ErrorKind, Seed};

    type TestBackend = NdArray;

    fn two_layer(seed: u64) -> Graph<TestBackend> {
        let device = Default::default();
        let mut rng = Seed::new(seed).to_rng();
        let mut graph = Graph::new("mlp");
        let input = graph.add("input", Op::Input, &[]).unwrap();
        let hidden = graph
            .add(
                "hidden",
                Op::Dense(DenseLayer::new(4, 3, DenseActivation::Relu, &mut rng, &device)),
                &[input],
            )
            .unwrap();
        let out = graph
            .add(
                "out",
                Op::Dense(DenseLayer::new(3, 2, DenseActivation::Softmax, &mut rng, &device)),
                &[hidden],
            )
            .unwrap();
        graph.set_output(out).unwrap();
        graph
    }

    #[test]
    fn test_array_record_validates() {
        assert!(ArrayRecord::new(vec![2, 2], vec![0.0; 3]).is_err());
        let record = ArrayRecord::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(record.sum(), 10.0);
        assert_eq!(record.to_data().shape, vec![2, 2]);
    }

    #[test]
    fn test_archive_roundtrip_on_disk() {
        let graph = two_layer(1);
        let archive = WeightArchive::from_graph(&graph, "mlp").unwrap();
        assert_eq!(archive.layer_names(), vec!["hidden", "out"]);
        assert_eq!(archive.num_values(), 4 * 3 + 3 + 3 * 2 + 2);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mlp.weights.mpk");
        archive.save(&path).unwrap();
        let loaded = WeightArchive::load(&path).unwrap();
        assert_eq!(loaded, archive);
    }

    #[test]
    fn test_archive_is_a_named_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mlp.mpk");
        WeightArchive::from_graph(&two_layer(2), "mlp")
            .unwrap()
            .save(&path)
            .unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let top: BTreeMap<String, serde::de::IgnoredAny> = rmp_serde::from_slice(&bytes).unwrap();
        let keys: Vec<&str> = top.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["arch", "format_version", "layers"]);
    }

    #[test]
    fn test_load_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.mpk");
        std::fs::write(&path, b"definitely not msgpack").unwrap();
        assert!(matches!(
            WeightArchive::load(&path),
            Err(CheckpointError::Load(_))
        ));
        assert!(matches!(
            WeightArchive::load(dir.path().join("missing.mpk")),
            Err(CheckpointError::Load(_))
        ));
    }

    #[test]
    fn test_strict_load_assigns_everything() {
        let source = two_layer(1);
        let archive = WeightArchive::from_graph(&source, "mlp").unwrap();
        let mut target = two_layer(2);

        let before = target.checksum("out").unwrap();
        let report = load_weights(&mut target, &archive, LoadMode::Strict).unwrap();
        let after = target.checksum("out").unwrap();

        assert_eq!(report.matched, vec!["hidden", "out"]);
        assert_eq!(report.params_loaded, 4);
        assert!(report.missing.is_empty());
        assert_eq!(target.param("hidden/kernel"), source.param("hidden/kernel"));
        assert!(verify_checksum("out", before, after).is_ok());
    }

    #[test]
    fn test_strict_rejects_missing_and_unexpected() {
        let mut archive = WeightArchive::from_graph(&two_layer(1), "mlp").unwrap();
        archive.remove_layer("hidden");
        archive.insert("extra", "kernel", ArrayRecord::new(vec![1], vec![1.0]).unwrap());

        let mut target = two_layer(2);
        let untouched = target.param("out/kernel");
        match load_weights(&mut target, &archive, LoadMode::Strict) {
            Err(CheckpointError::ManifestMismatch {
                missing,
                unexpected,
            }) => {
                assert_eq!(missing, vec!["hidden"]);
                assert_eq!(unexpected, vec!["extra"]);
            }
            other => panic!("expected manifest mismatch, got {other:?}"),
        }
        assert_eq!(target.param("out/kernel"), untouched);
    }

    #[test]
    fn test_lenient_skips_unknown_layers() {
        let source = two_layer(1);
        let mut archive = WeightArchive::from_graph(&source, "mlp").unwrap();
        archive.remove_layer("hidden");
        archive.insert("extra", "kernel", ArrayRecord::new(vec![1], vec![1.0]).unwrap());

        let mut target = two_layer(2);
        let hidden_before = target.param("hidden/kernel");
        let report = load_weights(&mut target, &archive, LoadMode::Lenient).unwrap();

        assert_eq!(report.matched, vec!["out"]);
        assert_eq!(report.missing, vec!["hidden"]);
        assert_eq!(report.unexpected, vec!["extra"]);
        assert_eq!(target.param("hidden/kernel"), hidden_before);
        assert_eq!(target.param("out/kernel"), source.param("out/kernel"));
    }

    #[test]
    fn test_shape_mismatch_rejected_in_both_modes() {
        let mut archive = WeightArchive::from_graph(&two_layer(1), "mlp").unwrap();
        archive.insert("out", "bias", ArrayRecord::new(vec![3], vec![0.0; 3]).unwrap());

        for mode in [LoadMode::Strict, LoadMode::Lenient] {
            let mut target = two_layer(2);
            let before = target.param("hidden/kernel");
            assert!(matches!(
                load_weights(&mut target, &archive, mode),
                Err(CheckpointError::ShapeMismatch { .. })
            ));
            // validation runs before any assignment
            assert_eq!(target.param("hidden/kernel"), before);
        }
    }

    #[test]
    fn test_param_mismatch_in_matched_layer() {
        let mut archive = WeightArchive::from_graph(&two_layer(1), "mlp").unwrap();
        archive.insert("out", "gamma", ArrayRecord::new(vec![2], vec![1.0; 2]).unwrap());
        let mut target = two_layer(2);
        assert!(matches!(
            load_weights(&mut target, &archive, LoadMode::Lenient),
            Err(CheckpointError::UnexpectedParam { .. })
        ));

        let mut archive = WeightArchive::from_graph(&two_layer(1), "mlp").unwrap();
        archive.layers.get_mut("out").unwrap().remove("bias");
        assert!(matches!(
            load_weights(&mut target, &archive, LoadMode::Strict),
            Err(CheckpointError::MissingParam { .. })
        ));
    }

    #[test]
    fn test_lenient_zero_match_is_caught_by_checksum() {
        let mut archive = WeightArchive::new("other");
        archive.insert("unrelated", "kernel", ArrayRecord::new(vec![2], vec![1.0, 2.0]).unwrap());

        let mut target = two_layer(2);
        let before = target.checksum("out").unwrap();
        let report = load_weights(&mut target, &archive, LoadMode::Lenient).unwrap();
        assert!(report.matched.is_empty());

        let after = target.checksum("out").unwrap();
        let err = verify_checksum("out", before, after).unwrap_err();
        assert!(matches!(err, CheckpointError::Unchanged { .. }));
        assert_eq!(BcdError::from(err).kind(), ErrorKind::Initialization);
    }

    #[test]
    fn test_zero_checksum_is_not_flagged() {
        assert!(verify_checksum("out", 0.0, 0.0).is_ok());
        assert!(verify_checksum("out", 1.5, 1.25).is_ok());
        assert!(verify_checksum("out", 1.5, 1.5).is_err());
    }

    #[test]
    fn test_mode_serde() {
        assert_eq!(serde_json::to_string(&LoadMode::Lenient).unwrap(), "\"lenient\"");
        assert_eq!(LoadMode::default(), LoadMode::Strict);
    }
}
