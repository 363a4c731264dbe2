//! Class labels and prediction results.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BcdError, Result};

/// Number of output classes.
pub const NUM_CLASSES: usize = 3;

/// Tolerance on the probability sum of a prediction.
const SUM_TOLERANCE: f32 = 1e-4;

/// The fixed, closed set of diagnostic classes.
///
/// The declaration order is the order of the network's output vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassLabel {
    /// Benign lesion.
    Benign,
    /// Malignant lesion.
    Malignant,
    /// No lesion.
    Normal,
}

impl ClassLabel {
    /// All labels in output-vector order.
    pub const ALL: [ClassLabel; NUM_CLASSES] =
        [ClassLabel::Benign, ClassLabel::Malignant, ClassLabel::Normal];

    /// Position of this label in the probability vector.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Benign => 0,
            Self::Malignant => 1,
            Self::Normal => 2,
        }
    }

    /// Label at `index` in the probability vector.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Lowercase class name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Benign => "benign",
            Self::Malignant => "malignant",
            Self::Normal => "normal",
        }
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Output of one classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Most probable class.
    pub label: ClassLabel,
    /// Probability of `label`, in `[0, 1]`.
    pub confidence: f32,
    /// Per-class probabilities in [`ClassLabel::ALL`] order.
    pub probabilities: [f32; NUM_CLASSES],
}

impl PredictionResult {
    /// Build a result from a softmax output.
    ///
    /// The label is the first maximum, so ties resolve towards the earlier class.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Computation`] if any entry is non-finite or outside
    /// `[0, 1]`, or if the entries do not sum to one.
    pub fn from_probabilities(probabilities: [f32; NUM_CLASSES]) -> Result<Self> {
        if probabilities
            .iter()
            .any(|p| !p.is_finite() || *p < 0.0 || *p > 1.0)
        {
            return Err(BcdError::computation(format!(
                "probabilities out of range: {probabilities:?}"
            )));
        }

        let sum: f32 = probabilities.iter().sum();
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(BcdError::computation(format!(
                "probabilities sum to {sum}, expected 1"
            )));
        }

        let mut best = 0;
        for (i, p) in probabilities.iter().enumerate().skip(1) {
            if *p > probabilities[best] {
                best = i;
            }
        }

        Ok(Self {
            label: ClassLabel::ALL[best],
            confidence: probabilities[best],
            probabilities,
        })
    }

    /// Probability assigned to `label`.
    #[must_use]
    pub fn probability(&self, label: ClassLabel) -> f32 {
        self.probabilities[label.index()]
    }

    /// Confidence as a percentage.
    #[must_use]
    pub fn confidence_percent(&self) -> f32 {
        self.confidence * 100.0
    }

    /// Iterate `(label, probability)` pairs in output order.
    pub fn iter(&self) -> impl Iterator<Item = (ClassLabel, f32)> + '_ {
        ClassLabel::ALL
            .iter()
            .map(move |&label| (label, self.probabilities[label.index()]))
    }
}
