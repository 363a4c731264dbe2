//! Transform trait for grayscale image preprocessing.

use bcd_core::Result;
use image::GrayImage;

/// A deterministic transform over single-channel images.
///
/// Transforms are composed by [`Compose`] and applied in order by the
/// preprocessor.
///
/// # Implementation Notes
///
/// - Transforms must be pure: same input, same output, no side effects
/// - Transforms should return `Result` instead of panicking
/// - Transforms should document their effect on image dimensions
pub trait ImageTransform: Send + Sync {
    /// Apply the transform.
    fn apply(&self, image: GrayImage) -> Result<GrayImage>;

    /// Get the name of this transform for logging/debugging.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Identity transform that passes images through unchanged.
#[derive(Debug, Clone, Default)]
pub struct Identity;

impl ImageTransform for Identity {
    fn apply(&self, image: GrayImage) -> Result<GrayImage> {
        Ok(image)
    }

    fn name(&self) -> &str {
        "Identity"
    }
}

/// Applies several transforms in sequence.
#[derive(Default)]
pub struct Compose {
    transforms: Vec<Box<dyn ImageTransform>>,
}

impl Compose {
    /// Create a new empty composition.
    #[must_use]
    pub fn new() -> Self {
        Self {
            transforms: Vec::new(),
        }
    }

    /// Append a transform.
    #[must_use]
    pub fn then<T: ImageTransform + 'static>(mut self, transform: T) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    /// Names of the composed transforms, in application order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }
}

impl ImageTransform for Compose {
    fn apply(&self, mut image: GrayImage) -> Result<GrayImage> {
        for transform in &self.transforms {
            image = transform.apply(image)?;
        }
        Ok(image)
    }

    fn name(&self) -> &str {
        "Compose"
    }
}
