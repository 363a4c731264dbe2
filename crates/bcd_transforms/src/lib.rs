//! # bcd_transforms
//!
//! Deterministic preprocessing for bcd-rs.
//!
//! This crate provides:
//! - [`Clahe`]: tile-based contrast-limited histogram equalization
//! - [`Resize`]: fixed-resolution resize with a configurable filter
//! - [`Preprocessor`]: decode → CLAHE → resize → 3 channels, producing an
//!   [`ImageTensor`](bcd_core::ImageTensor)
//!
//! ## Example
//!
//! ```rust,ignore
//! use bcd_transforms::{PreprocessConfig, Preprocessor};
//!
//! let pre = Preprocessor::new(PreprocessConfig::default())?;
//! let tensor = pre.preprocess("scan.png")?;
//! assert_eq!(tensor.shape(), [224, 224, 3]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clahe;
pub mod preprocess;
pub mod resize;
pub mod transform;

pub use clahe::{Clahe, ClaheConfig};
pub use preprocess::{PreprocessConfig, Preprocessor};
pub use resize::{Resize, ResizeFilter};
pub use transform::{Compose, Identity, ImageTransform};
