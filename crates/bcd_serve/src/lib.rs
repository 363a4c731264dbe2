//! # bcd_serve
//!
//! HTTP serving for bcd-rs: configuration, prediction sessions and an axum
//! router exposing classification and explanations.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod server;
pub mod service;
pub mod session;

pub use config::ServeConfig;
pub use error::{Result, ServeError};
pub use service::{Explanations, InferenceService, ModelState};
pub use session::{Session, SessionStore};
