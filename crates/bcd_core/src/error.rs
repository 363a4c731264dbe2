//! Error taxonomy for bcd-rs.

use thiserror::Error;

/// Result type alias using [`BcdError`].
pub type Result<T> = std::result::Result<T, BcdError>;

/// Errors surfaced at component boundaries.
///
/// Every failure is reported to the immediate caller; nothing is retried and
/// no partial result is ever returned alongside an error.
#[derive(Error, Debug)]
pub enum BcdError {
    /// Architecture and weight archive disagree, or the load changed nothing.
    ///
    /// Fatal: the classifier stays unavailable for the life of the process.
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// A request reached a classifier that failed to initialize.
    #[error("Model failed to initialize: {reason}")]
    NotInitialized {
        /// Why initialization failed.
        reason: String,
    },

    /// Unreadable or malformed input image or tensor.
    #[error("Input error: {0}")]
    Input(String),

    /// Explanation requested without a matching prior prediction.
    #[error("State error: {0}")]
    State(String),

    /// Failure inside gradient computation, segmentation, fitting or encoding.
    #[error("Computation error: {0}")]
    Computation(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of a [`BcdError`], used to pick transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`BcdError::Initialization`].
    Initialization,
    /// See [`BcdError::NotInitialized`].
    NotInitialized,
    /// See [`BcdError::Input`].
    Input,
    /// See [`BcdError::State`].
    State,
    /// See [`BcdError::Computation`] and [`BcdError::Io`].
    Computation,
}

impl BcdError {
    /// Create an initialization error.
    pub fn initialization(msg: impl Into<String>) -> Self {
        Self::Initialization(msg.into())
    }

    /// Create a not-initialized error.
    pub fn not_initialized(reason: impl Into<String>) -> Self {
        Self::NotInitialized {
            reason: reason.into(),
        }
    }

    /// Create an input error.
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    /// Create a state error.
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Create a computation error.
    pub fn computation(msg: impl Into<String>) -> Self {
        Self::Computation(msg.into())
    }

    /// The coarse kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Initialization(_) => ErrorKind::Initialization,
            Self::NotInitialized { .. } => ErrorKind::NotInitialized,
            Self::Input(_) => ErrorKind::Input,
            Self::State(_) => ErrorKind::State,
            Self::Computation(_) | Self::Io(_) => ErrorKind::Computation,
        }
    }
}
