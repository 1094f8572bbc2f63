//! Error taxonomy for classpath scanning.
//!
//! Resource-level failures (`Open` on a single entry, `Decode`) are absorbed
//! by the pipeline and only logged. Element-level `Open` failures are recorded
//! on the element. `InvalidState`, `Execution` and `Interrupted` propagate to
//! the caller.

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while opening, masking, parsing or dispatching classpath
/// elements.
#[derive(Debug, Error)]
pub enum ScanError {
    /// A classpath location or one of its resources could not be opened.
    #[error("Failed to open {location}: {source}")]
    Open {
        location: String,
        #[source]
        source: BoxError,
    },

    /// Malformed class-definition bytes.
    #[error("Failed to decode {resource}: {message}")]
    Decode { resource: String, message: String },

    /// Programming-contract violation. Never swallowed.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A user-supplied match processor failed.
    #[error("Match processor failed for {resource}: {source}")]
    Execution {
        resource: String,
        #[source]
        source: BoxError,
    },

    /// Cooperative cancellation was observed.
    #[error("Scan interrupted")]
    Interrupted,

    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl ScanError {
    pub fn open(location: impl ToString, source: impl Into<BoxError>) -> Self {
        ScanError::Open {
            location: location.to_string(),
            source: source.into(),
        }
    }

    pub fn decode(resource: impl ToString, message: impl ToString) -> Self {
        ScanError::Decode {
            resource: resource.to_string(),
            message: message.to_string(),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, ScanError::Interrupted)
    }

    /// Errors that a resource loop may log and skip over.
    pub fn is_resource_level(&self) -> bool {
        matches!(self, ScanError::Open { .. } | ScanError::Decode { .. })
    }
}
