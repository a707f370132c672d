//! Runtime error taxonomy.

use crate::Capability;
use compact_str::CompactString;

/// Result alias used across the runtime
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the serving core.
///
/// `ModelNotFound` and `CapabilityUnsupported` are raised before any
/// generation starts. The rest happen mid-stream.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// No model is registered under this id
    #[error("model '{0}' not found")]
    ModelNotFound(CompactString),

    /// The model exists but does not serve this capability
    #[error("model '{model}' does not support {capability}")]
    CapabilityUnsupported {
        /// The requested model
        model: CompactString,
        /// The missing capability
        capability: Capability,
    },

    /// A backend failed while producing partial results
    #[error("{message}")]
    Backend {
        /// The rendered error chain
        message: String,
        /// Diagnostic trace captured where the backend failed
        trace: Option<String>,
    },

    /// The client went away mid-stream
    #[error("cancelled by client")]
    Cancelled,

    /// Writing or reading a transcript failed
    #[error("transcript persistence failed: {0}")]
    Persistence(String),

    /// The task judge could not be invoked
    #[error("judge invocation failed: {0}")]
    Judge(String),

    /// A bridge was asked to run a second producer
    #[error("bridge already started")]
    BridgeStarted,
}

impl Error {
    /// Wrap any backend failure, keeping the whole context chain
    pub fn backend(err: impl Into<anyhow::Error>) -> Self {
        Self::Backend {
            message: format!("{:#}", err.into()),
            trace: None,
        }
    }

    /// The OpenAI-style error type tag
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ModelNotFound(_) => "model_not_found",
            Self::CapabilityUnsupported { .. } => "invalid_request_error",
            Self::Backend { .. } => "backend_error",
            Self::Cancelled => "cancelled",
            Self::Persistence(_) => "persistence_error",
            Self::Judge(_) => "judge_error",
            Self::BridgeStarted => "internal_error",
        }
    }
}
