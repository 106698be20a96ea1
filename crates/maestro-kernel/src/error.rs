//! Error taxonomy shared by every orchestration component.
//!
//! [`OrchestratorError`] is the plain, cloneable error carried through the
//! request path. At configuration boundaries the error is wrapped in an
//! [`error_stack::Report`] (see [`OrchestratorReport`] and [`KernelResult`])
//! so that file paths and other context travel with it.
//!
//! ```rust,ignore
//! use maestro_kernel::error::{IntoOrchestratorReport, OrchestratorError};
//!
//! let report = Err::<(), _>(OrchestratorError::Config("bad tier".into()))
//!     .into_report()
//!     .map_err(|r| r.attach("while reading maestro.toml"));
//! ```

use std::fmt;
use std::time::Duration;

use error_stack::Report;
use thiserror::Error;

use crate::tier::ModelTier;

/// Classification of transport-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkErrorKind {
    /// The peer reset the connection mid-flight
    ConnectionReset,
    /// Nothing was listening on the remote address
    ConnectionRefused,
    /// The socket timed out below the request timeout
    TimedOut,
    /// Any other transport failure (DNS, TLS, malformed response, ...)
    Other,
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionReset => write!(f, "connection reset"),
            Self::ConnectionRefused => write!(f, "connection refused"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Errors produced by the orchestration core.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum OrchestratorError {
    /// Missing dependency, invalid tier/strategy name or invalid setting
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown model id
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Unknown or closed collaboration session
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Unknown API service id
    #[error("API service not found: {0}")]
    ServiceNotFound(String),

    /// The caller's tier does not grant access to the model
    #[error("Tier access denied for model {model_id}: requires {required}, caller has {granted}")]
    TierDenied {
        model_id: String,
        required: ModelTier,
        granted: ModelTier,
    },

    /// Not enough memory to load at any quantization level
    #[error("Insufficient memory: {0}")]
    InsufficientMemory(String),

    /// The concurrent-model budget is full and nothing can be evicted
    #[error("Model capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// The adapter refused or failed to load
    #[error("Model load failed: {0}")]
    ModelLoadFailed(String),

    /// The adapter failed while executing
    #[error("Model execution failed: {0}")]
    ExecutionFailed(String),

    /// No model in the catalog satisfies the request
    #[error("No eligible model: {0}")]
    NoEligibleModel(String),

    /// Every member of a multi-model phase failed
    #[error("All participants failed: {0}")]
    AllParticipantsFailed(String),

    /// Non-2xx response from a remote service
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Transport failure before a response arrived
    #[error("Network error ({kind}): {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    /// An attempt exceeded its timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The admin source could not provide credentials
    #[error("Credentials unavailable: {0}")]
    Credentials(String),

    /// Payload (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Anything else
    #[error("Orchestrator error: {0}")]
    Other(String),
}

impl OrchestratorError {
    /// Whether a failed remote call may be retried.
    ///
    /// Connection reset/refused, socket timeouts, attempt timeouts, HTTP 5xx
    /// and HTTP 429 are transient; everything else is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { kind, .. } => !matches!(kind, NetworkErrorKind::Other),
            Self::Timeout(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the error is a not-found condition (never retried).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ModelNotFound(_) | Self::SessionNotFound(_) | Self::ServiceNotFound(_)
        )
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Plain result alias used on the request path.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Error-stack–backed result alias for orchestration operations.
pub type OrchestratorReport<T> = Result<T, Report<OrchestratorError>>;

/// Extension trait to convert [`OrchestratorResult<T>`] into [`OrchestratorReport<T>`].
pub trait IntoOrchestratorReport<T> {
    /// Wrap the error in an `error_stack::Report`.
    fn into_report(self) -> OrchestratorReport<T>;
}

impl<T> IntoOrchestratorReport<T> for OrchestratorResult<T> {
    #[inline]
    fn into_report(self) -> OrchestratorReport<T> {
        self.map_err(Report::new)
    }
}

/// Crate-level error composing every kernel sub-module error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// An orchestration error
    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// A configuration loading error
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias using [`error_stack::Report`].
pub type KernelResult<T> = Result<T, Report<KernelError>>;
