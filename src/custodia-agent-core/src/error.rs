//! Error types for agent operations.

use std::path::PathBuf;

use custodia_envelope::EnvelopeError;
use custodia_tpm::TpmError;
use thiserror::Error;

/// Errors surfaced by agent operations.
///
/// There are no silent fallbacks: every operation returns either a typed
/// value or one of these.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No usable TPM on this host.
    #[error("No usable TPM 2.0 device on this host")]
    NoTpm,

    /// The operation requires a provisioned device.
    #[error("Device is not provisioned")]
    NotProvisioned,

    /// The chip reported a failure.
    #[error("TPM failure: {code}")]
    Tpm {
        /// Formatted TSS response code.
        code: String,
    },

    /// The operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// The operation's deadline elapsed.
    #[error("Operation deadline exceeded")]
    DeadlineExceeded,

    /// Transport failure or unexpected status from the custody service.
    #[error("Custody service error{}: {reason}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Network {
        /// HTTP status, when the service answered at all.
        status: Option<u16>,
        /// What went wrong.
        reason: String,
    },

    /// The custody service rejected our credentials; log in again.
    #[error("Not authorized by the custody service")]
    Unauthorized,

    /// The custody service has no such resource.
    #[error("Resource not found on the custody service")]
    NotFound,

    /// Envelope validation or cryptography failed.
    #[error(transparent)]
    Envelope(EnvelopeError),

    /// Filesystem failure during encrypt/decrypt.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Caught panic or broken invariant.
    #[error("Internal error: {reason}")]
    Internal {
        /// What broke.
        reason: String,
    },
}

impl AgentError {
    /// Create an internal error.
    #[must_use]
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Create a transport-level network error (no HTTP status).
    #[must_use]
    pub fn network(reason: impl Into<String>) -> Self {
        Self::Network {
            status: None,
            reason: reason.into(),
        }
    }

    /// Map a non-2xx status to the right variant.
    #[must_use]
    pub fn from_status(status: u16, reason: impl Into<String>) -> Self {
        match status {
            401 | 403 => Self::Unauthorized,
            404 => Self::NotFound,
            _ => Self::Network {
                status: Some(status),
                reason: reason.into(),
            },
        }
    }

    /// An I/O error tied to a path.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<TpmError> for AgentError {
    fn from(err: TpmError) -> Self {
        match err {
            TpmError::NoTpm => Self::NoTpm,
            TpmError::NotProvisioned => Self::NotProvisioned,
            TpmError::Cancelled => Self::Cancelled,
            TpmError::WrongHashSize { len } => {
                Self::internal(format!("signing input was {len} bytes, not a SHA-256 digest"))
            }
            TpmError::Chip { code } => Self::Tpm { code },
            TpmError::Transport { reason } => Self::Tpm { code: reason },
        }
    }
}

impl From<EnvelopeError> for AgentError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::Cancelled => Self::Cancelled,
            other => Self::Envelope(other),
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            status: err.status().map(|s| s.as_u16()),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            AgentError::from_status(401, ""),
            AgentError::Unauthorized
        ));
        assert!(matches!(
            AgentError::from_status(403, ""),
            AgentError::Unauthorized
        ));
        assert!(matches!(
            AgentError::from_status(404, ""),
            AgentError::NotFound
        ));
        assert!(matches!(
            AgentError::from_status(500, "boom"),
            AgentError::Network {
                status: Some(500),
                ..
            }
        ));
    }

    #[test]
    fn envelope_cancellation_stays_cancellation() {
        assert!(matches!(
            AgentError::from(EnvelopeError::Cancelled),
            AgentError::Cancelled
        ));
        assert!(matches!(
            AgentError::from(EnvelopeError::SignatureInvalid),
            AgentError::Envelope(EnvelopeError::SignatureInvalid)
        ));
    }
}
