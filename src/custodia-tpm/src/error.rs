//! Error types for TPM operations.

use thiserror::Error;

/// Errors that can occur while talking to the TPM.
#[derive(Debug, Error)]
pub enum TpmError {
    /// No usable TPM 2.0 device on this host.
    #[error("No usable TPM 2.0 device on this host")]
    NoTpm,

    /// The persistent keys have not been provisioned yet.
    #[error("Device keys are not provisioned")]
    NotProvisioned,

    /// Sign was called with something other than a SHA-256 digest.
    #[error("Digest must be 32 bytes, got {len}")]
    WrongHashSize {
        /// Length of the rejected input.
        len: usize,
    },

    /// The chip reported a command failure.
    #[error("TPM command failed: {code}")]
    Chip {
        /// Formatted TSS response code.
        code: String,
    },

    /// The transport to the TPM is gone or unusable.
    #[error("TPM transport unavailable: {reason}")]
    Transport {
        /// Reason the transport is unusable.
        reason: String,
    },

    /// The enclosing operation was cancelled before the command finished.
    #[error("TPM operation cancelled")]
    Cancelled,
}

impl TpmError {
    /// Wrap a chip-reported failure.
    #[must_use]
    pub fn chip(code: impl std::fmt::Display) -> Self {
        Self::Chip {
            code: code.to_string(),
        }
    }

    /// Wrap a transport-level failure.
    #[must_use]
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }
}
