//! Error types for envelope operations.

use thiserror::Error;

/// Errors that can occur while sealing or opening an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Ciphertext shorter than one block or not block-aligned.
    #[error("Malformed ciphertext: {len} bytes is not IV plus whole blocks")]
    MalformedCiphertext {
        /// Length of the rejected ciphertext.
        len: usize,
    },

    /// PKCS#7 padding is absent or inconsistent.
    #[error("Bad PKCS#7 padding")]
    BadPadding,

    /// The signature does not cover this ciphertext under the signing key.
    #[error("Digital signature verification failed")]
    SignatureInvalid,

    /// Wrapping the symmetric key under the device public key failed.
    #[error("Key wrap failed: {reason}")]
    KeyWrap {
        /// Reason for the failure.
        reason: String,
    },

    /// The key-unwrap backend failed.
    #[error("Key unwrap failed: {reason}")]
    KeyUnwrap {
        /// Reason for the failure.
        reason: String,
    },

    /// The signing backend failed.
    #[error("Signing failed: {reason}")]
    Signing {
        /// Reason for the failure.
        reason: String,
    },

    /// A base64 field did not decode.
    #[error("Field encoding error: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// The enclosing operation was cancelled inside a backend call.
    #[error("Envelope operation cancelled")]
    Cancelled,
}

impl EnvelopeError {
    /// Create a key-wrap error.
    #[must_use]
    pub fn key_wrap(reason: impl Into<String>) -> Self {
        Self::KeyWrap {
            reason: reason.into(),
        }
    }

    /// Create a key-unwrap error.
    #[must_use]
    pub fn key_unwrap(reason: impl Into<String>) -> Self {
        Self::KeyUnwrap {
            reason: reason.into(),
        }
    }

    /// Create a signing error.
    #[must_use]
    pub fn signing(reason: impl Into<String>) -> Self {
        Self::Signing {
            reason: reason.into(),
        }
    }
}
