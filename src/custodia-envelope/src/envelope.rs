//! The file envelope and its metadata.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;
use crate::padding::BLOCK_SIZE;

/// Envelope format version.
pub const ENVELOPE_VERSION: &str = "1.0";

/// Payload cipher named in the metadata.
pub const ENVELOPE_ALGORITHM: &str = "AES-256-CBC";

/// Byte length of the OAEP-wrapped symmetric key (RSA-2048).
pub const WRAPPED_KEY_LEN: usize = 256;

/// Byte length of an RSASSA-2048 signature.
pub const SIGNATURE_LEN: usize = 256;

/// Envelope metadata carried alongside the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    /// Original file name.
    pub filename: String,
    /// Envelope format version, always [`ENVELOPE_VERSION`].
    pub version: String,
    /// Seal time, RFC 3339 UTC.
    pub timestamp: String,
    /// Payload cipher, always [`ENVELOPE_ALGORITHM`].
    pub algorithm: String,
}

impl EnvelopeMetadata {
    /// Metadata for a file sealed right now.
    #[must_use]
    pub fn for_file(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            version: ENVELOPE_VERSION.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            algorithm: ENVELOPE_ALGORITHM.to_string(),
        }
    }
}

/// A sealed file: IV-prefixed ciphertext, the wrapped symmetric key, and the
/// device signature over the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// `IV (16 B) ‖ AES-256-CBC(PKCS#7(plaintext))`, base64 on the wire.
    #[serde(with = "base64_bytes")]
    pub encrypted_data: Vec<u8>,
    /// Base64 of `RSA-OAEP-SHA256(sym_key)` under the device decryption key.
    pub encrypted_symmetric_key: String,
    /// Base64 of the RSASSA/SHA-256 signature over `SHA-256(encrypted_data)`.
    pub digital_signature: String,
    /// Base64 of `SHA-256(encrypted_data)` — the digest the signature covers.
    pub hash_original: String,
    /// Envelope metadata.
    pub metadata: EnvelopeMetadata,
}

impl Envelope {
    /// Check the structural invariants before doing any cryptography.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::MalformedCiphertext`] when the ciphertext is shorter
    /// than one IV or not block-aligned; [`EnvelopeError::KeyUnwrap`] /
    /// [`EnvelopeError::SignatureInvalid`] when the wrapped key or the
    /// signature decode to the wrong length.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        let len = self.encrypted_data.len();
        if len < BLOCK_SIZE || len % BLOCK_SIZE != 0 {
            return Err(EnvelopeError::MalformedCiphertext { len });
        }

        let wrapped = BASE64.decode(&self.encrypted_symmetric_key)?;
        if wrapped.len() != WRAPPED_KEY_LEN {
            return Err(EnvelopeError::key_unwrap(format!(
                "wrapped key is {} bytes, expected {WRAPPED_KEY_LEN}",
                wrapped.len()
            )));
        }

        let signature = BASE64.decode(&self.digital_signature)?;
        if signature.len() != SIGNATURE_LEN {
            return Err(EnvelopeError::SignatureInvalid);
        }

        Ok(())
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(&encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(encrypted_data: Vec<u8>) -> Envelope {
        Envelope {
            encrypted_data,
            encrypted_symmetric_key: BASE64.encode([1u8; WRAPPED_KEY_LEN]),
            digital_signature: BASE64.encode([2u8; SIGNATURE_LEN]),
            hash_original: BASE64.encode([3u8; 32]),
            metadata: EnvelopeMetadata::for_file("report.pdf"),
        }
    }

    #[test]
    fn metadata_defaults() {
        let metadata = EnvelopeMetadata::for_file("a.txt");
        assert_eq!(metadata.version, "1.0");
        assert_eq!(metadata.algorithm, "AES-256-CBC");
        // RFC 3339 UTC with a Z suffix.
        assert!(metadata.timestamp.ends_with('Z'), "{}", metadata.timestamp);
    }

    #[test]
    fn validate_accepts_well_formed() {
        sample(vec![0u8; 32]).validate().unwrap();
    }

    #[test]
    fn validate_rejects_short_and_ragged_ciphertext() {
        assert!(matches!(
            sample(vec![0u8; 15]).validate(),
            Err(EnvelopeError::MalformedCiphertext { len: 15 })
        ));
        assert!(matches!(
            sample(vec![0u8; 33]).validate(),
            Err(EnvelopeError::MalformedCiphertext { len: 33 })
        ));
    }

    #[test]
    fn validate_rejects_wrong_signature_length() {
        let mut envelope = sample(vec![0u8; 32]);
        envelope.digital_signature = BASE64.encode([2u8; 128]);
        assert!(matches!(
            envelope.validate(),
            Err(EnvelopeError::SignatureInvalid)
        ));
    }

    #[test]
    fn serde_roundtrips_ciphertext_as_base64() {
        let envelope = sample(vec![0xAB; 32]);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            json["encrypted_data"].as_str().unwrap(),
            BASE64.encode([0xABu8; 32])
        );

        let back: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }
}
