//! The capability seam between the agent and the chip.

use async_trait::async_trait;
use rsa::RsaPublicKey;

use crate::cancel::CancelToken;
use crate::error::TpmError;
use crate::identity::DeviceIdentity;

/// Operations the agent needs from a TPM.
///
/// The hardware implementation is [`crate::TpmClient`]; tests and TPM-less
/// hosts use the deterministic [`crate::SoftTpm`]. Implementations serialize
/// commands internally — callers may invoke methods concurrently, but no two
/// chip commands ever overlap.
///
/// Every long-running method takes a [`CancelToken`]. A TPM command cannot be
/// aborted mid-flight; on cancellation the in-flight command runs to
/// completion on its worker, the result is dropped, and the method returns
/// [`TpmError::Cancelled`].
#[async_trait]
pub trait TpmBackend: Send + Sync {
    /// Create or rediscover the device keys and derive the device identity.
    ///
    /// Idempotent: repeated calls on the same chip return the same
    /// [`DeviceIdentity`], and a chip with both persistent handles already
    /// installed performs no evictions.
    async fn provision(&self, cancel: &CancelToken) -> Result<DeviceIdentity, TpmError>;

    /// Read the public half of the persistent signing key.
    ///
    /// # Errors
    ///
    /// [`TpmError::NotProvisioned`] if the signing handle is absent.
    async fn read_signing_public(&self) -> Result<RsaPublicKey, TpmError>;

    /// Read the public half of the persistent decryption key.
    ///
    /// # Errors
    ///
    /// [`TpmError::NotProvisioned`] if the decryption handle is absent.
    async fn read_decryption_public(&self) -> Result<RsaPublicKey, TpmError>;

    /// RSASSA/SHA-256 sign a 32-byte digest with the persistent signing key.
    ///
    /// # Errors
    ///
    /// [`TpmError::WrongHashSize`] unless `digest` is exactly 32 bytes;
    /// [`TpmError::NotProvisioned`] if the signing handle is absent.
    async fn sign(&self, digest: &[u8], cancel: &CancelToken) -> Result<Vec<u8>, TpmError>;

    /// OAEP/SHA-256 decrypt a wrapped key with the persistent decryption key.
    async fn rsa_decrypt(&self, ciphertext: &[u8], cancel: &CancelToken)
        -> Result<Vec<u8>, TpmError>;

    /// Release the transport.
    async fn close(&self) -> Result<(), TpmError>;
}
