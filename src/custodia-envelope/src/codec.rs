//! Seal and open pipelines.
//!
//! The codec is pure software except for two seams the TPM fills in: signing
//! the ciphertext digest and unwrapping the symmetric key. Both are traits so
//! the pipelines are testable without hardware.
//!
//! Opening verifies the signature before anything else touches the
//! ciphertext; a failed verification never reaches the key-unwrap backend and
//! plaintext is never produced from an unverified envelope.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rsa::{Oaep, Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::cipher::{self, SymmetricKey};
use crate::envelope::{Envelope, EnvelopeMetadata};
use crate::error::EnvelopeError;
use crate::padding::{self, BLOCK_SIZE};

/// Signs a SHA-256 digest with the device signing key.
#[async_trait]
pub trait DigestSigner: Send + Sync {
    /// Produce an RSASSA/SHA-256 signature over `digest`.
    async fn sign_digest(&self, digest: [u8; 32]) -> Result<Vec<u8>, EnvelopeError>;
}

/// Unwraps an OAEP-wrapped symmetric key with the device decryption key.
#[async_trait]
pub trait KeyUnwrapper: Send + Sync {
    /// Recover the symmetric key from `wrapped`.
    async fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>, EnvelopeError>;
}

/// Seal `plaintext` into an envelope.
///
/// The symmetric key is wrapped under `wrap_key` — the device *decryption*
/// key's public half — and the ciphertext digest is signed by `signer`.
pub async fn seal(
    plaintext: &[u8],
    filename: &str,
    wrap_key: &RsaPublicKey,
    signer: &dyn DigestSigner,
) -> Result<Envelope, EnvelopeError> {
    let sym_key = SymmetricKey::generate();
    let iv = cipher::generate_iv();

    let padded = padding::pad(plaintext);
    let ciphertext = cipher::encrypt_blocks(&sym_key, &iv, &padded)?;

    let mut encrypted_data = Vec::with_capacity(BLOCK_SIZE + ciphertext.len());
    encrypted_data.extend_from_slice(&iv);
    encrypted_data.extend_from_slice(&ciphertext);

    let wrapped_key = wrap_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), sym_key.as_bytes())
        .map_err(|e| EnvelopeError::key_wrap(e.to_string()))?;

    let digest: [u8; 32] = Sha256::digest(&encrypted_data).into();
    let signature = signer.sign_digest(digest).await?;

    tracing::debug!(
        plaintext_len = plaintext.len(),
        ciphertext_len = encrypted_data.len(),
        filename,
        "envelope sealed"
    );

    Ok(Envelope {
        encrypted_data,
        encrypted_symmetric_key: BASE64.encode(&wrapped_key),
        digital_signature: BASE64.encode(&signature),
        hash_original: BASE64.encode(digest),
        metadata: EnvelopeMetadata::for_file(filename),
    })
}

/// Open an envelope, returning the original plaintext.
///
/// # Errors
///
/// [`EnvelopeError::SignatureInvalid`] when the signature does not cover this
/// ciphertext under `verify_key`; [`EnvelopeError::MalformedCiphertext`] /
/// [`EnvelopeError::BadPadding`] for structural failures.
pub async fn open(
    envelope: &Envelope,
    verify_key: &RsaPublicKey,
    unwrapper: &dyn KeyUnwrapper,
) -> Result<Vec<u8>, EnvelopeError> {
    envelope.validate()?;

    let signature = BASE64.decode(&envelope.digital_signature)?;
    let digest: [u8; 32] = Sha256::digest(&envelope.encrypted_data).into();
    verify_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
        .map_err(|_| EnvelopeError::SignatureInvalid)?;

    let wrapped_key = BASE64.decode(&envelope.encrypted_symmetric_key)?;
    let key_bytes = unwrapper.unwrap_key(&wrapped_key).await?;
    let key_bytes: [u8; 32] = key_bytes
        .try_into()
        .map_err(|recovered: Vec<u8>| {
            EnvelopeError::key_unwrap(format!(
                "unwrapped key is {} bytes, expected 32",
                recovered.len()
            ))
        })?;
    let sym_key = SymmetricKey::from_bytes(key_bytes);

    let (iv, ciphertext) = envelope.encrypted_data.split_at(BLOCK_SIZE);
    let iv: [u8; BLOCK_SIZE] = iv.try_into().expect("split_at yields a full IV");

    let padded = cipher::decrypt_blocks(&sym_key, &iv, ciphertext)?;
    let plaintext = padding::unpad(&padded)?;

    tracing::debug!(plaintext_len = plaintext.len(), "envelope opened");
    Ok(plaintext.to_vec())
}
