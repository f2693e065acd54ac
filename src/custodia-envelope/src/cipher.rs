//! AES-256-CBC payload encryption.
//!
//! Padding is handled explicitly by [`crate::padding`], so the cipher layer
//! always sees whole blocks.

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::EnvelopeError;
use crate::padding::BLOCK_SIZE;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// A 256-bit AES key, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    /// Draw a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Wrap existing key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Draw a random CBC initialization vector.
#[must_use]
pub fn generate_iv() -> [u8; BLOCK_SIZE] {
    let mut iv = [0u8; BLOCK_SIZE];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// CBC-encrypt already-padded data.
///
/// # Errors
///
/// [`EnvelopeError::MalformedCiphertext`] if `padded` is not block-aligned.
pub fn encrypt_blocks(
    key: &SymmetricKey,
    iv: &[u8; BLOCK_SIZE],
    padded: &[u8],
) -> Result<Vec<u8>, EnvelopeError> {
    let mut buf = padded.to_vec();
    let len = buf.len();
    Aes256CbcEnc::new(key.as_bytes().into(), iv.into())
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .map_err(|_| EnvelopeError::MalformedCiphertext { len })?;
    Ok(buf)
}

/// CBC-decrypt whole blocks. Padding is still attached afterwards.
///
/// # Errors
///
/// [`EnvelopeError::MalformedCiphertext`] if `ciphertext` is not
/// block-aligned.
pub fn decrypt_blocks(
    key: &SymmetricKey,
    iv: &[u8; BLOCK_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>, EnvelopeError> {
    let mut buf = ciphertext.to_vec();
    let len = buf.len();
    Aes256CbcDec::new(key.as_bytes().into(), iv.into())
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| EnvelopeError::MalformedCiphertext { len })?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::padding;

    #[test]
    fn cbc_roundtrip() {
        let key = SymmetricKey::generate();
        let iv = generate_iv();
        let padded = padding::pad(b"attack at dawn");

        let ciphertext = encrypt_blocks(&key, &iv, &padded).unwrap();
        assert_eq!(ciphertext.len(), padded.len());
        assert_ne!(ciphertext, padded);

        let decrypted = decrypt_blocks(&key, &iv, &ciphertext).unwrap();
        assert_eq!(decrypted, padded);
    }

    #[test]
    fn distinct_ivs_give_distinct_ciphertext() {
        let key = SymmetricKey::generate();
        let padded = padding::pad(b"same plaintext");

        let a = encrypt_blocks(&key, &generate_iv(), &padded).unwrap();
        let b = encrypt_blocks(&key, &generate_iv(), &padded).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn unaligned_input_is_rejected() {
        let key = SymmetricKey::generate();
        let iv = generate_iv();
        assert!(encrypt_blocks(&key, &iv, &[0u8; 15]).is_err());
        assert!(decrypt_blocks(&key, &iv, &[0u8; 17]).is_err());
    }
}
