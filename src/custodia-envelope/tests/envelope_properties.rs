//! Property-based tests for the envelope pipelines.
//!
//! Key generation is expensive, so one fixed device key pair (seeded, so
//! failures reproduce) is shared across all cases; the properties under test
//! do not depend on the key.

use std::sync::OnceLock;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use custodia_envelope::padding;
use custodia_envelope::{open, seal, DigestSigner, Envelope, EnvelopeError, KeyUnwrapper};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

struct SoftSigner(RsaPrivateKey);

#[async_trait]
impl DigestSigner for SoftSigner {
    async fn sign_digest(&self, digest: [u8; 32]) -> Result<Vec<u8>, EnvelopeError> {
        self.0
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| EnvelopeError::Signing {
                reason: e.to_string(),
            })
    }
}

struct SoftUnwrapper(RsaPrivateKey);

#[async_trait]
impl KeyUnwrapper for SoftUnwrapper {
    async fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        self.0
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|e| EnvelopeError::KeyUnwrap {
                reason: e.to_string(),
            })
    }
}

struct Device {
    signer: SoftSigner,
    unwrapper: SoftUnwrapper,
    verify_key: RsaPublicKey,
    wrap_key: RsaPublicKey,
}

fn device() -> &'static Device {
    static DEVICE: OnceLock<Device> = OnceLock::new();
    DEVICE.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(0x0c0ffee);
        let signing = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let decryption = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        Device {
            verify_key: signing.to_public_key(),
            wrap_key: decryption.to_public_key(),
            signer: SoftSigner(signing),
            unwrapper: SoftUnwrapper(decryption),
        }
    })
}

fn seal_blocking(plaintext: &[u8]) -> Envelope {
    let d = device();
    tokio_block(seal(plaintext, "prop.bin", &d.wrap_key, &d.signer)).unwrap()
}

fn open_blocking(envelope: &Envelope) -> Result<Vec<u8>, EnvelopeError> {
    let d = device();
    tokio_block(open(envelope, &d.verify_key, &d.unwrapper))
}

fn tokio_block<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(fut)
}

fn binary_data(max: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        ..ProptestConfig::default()
    })]

    /// Open inverts seal for arbitrary plaintext.
    #[test]
    fn seal_open_roundtrip(plaintext in binary_data(2048)) {
        let envelope = seal_blocking(&plaintext);
        prop_assert_eq!(open_blocking(&envelope).unwrap(), plaintext);
    }

    /// Ciphertext length is IV plus plaintext rounded up one whole block.
    #[test]
    fn ciphertext_length_is_block_rounded(plaintext in binary_data(1024)) {
        let envelope = seal_blocking(&plaintext);
        let expected = 16 + (plaintext.len() / 16 + 1) * 16;
        prop_assert_eq!(envelope.encrypted_data.len(), expected);
    }

    /// Flipping any ciphertext bit breaks the signature, and the error is
    /// SignatureInvalid rather than a padding or cipher failure.
    #[test]
    fn any_bit_flip_is_signature_invalid(
        plaintext in binary_data(512),
        byte_index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut envelope = seal_blocking(&plaintext);
        let idx = byte_index.index(envelope.encrypted_data.len());
        envelope.encrypted_data[idx] ^= 1 << bit;

        prop_assert!(matches!(
            open_blocking(&envelope),
            Err(EnvelopeError::SignatureInvalid)
        ));
    }

    /// Ragged ciphertext never reaches signature verification.
    #[test]
    fn ragged_ciphertext_is_malformed(
        plaintext in binary_data(256),
        cut in 1usize..16,
    ) {
        let mut envelope = seal_blocking(&plaintext);
        let len = envelope.encrypted_data.len() - cut;
        envelope.encrypted_data.truncate(len);

        let result = open_blocking(&envelope);
        let is_malformed = matches!(result, Err(EnvelopeError::MalformedCiphertext { .. }));
        prop_assert!(is_malformed);
    }

    /// A replaced signature of the right length still fails closed.
    #[test]
    fn forged_signature_is_rejected(plaintext in binary_data(256), fill in any::<u8>()) {
        let mut envelope = seal_blocking(&plaintext);
        envelope.digital_signature = BASE64.encode([fill; 256]);

        prop_assert!(matches!(
            open_blocking(&envelope),
            Err(EnvelopeError::SignatureInvalid)
        ));
    }

    /// PKCS#7 padding round-trips for every length and always pads.
    #[test]
    fn padding_roundtrip(data in binary_data(128)) {
        let padded = padding::pad(&data);
        prop_assert!(padded.len() > data.len());
        prop_assert_eq!(padded.len() % 16, 0);
        prop_assert_eq!(padding::unpad(&padded).unwrap(), data.as_slice());
    }
}

#[test]
fn sealed_fields_have_wire_lengths() {
    let envelope = seal_blocking(b"wire check");
    assert_eq!(BASE64.decode(&envelope.digital_signature).unwrap().len(), 256);
    assert_eq!(
        BASE64
            .decode(&envelope.encrypted_symmetric_key)
            .unwrap()
            .len(),
        256
    );
    assert_eq!(BASE64.decode(&envelope.hash_original).unwrap().len(), 32);
}
