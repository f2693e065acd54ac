//! # custodia-envelope
//!
//! The hybrid file envelope used between a Custodia device and the custody
//! service.
//!
//! A sealed file is `IV ‖ AES-256-CBC(PKCS#7(plaintext))` under a fresh
//! 256-bit key, with that key wrapped RSA-OAEP-SHA256 under the device
//! decryption key and the whole ciphertext signed RSASSA/SHA-256 by the
//! device signing key. Sealing and opening are pure software except for the
//! two TPM seams, [`DigestSigner`] and [`KeyUnwrapper`], which the agent
//! wires to the chip.
//!
//! Opening is fail-closed: the signature is verified before the wrapped key
//! is ever handed to the unwrap backend, and no plaintext is produced from an
//! envelope that does not verify.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod cipher;
pub mod codec;
mod envelope;
mod error;
pub mod padding;

pub use codec::{open, seal, DigestSigner, KeyUnwrapper};
pub use envelope::{
    Envelope, EnvelopeMetadata, ENVELOPE_ALGORITHM, ENVELOPE_VERSION, SIGNATURE_LEN,
    WRAPPED_KEY_LEN,
};
pub use error::EnvelopeError;
