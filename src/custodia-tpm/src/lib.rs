//! # custodia-tpm
//!
//! TPM 2.0 client for the Custodia agent.
//!
//! This crate owns everything that touches the chip: transport probing, the
//! endorsement and attestation primaries, the persistent signing and
//! decryption keys, and the Sign / RSA_Decrypt primitives the envelope codec
//! builds on. Device identity is derived deterministically from the
//! endorsement key public area, so the same chip always names the same
//! device.
//!
//! ## Key layout
//!
//! | Key | Hierarchy | Persistent handle | Use |
//! |-----|-----------|-------------------|-----|
//! | Endorsement key | Endorsement | — (surfaced only) | identity derivation |
//! | Attestation identity key | Endorsement | — (surfaced only) | registration record |
//! | Signing key | Owner | `0x8100_8F02` | RSASSA/SHA-256 signatures |
//! | Decryption key | Owner | `0x8100_8F03` | OAEP/SHA-256 key unwrap |
//!
//! All keys use null auth. The signing and decryption handles are never
//! reused for the opposite purpose.
//!
//! ## Concurrency
//!
//! The chip is a serial device: every command goes through one mutex, and at
//! most one command is in flight system-wide. Commands run on blocking
//! workers; callers race them against a [`CancelToken`] and abandon the
//! worker on cancellation (the command itself always runs to completion).

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod backend;
pub mod cancel;
mod error;
pub mod identity;

#[cfg(feature = "hardware")]
mod client;
#[cfg(feature = "hardware")]
pub mod templates;

#[cfg(feature = "soft-tpm")]
mod soft;

pub use backend::TpmBackend;
pub use cancel::CancelToken;
pub use error::TpmError;
pub use identity::{derive_device_uuid, DeviceIdentity, TpmStatus};

#[cfg(feature = "hardware")]
pub use client::{probe, TpmClient};

#[cfg(feature = "soft-tpm")]
pub use soft::{CommandSpan, SoftTpm};
