//! Public-area templates for the four keys the agent touches.
//!
//! The endorsement and attestation keys are primaries in the endorsement
//! hierarchy and are only surfaced, never persisted. The signing and
//! decryption keys are created in the owner hierarchy and installed at fixed
//! persistent handles, one per key use: the signing key never decrypts and
//! the decryption key never signs.

use tss_esapi::{
    attributes::ObjectAttributesBuilder,
    interface_types::{
        algorithm::{HashingAlgorithm, PublicAlgorithm},
        key_bits::RsaKeyBits,
    },
    structures::{
        HashScheme, Public, PublicBuilder, PublicKeyRsa, PublicRsaParameters, RsaExponent,
        RsaScheme, SymmetricDefinitionObject,
    },
};

use crate::error::TpmError;

/// Persistent handle of the RSASSA signing key.
pub const SIGNING_KEY_HANDLE: u32 = 0x8100_8F02;

/// Persistent handle of the OAEP decryption key.
pub const DECRYPTION_KEY_HANDLE: u32 = 0x8100_8F03;

fn build_err(e: tss_esapi::Error) -> TpmError {
    TpmError::chip(e)
}

/// Endorsement key template: restricted storage key under the endorsement
/// hierarchy, RSA-2048 with AES-128-CFB protection.
pub fn endorsement_key() -> Result<Public, TpmError> {
    let attributes = ObjectAttributesBuilder::new()
        .with_fixed_tpm(true)
        .with_fixed_parent(true)
        .with_sensitive_data_origin(true)
        .with_admin_with_policy(true)
        .with_restricted(true)
        .with_decrypt(true)
        .build()
        .map_err(build_err)?;

    PublicBuilder::new()
        .with_public_algorithm(PublicAlgorithm::Rsa)
        .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
        .with_object_attributes(attributes)
        .with_rsa_parameters(PublicRsaParameters::new(
            SymmetricDefinitionObject::AES_128_CFB,
            RsaScheme::Null,
            RsaKeyBits::Rsa2048,
            RsaExponent::default(),
        ))
        .with_rsa_unique_identifier(PublicKeyRsa::default())
        .build()
        .map_err(build_err)
}

/// Attestation identity key template: restricted RSASSA/SHA-256 signer under
/// the endorsement hierarchy.
pub fn attestation_key() -> Result<Public, TpmError> {
    let attributes = ObjectAttributesBuilder::new()
        .with_fixed_tpm(true)
        .with_fixed_parent(true)
        .with_sensitive_data_origin(true)
        .with_user_with_auth(true)
        .with_restricted(true)
        .with_sign_encrypt(true)
        .build()
        .map_err(build_err)?;

    PublicBuilder::new()
        .with_public_algorithm(PublicAlgorithm::Rsa)
        .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
        .with_object_attributes(attributes)
        .with_rsa_parameters(PublicRsaParameters::new(
            SymmetricDefinitionObject::Null,
            RsaScheme::RsaSsa(HashScheme::new(HashingAlgorithm::Sha256)),
            RsaKeyBits::Rsa2048,
            RsaExponent::default(),
        ))
        .with_rsa_unique_identifier(PublicKeyRsa::default())
        .build()
        .map_err(build_err)
}

/// Signing key template: unrestricted RSASSA/SHA-256 signer, null auth,
/// e = 65537. Persisted at [`SIGNING_KEY_HANDLE`].
pub fn signing_key() -> Result<Public, TpmError> {
    let attributes = ObjectAttributesBuilder::new()
        .with_fixed_tpm(true)
        .with_fixed_parent(true)
        .with_sensitive_data_origin(true)
        .with_user_with_auth(true)
        .with_sign_encrypt(true)
        .build()
        .map_err(build_err)?;

    PublicBuilder::new()
        .with_public_algorithm(PublicAlgorithm::Rsa)
        .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
        .with_object_attributes(attributes)
        .with_rsa_parameters(PublicRsaParameters::new(
            SymmetricDefinitionObject::Null,
            RsaScheme::RsaSsa(HashScheme::new(HashingAlgorithm::Sha256)),
            RsaKeyBits::Rsa2048,
            RsaExponent::create(65537).map_err(build_err)?,
        ))
        .with_rsa_unique_identifier(PublicKeyRsa::default())
        .build()
        .map_err(build_err)
}

/// Decryption key template: unrestricted RSA decrypt key with a null scheme
/// so the unwrap call selects OAEP/SHA-256, e = 65537. Persisted at
/// [`DECRYPTION_KEY_HANDLE`].
pub fn decryption_key() -> Result<Public, TpmError> {
    let attributes = ObjectAttributesBuilder::new()
        .with_fixed_tpm(true)
        .with_fixed_parent(true)
        .with_sensitive_data_origin(true)
        .with_user_with_auth(true)
        .with_decrypt(true)
        .build()
        .map_err(build_err)?;

    PublicBuilder::new()
        .with_public_algorithm(PublicAlgorithm::Rsa)
        .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
        .with_object_attributes(attributes)
        .with_rsa_parameters(PublicRsaParameters::new(
            SymmetricDefinitionObject::Null,
            RsaScheme::Null,
            RsaKeyBits::Rsa2048,
            RsaExponent::create(65537).map_err(build_err)?,
        ))
        .with_rsa_unique_identifier(PublicKeyRsa::default())
        .build()
        .map_err(build_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_template_is_sign_only() {
        let public = signing_key().unwrap();
        let attrs = public.object_attributes();
        assert!(attrs.sign_encrypt());
        assert!(!attrs.decrypt());
        assert!(attrs.fixed_tpm());
        assert!(attrs.fixed_parent());
        assert!(attrs.sensitive_data_origin());
        assert!(attrs.user_with_auth());
    }

    #[test]
    fn decryption_template_is_decrypt_only() {
        let public = decryption_key().unwrap();
        let attrs = public.object_attributes();
        assert!(attrs.decrypt());
        assert!(!attrs.sign_encrypt());
        assert!(!attrs.restricted());
    }

    #[test]
    fn endorsement_template_is_restricted_storage() {
        let public = endorsement_key().unwrap();
        let attrs = public.object_attributes();
        assert!(attrs.restricted());
        assert!(attrs.decrypt());
        assert!(!attrs.sign_encrypt());
    }

    #[test]
    fn handles_are_distinct_and_persistent_range() {
        assert_ne!(SIGNING_KEY_HANDLE, DECRYPTION_KEY_HANDLE);
        for handle in [SIGNING_KEY_HANDLE, DECRYPTION_KEY_HANDLE] {
            assert_eq!(handle >> 24, 0x81, "0x{handle:08x} not persistent");
        }
    }
}
