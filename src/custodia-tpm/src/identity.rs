//! Device identity derived from TPM-resident key material.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Identity of a provisioned device.
///
/// Populated exactly once by provisioning; every field is stable for the
/// lifetime of the process (and, short of clearing the TPM, the machine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Deterministic UUIDv5 derived from the endorsement key public area.
    pub uuid: String,
    /// Marshalled TPM2B_PUBLIC of the endorsement key.
    pub ek_public: Vec<u8>,
    /// Marshalled TPM2B_PUBLIC of the attestation identity key.
    pub aik_public: Vec<u8>,
    /// SubjectPublicKeyInfo PEM of the persistent signing key.
    pub signing_pub_pem: String,
}

/// Point-in-time availability of the TPM.
///
/// Computed on demand, never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpmStatus {
    /// A TPM transport is open.
    pub available: bool,
    /// Provisioning has completed and the identity is installed.
    pub initialized: bool,
}

/// Derive the device UUID from the endorsement key public area.
///
/// UUIDv5 with namespace = first 16 bytes of SHA-256(EK) and name = the full
/// EK bytes. The same chip always yields the same UUID.
#[must_use]
pub fn derive_device_uuid(ek_public: &[u8]) -> String {
    let digest = Sha256::digest(ek_public);
    let mut namespace = [0u8; 16];
    namespace.copy_from_slice(&digest[..16]);
    Uuid::new_v5(&Uuid::from_bytes(namespace), ek_public).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_is_deterministic() {
        let ek = b"synthetic endorsement key public area";
        assert_eq!(derive_device_uuid(ek), derive_device_uuid(ek));
    }

    #[test]
    fn uuid_differs_per_ek() {
        assert_ne!(derive_device_uuid(b"chip A"), derive_device_uuid(b"chip B"));
    }

    #[test]
    fn uuid_is_v5() {
        let uuid = derive_device_uuid(b"some ek bytes");
        let parsed = Uuid::parse_str(&uuid).unwrap();
        assert_eq!(parsed.get_version_num(), 5);
    }
}
