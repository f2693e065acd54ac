//! Process-wide device identity.

use std::sync::{Arc, OnceLock};

use custodia_tpm::DeviceIdentity;

use crate::error::AgentError;

/// Holds the [`DeviceIdentity`] after provisioning.
///
/// The identity is a one-shot cell: written exactly once, at the end of a
/// successful provision, and read-only afterwards. Readers either see the
/// fully initialized value or nothing.
#[derive(Debug, Clone, Default)]
pub struct IdentityManager {
    cell: Arc<OnceLock<DeviceIdentity>>,
}

impl IdentityManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether provisioning has installed an identity.
    #[must_use]
    pub fn initialized(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Install the identity. Idempotent for an identical value; installing a
    /// *different* identity is an invariant violation.
    pub(crate) fn install(&self, identity: DeviceIdentity) -> Result<(), AgentError> {
        let uuid = identity.uuid.clone();
        match self.cell.set(identity) {
            Ok(()) => {
                tracing::info!(%uuid, "device identity installed");
                Ok(())
            }
            Err(rejected) => {
                let current = self.cell.get().expect("cell is set on set() failure");
                if *current == rejected {
                    Ok(())
                } else {
                    Err(AgentError::internal(
                        "provisioning produced a different device identity than the installed one",
                    ))
                }
            }
        }
    }

    /// The installed identity, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.cell.get()
    }

    fn require(&self) -> Result<&DeviceIdentity, AgentError> {
        self.cell.get().ok_or(AgentError::NotProvisioned)
    }

    /// Device UUID.
    pub fn uuid(&self) -> Result<String, AgentError> {
        Ok(self.require()?.uuid.clone())
    }

    /// PEM of the signing key public half.
    pub fn signing_public_pem(&self) -> Result<String, AgentError> {
        Ok(self.require()?.signing_pub_pem.clone())
    }

    /// Marshalled endorsement key public area.
    pub fn ek(&self) -> Result<Vec<u8>, AgentError> {
        Ok(self.require()?.ek_public.clone())
    }

    /// Marshalled attestation identity key public area.
    pub fn aik(&self) -> Result<Vec<u8>, AgentError> {
        Ok(self.require()?.aik_public.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(uuid: &str) -> DeviceIdentity {
        DeviceIdentity {
            uuid: uuid.into(),
            ek_public: vec![1, 2, 3],
            aik_public: vec![4, 5, 6],
            signing_pub_pem: "-----BEGIN PUBLIC KEY-----".into(),
        }
    }

    #[test]
    fn getters_fail_before_install() {
        let manager = IdentityManager::new();
        assert!(!manager.initialized());
        assert!(matches!(manager.uuid(), Err(AgentError::NotProvisioned)));
        assert!(matches!(manager.ek(), Err(AgentError::NotProvisioned)));
        assert!(matches!(manager.aik(), Err(AgentError::NotProvisioned)));
        assert!(matches!(
            manager.signing_public_pem(),
            Err(AgentError::NotProvisioned)
        ));
    }

    #[test]
    fn install_once_then_read() {
        let manager = IdentityManager::new();
        manager.install(sample("device-1")).unwrap();
        assert!(manager.initialized());
        assert_eq!(manager.uuid().unwrap(), "device-1");
    }

    #[test]
    fn reinstall_same_identity_is_idempotent() {
        let manager = IdentityManager::new();
        manager.install(sample("device-1")).unwrap();
        manager.install(sample("device-1")).unwrap();
        assert_eq!(manager.uuid().unwrap(), "device-1");
    }

    #[test]
    fn reinstall_different_identity_is_an_error() {
        let manager = IdentityManager::new();
        manager.install(sample("device-1")).unwrap();
        assert!(matches!(
            manager.install(sample("device-2")),
            Err(AgentError::Internal { .. })
        ));
        // The original value is untouched.
        assert_eq!(manager.uuid().unwrap(), "device-1");
    }

    #[test]
    fn clones_share_the_cell() {
        let manager = IdentityManager::new();
        let clone = manager.clone();
        manager.install(sample("device-1")).unwrap();
        assert_eq!(clone.uuid().unwrap(), "device-1");
    }
}
