//! Deterministic in-memory TPM for tests and TPM-less development hosts.
//!
//! `SoftTpm` implements [`TpmBackend`] over software RSA keys seeded from a
//! fixed value, so the same seed always yields the same device identity. It
//! serializes commands behind one mutex exactly like the hardware client and
//! records a per-command span log that tests use to assert serialization.
//!
//! There is no hardware binding here: key material lives in process memory.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::backend::TpmBackend;
use crate::cancel::CancelToken;
use crate::error::TpmError;
use crate::identity::{derive_device_uuid, DeviceIdentity};

/// One recorded chip command, for serialization assertions.
#[derive(Debug, Clone)]
pub struct CommandSpan {
    /// Command name (`"provision"`, `"sign"`, `"rsa_decrypt"`).
    pub op: &'static str,
    /// When the command acquired the chip.
    pub started_at: Instant,
    /// When the command released the chip.
    pub finished_at: Instant,
}

struct SoftChip {
    seed: u64,
    ek_public: Vec<u8>,
    aik_public: Vec<u8>,
    signing: Option<RsaPrivateKey>,
    decryption: Option<RsaPrivateKey>,
    evict_control_count: u32,
    log: Vec<CommandSpan>,
}

impl SoftChip {
    /// Stretch the seed into an opaque public-area blob.
    fn synthetic_public(seed: u64, label: &str) -> Vec<u8> {
        let mut blob = Vec::with_capacity(256);
        let mut block = Sha256::new()
            .chain_update(seed.to_be_bytes())
            .chain_update(label.as_bytes())
            .finalize();
        while blob.len() < 256 {
            blob.extend_from_slice(&block);
            block = Sha256::digest(&block);
        }
        blob.truncate(256);
        blob
    }
}

/// In-memory [`TpmBackend`], deterministic for a given seed.
pub struct SoftTpm {
    chip: Arc<Mutex<SoftChip>>,
}

impl SoftTpm {
    /// Create a soft TPM whose keys derive from `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            chip: Arc::new(Mutex::new(SoftChip {
                seed,
                ek_public: SoftChip::synthetic_public(seed, "ek"),
                aik_public: SoftChip::synthetic_public(seed, "aik"),
                signing: None,
                decryption: None,
                evict_control_count: 0,
                log: Vec::new(),
            })),
        }
    }

    /// How many evict-control operations provisioning has performed so far.
    #[must_use]
    pub fn evict_control_count(&self) -> u32 {
        self.chip.lock().expect("soft chip lock").evict_control_count
    }

    /// The recorded command spans, in completion order.
    #[must_use]
    pub fn command_log(&self) -> Vec<CommandSpan> {
        self.chip.lock().expect("soft chip lock").log.clone()
    }

    /// Run a command on a blocking worker under the chip mutex, racing it
    /// against cancellation like the hardware client does.
    async fn run<T, F>(&self, op: &'static str, cancel: &CancelToken, f: F) -> Result<T, TpmError>
    where
        F: FnOnce(&mut SoftChip) -> Result<T, TpmError> + Send + 'static,
        T: Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(TpmError::Cancelled);
        }
        let chip = Arc::clone(&self.chip);
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = chip
                .lock()
                .map_err(|_| TpmError::transport("soft chip lock poisoned"))?;
            let started_at = Instant::now();
            let result = f(&mut guard);
            guard.log.push(CommandSpan {
                op,
                started_at,
                finished_at: Instant::now(),
            });
            result
        });

        tokio::select! {
            joined = task => {
                joined.map_err(|e| TpmError::transport(format!("soft TPM worker died: {e}")))?
            }
            () = cancel.cancelled() => Err(TpmError::Cancelled),
        }
    }
}

#[async_trait]
impl TpmBackend for SoftTpm {
    async fn provision(&self, cancel: &CancelToken) -> Result<DeviceIdentity, TpmError> {
        self.run("provision", cancel, |chip| {
            if chip.signing.is_none() {
                let mut rng = StdRng::seed_from_u64(chip.seed ^ 0x5167);
                chip.signing = Some(
                    RsaPrivateKey::new(&mut rng, 2048)
                        .map_err(|e| TpmError::chip(format!("signing keygen: {e}")))?,
                );
                chip.evict_control_count += 1;
            }
            if chip.decryption.is_none() {
                let mut rng = StdRng::seed_from_u64(chip.seed ^ 0xdec0);
                chip.decryption = Some(
                    RsaPrivateKey::new(&mut rng, 2048)
                        .map_err(|e| TpmError::chip(format!("decryption keygen: {e}")))?,
                );
                chip.evict_control_count += 1;
            }

            let signing_pub_pem = chip
                .signing
                .as_ref()
                .expect("signing key just installed")
                .to_public_key()
                .to_public_key_pem(LineEnding::LF)
                .map_err(|e| TpmError::transport(format!("PEM encoding failed: {e}")))?;

            Ok(DeviceIdentity {
                uuid: derive_device_uuid(&chip.ek_public),
                ek_public: chip.ek_public.clone(),
                aik_public: chip.aik_public.clone(),
                signing_pub_pem,
            })
        })
        .await
    }

    async fn read_signing_public(&self) -> Result<RsaPublicKey, TpmError> {
        self.run("read_signing_public", &CancelToken::new(), |chip| {
            chip.signing
                .as_ref()
                .map(RsaPrivateKey::to_public_key)
                .ok_or(TpmError::NotProvisioned)
        })
        .await
    }

    async fn read_decryption_public(&self) -> Result<RsaPublicKey, TpmError> {
        self.run("read_decryption_public", &CancelToken::new(), |chip| {
            chip.decryption
                .as_ref()
                .map(RsaPrivateKey::to_public_key)
                .ok_or(TpmError::NotProvisioned)
        })
        .await
    }

    async fn sign(&self, digest: &[u8], cancel: &CancelToken) -> Result<Vec<u8>, TpmError> {
        if digest.len() != 32 {
            return Err(TpmError::WrongHashSize { len: digest.len() });
        }
        let digest = digest.to_vec();
        self.run("sign", cancel, move |chip| {
            let key = chip.signing.as_ref().ok_or(TpmError::NotProvisioned)?;
            key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
                .map_err(|e| TpmError::chip(format!("sign: {e}")))
        })
        .await
    }

    async fn rsa_decrypt(
        &self,
        ciphertext: &[u8],
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, TpmError> {
        let ciphertext = ciphertext.to_vec();
        self.run("rsa_decrypt", cancel, move |chip| {
            let key = chip.decryption.as_ref().ok_or(TpmError::NotProvisioned)?;
            key.decrypt(Oaep::new::<Sha256>(), &ciphertext)
                .map_err(|e| TpmError::chip(format!("rsa_decrypt: {e}")))
        })
        .await
    }

    async fn close(&self) -> Result<(), TpmError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn provision_is_idempotent_and_deterministic() {
        let tpm = SoftTpm::new(7);
        let cancel = CancelToken::new();

        let first = tpm.provision(&cancel).await.unwrap();
        let evictions_after_first = tpm.evict_control_count();
        let second = tpm.provision(&cancel).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(tpm.evict_control_count(), evictions_after_first);

        // Same seed on a fresh chip reproduces the identity.
        let replay = SoftTpm::new(7).provision(&cancel).await.unwrap();
        assert_eq!(replay.uuid, first.uuid);
        assert_eq!(replay.signing_pub_pem, first.signing_pub_pem);
    }

    #[tokio::test]
    async fn sign_requires_provisioning_and_a_digest() {
        let tpm = SoftTpm::new(9);
        let cancel = CancelToken::new();

        assert!(matches!(
            tpm.sign(&[0u8; 32], &cancel).await,
            Err(TpmError::NotProvisioned)
        ));

        tpm.provision(&cancel).await.unwrap();
        assert!(matches!(
            tpm.sign(&[0u8; 20], &cancel).await,
            Err(TpmError::WrongHashSize { len: 20 })
        ));

        let signature = tpm.sign(&[0u8; 32], &cancel).await.unwrap();
        assert_eq!(signature.len(), 256);
    }

    #[tokio::test]
    async fn commands_never_overlap() {
        let tpm = Arc::new(SoftTpm::new(11));
        let cancel = CancelToken::new();
        tpm.provision(&cancel).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..8u8 {
            let tpm = Arc::clone(&tpm);
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                tpm.sign(&[i; 32], &cancel).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let log = tpm.command_log();
        for pair in log.windows(2) {
            assert!(
                pair[0].finished_at <= pair[1].started_at,
                "chip commands overlapped: {:?} / {:?}",
                pair[0].op,
                pair[1].op
            );
        }
    }

    #[tokio::test]
    async fn cancelled_sign_returns_cancelled() {
        let tpm = SoftTpm::new(13);
        let cancel = CancelToken::new();
        tpm.provision(&cancel).await.unwrap();

        cancel.cancel();
        assert!(matches!(
            tpm.sign(&[1u8; 32], &cancel).await,
            Err(TpmError::Cancelled)
        ));
    }
}
