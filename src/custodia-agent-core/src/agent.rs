//! The agent orchestrator.
//!
//! Coordinates the TPM, the envelope codec and the custody client behind the
//! operation surface the host shell calls. Every operation is clamped by an
//! outer deadline and runs on its own supervised task, so a panic in the
//! crypto path surfaces as [`AgentError::Internal`] instead of taking the
//! process down, and cancellation abandons the work in flight.
//!
//! ```text
//! Uninitialized --probe ok--> Probed --provision ok--> Provisioned
//!                               |                          |
//!                               +-- TPM missing -----> Unavailable
//!                                                          |
//!                                                          +--login ok--> Authenticated
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use custodia_envelope::{DigestSigner, EnvelopeError, KeyUnwrapper};
use custodia_tpm::{CancelToken, DeviceIdentity, TpmBackend, TpmError, TpmStatus};
use tracing::{info, instrument, warn};

use crate::config::AgentConfig;
use crate::custody::{
    registration_record, CustodyApi, CustodyClient, LoginRequest, OperationTicket, StoreReceipt,
};
use crate::error::AgentError;
use crate::events::{EventSink, TracingEventSink};
use crate::identity::IdentityManager;
use crate::storage;
use crate::task::{supervise, with_deadline};

/// Lifecycle of the agent within one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Nothing checked yet.
    Uninitialized,
    /// A TPM was found by the presence probe.
    Probed,
    /// No usable TPM on this host.
    Unavailable,
    /// Device keys exist and the identity is installed.
    Provisioned,
    /// Logged in to the custody service.
    Authenticated,
}

impl AgentState {
    fn rank(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Unavailable | Self::Probed => 1,
            Self::Provisioned => 2,
            Self::Authenticated => 3,
        }
    }
}

/// The agent engine.
pub struct Agent {
    config: AgentConfig,
    tpm: Option<Arc<dyn TpmBackend>>,
    custody: Arc<dyn CustodyApi>,
    identity: IdentityManager,
    events: Arc<dyn EventSink>,
    state: Arc<RwLock<AgentState>>,
}

impl Agent {
    /// Build an agent against the real TPM and custody service.
    ///
    /// A missing TPM is not fatal here — the agent starts in the
    /// `Unavailable` state and only provisioning hard-fails.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let custody = CustodyClient::new(config.base_url.clone(), config.request_timeout)?;

        let tpm: Option<Arc<dyn TpmBackend>> = match custodia_tpm::TpmClient::open() {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!(error = %e, "starting without a TPM");
                None
            }
        };

        let state = if tpm.is_some() {
            AgentState::Uninitialized
        } else {
            AgentState::Unavailable
        };

        Ok(Self {
            config,
            tpm,
            custody: Arc::new(custody),
            identity: IdentityManager::new(),
            events: Arc::new(TracingEventSink),
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Build an agent from explicit parts. Used by tests to inject a soft
    /// TPM, a mock custody service, and a recording event sink.
    #[must_use]
    pub fn with_parts(
        config: AgentConfig,
        tpm: Option<Arc<dyn TpmBackend>>,
        custody: Arc<dyn CustodyApi>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let state = if tpm.is_some() {
            AgentState::Uninitialized
        } else {
            AgentState::Unavailable
        };
        Self {
            config,
            tpm,
            custody,
            identity: IdentityManager::new(),
            events,
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> AgentState {
        self.state.read().map(|s| *s).unwrap_or(AgentState::Uninitialized)
    }

    fn advance_state(&self, next: AgentState) {
        if let Ok(mut state) = self.state.write() {
            if next.rank() >= state.rank() {
                *state = next;
            }
        }
    }

    fn require_tpm(&self) -> Result<Arc<dyn TpmBackend>, AgentError> {
        self.tpm.clone().ok_or(AgentError::NoTpm)
    }

    /// TPM availability and provisioning state. Computed on demand.
    pub async fn get_status(&self, cancel: &CancelToken) -> Result<TpmStatus, AgentError> {
        let status = TpmStatus {
            available: self.tpm.is_some(),
            initialized: self.identity.initialized(),
        };
        with_deadline(self.config.status_deadline, cancel, async move { Ok(status) }).await
    }

    /// The installed device identity.
    ///
    /// # Errors
    ///
    /// [`AgentError::NotProvisioned`] before provisioning.
    pub fn device_info(&self) -> Result<DeviceIdentity, AgentError> {
        self.identity
            .identity()
            .cloned()
            .ok_or(AgentError::NotProvisioned)
    }

    /// Whether provisioning has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.identity.initialized()
    }

    /// Non-destructive TPM presence check.
    #[instrument(skip_all)]
    pub async fn check_tpm_presence(&self, cancel: &CancelToken) -> Result<bool, AgentError> {
        let opened = self.tpm.is_some();
        let present = with_deadline(self.config.status_deadline, cancel, async move {
            if opened {
                return Ok(true);
            }
            tokio::task::spawn_blocking(custodia_tpm::probe)
                .await
                .map_err(|e| AgentError::internal(format!("probe worker died: {e}")))
        })
        .await?;

        if present {
            info!("TPM presence check successful");
            self.advance_state(AgentState::Probed);
        } else {
            info!("TPM not found or not accessible");
            self.advance_state(AgentState::Unavailable);
        }
        Ok(present)
    }

    /// Whether the custody service answers.
    pub async fn check_connection(&self, cancel: &CancelToken) -> Result<bool, AgentError> {
        let custody = Arc::clone(&self.custody);
        let reachable = with_deadline(self.config.status_deadline, cancel, async move {
            Ok(custody.check_connection().await)
        })
        .await?;
        info!(reachable, "custody connection check");
        Ok(reachable)
    }

    /// Provision the device: create or rediscover the TPM keys, derive the
    /// identity, and make sure the custody service knows this device.
    ///
    /// Idempotent — a second run rediscovers the same keys, performs no
    /// evictions, and skips registration when the service already has us.
    #[instrument(skip_all)]
    pub async fn provision_device(
        &self,
        cancel: &CancelToken,
    ) -> Result<DeviceIdentity, AgentError> {
        let tpm = self.require_tpm()?;
        let custody = Arc::clone(&self.custody);
        let identity_mgr = self.identity.clone();
        let register_deadline = self.config.register_deadline;
        let inner_cancel = cancel.clone();

        let identity = supervise(self.config.provision_deadline, cancel, async move {
            let identity = tpm.provision(&inner_cancel).await?;

            if !custody.check_connection().await {
                return Err(AgentError::network("custody service is not reachable"));
            }

            // 404 here means "not registered yet", not a failure.
            if custody.is_registered(&identity.uuid).await? {
                info!(uuid = %identity.uuid, "device already registered");
            } else {
                info!(uuid = %identity.uuid, "registering new device");
                let record = registration_record(
                    &identity.uuid,
                    &identity.ek_public,
                    &identity.aik_public,
                    &identity.signing_pub_pem,
                );
                with_deadline(register_deadline, &inner_cancel, custody.register(&record))
                    .await?;
            }

            identity_mgr.install(identity.clone())?;
            Ok(identity)
        })
        .await?;

        self.advance_state(AgentState::Provisioned);
        Ok(identity)
    }

    /// Log in to the custody service with the device credentials.
    #[instrument(skip_all)]
    pub async fn auth_login(&self, cancel: &CancelToken) -> Result<(), AgentError> {
        let uuid = self.identity.uuid()?;
        let ek = self.identity.ek()?;
        let custody = Arc::clone(&self.custody);

        supervise(self.config.login_deadline, cancel, async move {
            let request = LoginRequest {
                uuid,
                ek_certificate: BASE64.encode(&ek),
            };
            custody.login(&request).await
        })
        .await?;

        self.advance_state(AgentState::Authenticated);
        Ok(())
    }

    /// List pending operations for this device.
    #[instrument(skip_all)]
    pub async fn get_operations(
        &self,
        cancel: &CancelToken,
    ) -> Result<Vec<OperationTicket>, AgentError> {
        let uuid = self.identity.uuid()?;
        let custody = Arc::clone(&self.custody);
        let api_deadline = self.config.api_deadline;
        let inner_cancel = cancel.clone();

        supervise(self.config.transfer_deadline, cancel, async move {
            with_deadline(api_deadline, &inner_cancel, custody.list_operations(&uuid)).await
        })
        .await
    }

    /// Seal a file and upload it to the custody service.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn encrypt_file(
        &self,
        path: &Path,
        cancel: &CancelToken,
    ) -> Result<StoreReceipt, AgentError> {
        let uuid = self.identity.uuid()?;
        let tpm = self.require_tpm()?;
        let custody = Arc::clone(&self.custody);
        let api_deadline = self.config.api_deadline;
        let inner_cancel = cancel.clone();
        let path = path.to_path_buf();

        supervise(self.config.transfer_deadline, cancel, async move {
            let plaintext = tokio::fs::read(&path)
                .await
                .map_err(|e| AgentError::io(&path, e))?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string());

            let wrap_key = tpm.read_decryption_public().await?;
            let seam = TpmSeam {
                tpm: Arc::clone(&tpm),
                cancel: inner_cancel.clone(),
            };
            let envelope =
                custodia_envelope::seal(&plaintext, &filename, &wrap_key, &seam).await?;

            info!(
                filename,
                ciphertext_len = envelope.encrypted_data.len(),
                "file sealed, uploading"
            );

            with_deadline(
                api_deadline,
                &inner_cancel,
                custody.store_envelope(&uuid, &envelope),
            )
            .await
        })
        .await
    }

    /// Fetch an operation's envelope, verify and decrypt it, and write the
    /// plaintext to the downloads directory.
    ///
    /// Emits `decryption_complete` with the final path on success.
    #[instrument(skip_all, fields(operation_id = %operation_id))]
    pub async fn decrypt_file(
        &self,
        operation_id: &str,
        cancel: &CancelToken,
    ) -> Result<PathBuf, AgentError> {
        let uuid = self.identity.uuid()?;
        let tpm = self.require_tpm()?;
        let custody = Arc::clone(&self.custody);
        let events = Arc::clone(&self.events);
        let api_deadline = self.config.api_deadline;
        let decrypt_deadline = self.config.decrypt_deadline;
        let download_dir = self.config.download_dir.clone();
        let inner_cancel = cancel.clone();
        let operation_id = operation_id.to_string();

        supervise(self.config.transfer_deadline, cancel, async move {
            let retrieved = with_deadline(
                api_deadline,
                &inner_cancel,
                custody.retrieve_envelope(&uuid, &operation_id),
            )
            .await?;
            let (envelope, file_name) = retrieved.into_parts()?;

            let plaintext = with_deadline(decrypt_deadline, &inner_cancel, async {
                let verify_key = tpm.read_signing_public().await?;
                let seam = TpmSeam {
                    tpm: Arc::clone(&tpm),
                    cancel: inner_cancel.clone(),
                };
                Ok(custodia_envelope::open(&envelope, &verify_key, &seam).await?)
            })
            .await?;

            let dir = storage::resolve_download_dir(download_dir.as_deref())?;
            let name = file_name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| storage::fallback_file_name(&operation_id, Utc::now()));
            let path = storage::unique_path(&dir, &name);
            storage::write_restricted(&path, &plaintext).await?;

            info!(path = %path.display(), "decrypted file written");
            events.decryption_complete(&path);
            Ok(path)
        })
        .await
    }

    /// Release the TPM transport.
    pub async fn close(&self) -> Result<(), AgentError> {
        if let Some(tpm) = &self.tpm {
            tpm.close().await?;
        }
        Ok(())
    }
}

/// Adapter wiring the envelope codec's crypto seams to the TPM backend.
struct TpmSeam {
    tpm: Arc<dyn TpmBackend>,
    cancel: CancelToken,
}

fn signing_error(e: TpmError) -> EnvelopeError {
    match e {
        TpmError::Cancelled => EnvelopeError::Cancelled,
        other => EnvelopeError::signing(other.to_string()),
    }
}

fn unwrap_error(e: TpmError) -> EnvelopeError {
    match e {
        TpmError::Cancelled => EnvelopeError::Cancelled,
        other => EnvelopeError::key_unwrap(other.to_string()),
    }
}

#[async_trait]
impl DigestSigner for TpmSeam {
    async fn sign_digest(&self, digest: [u8; 32]) -> Result<Vec<u8>, EnvelopeError> {
        self.tpm
            .sign(&digest, &self.cancel)
            .await
            .map_err(signing_error)
    }
}

#[async_trait]
impl KeyUnwrapper for TpmSeam {
    async fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        self.tpm
            .rsa_decrypt(wrapped, &self.cancel)
            .await
            .map_err(unwrap_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_ordering_never_regresses() {
        assert!(AgentState::Authenticated.rank() > AgentState::Provisioned.rank());
        assert!(AgentState::Provisioned.rank() > AgentState::Probed.rank());
        assert!(AgentState::Probed.rank() > AgentState::Uninitialized.rank());
    }
}
