//! Hardware TPM 2.0 client over tss-esapi.
//!
//! One `TpmClient` owns the transport for the whole process. Every chip
//! command goes through a single mutex — TPM 2.0 sessions are not safely
//! concurrent — and runs on a blocking worker so async callers can race the
//! command against cancellation without wedging the runtime.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{BigUint, RsaPublicKey};
use tss_esapi::{
    handles::{KeyHandle, ObjectHandle, PersistentTpmHandle, TpmHandle},
    interface_types::{
        algorithm::HashingAlgorithm,
        resource_handles::{Hierarchy, Provision},
    },
    structures::{
        Data, Digest, HashScheme, HashcheckTicket, Public, PublicKeyRsa, RsaDecryptionScheme,
        Signature, SignatureScheme,
    },
    tcti_ldr::TctiNameConf,
    traits::Marshall,
    Context,
};

use crate::backend::TpmBackend;
use crate::cancel::CancelToken;
use crate::error::TpmError;
use crate::identity::{derive_device_uuid, DeviceIdentity};
use crate::templates::{self, DECRYPTION_KEY_HANDLE, SIGNING_KEY_HANDLE};

/// Non-destructive check that a TPM device exists and can be opened.
///
/// Never propagates an error: any failure reads as "no TPM".
#[must_use]
pub fn probe() -> bool {
    #[cfg(target_os = "linux")]
    {
        use std::path::Path;

        if !Path::new("/dev/tpm0").exists() && !Path::new("/dev/tpmrm0").exists() {
            tracing::debug!("no TPM device node (/dev/tpm0, /dev/tpmrm0)");
            return false;
        }
    }

    match create_tcti().and_then(|tcti| Context::new(tcti).map_err(TpmError::chip)) {
        Ok(_context) => true,
        Err(e) => {
            tracing::debug!(error = %e, "TPM device present but not openable");
            false
        }
    }
}

#[cfg(target_os = "linux")]
fn create_tcti() -> Result<TctiNameConf, TpmError> {
    use std::str::FromStr;
    use tss_esapi::tcti_ldr::DeviceConfig;

    // Prefer the kernel resource manager when it exists.
    let device_path = if std::path::Path::new("/dev/tpmrm0").exists() {
        "/dev/tpmrm0"
    } else {
        "/dev/tpm0"
    };

    let config = DeviceConfig::from_str(device_path)
        .map_err(|e| TpmError::transport(format!("bad TCTI device config: {e}")))?;
    Ok(TctiNameConf::Device(config))
}

#[cfg(target_os = "windows")]
fn create_tcti() -> Result<TctiNameConf, TpmError> {
    Ok(TctiNameConf::Tbs)
}

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
fn create_tcti() -> Result<TctiNameConf, TpmError> {
    Err(TpmError::NoTpm)
}

/// Hardware TPM client. See the module docs for the concurrency model.
pub struct TpmClient {
    context: Arc<Mutex<Option<Context>>>,
}

impl TpmClient {
    /// Probe for a TPM and open a long-lived transport.
    ///
    /// # Errors
    ///
    /// [`TpmError::NoTpm`] when no device is present or it cannot be opened.
    pub fn open() -> Result<Self, TpmError> {
        if !probe() {
            return Err(TpmError::NoTpm);
        }

        let tcti = create_tcti()?;
        let context = Context::new(tcti).map_err(|e| {
            tracing::error!(error = %e, "failed to open TPM context");
            TpmError::NoTpm
        })?;

        tracing::info!("TPM transport opened");
        Ok(Self {
            context: Arc::new(Mutex::new(Some(context))),
        })
    }

    /// Run a chip command on a blocking worker, racing it against `cancel`.
    ///
    /// On cancellation the worker finishes the in-flight command (the chip
    /// cannot abort it), drops the result, and releases the mutex.
    async fn run<T, F>(&self, cancel: &CancelToken, f: F) -> Result<T, TpmError>
    where
        F: FnOnce(&mut Context) -> Result<T, TpmError> + Send + 'static,
        T: Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(TpmError::Cancelled);
        }
        let slot = Arc::clone(&self.context);
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| TpmError::transport("TPM context lock poisoned"))?;
            let context = guard.as_mut().ok_or(TpmError::NoTpm)?;
            f(context)
        });

        tokio::select! {
            joined = task => {
                joined.map_err(|e| TpmError::transport(format!("TPM worker died: {e}")))?
            }
            () = cancel.cancelled() => Err(TpmError::Cancelled),
        }
    }
}

#[async_trait]
impl TpmBackend for TpmClient {
    async fn provision(&self, cancel: &CancelToken) -> Result<DeviceIdentity, TpmError> {
        let stepwise = cancel.clone();
        self.run(cancel, move |ctx| provision_blocking(ctx, &stepwise))
            .await
    }

    async fn read_signing_public(&self) -> Result<RsaPublicKey, TpmError> {
        self.run(&CancelToken::new(), |ctx| {
            let public = read_persistent_public(ctx, SIGNING_KEY_HANDLE)?
                .ok_or(TpmError::NotProvisioned)?;
            rsa_public_from_tpm(&public)
        })
        .await
    }

    async fn read_decryption_public(&self) -> Result<RsaPublicKey, TpmError> {
        self.run(&CancelToken::new(), |ctx| {
            let public = read_persistent_public(ctx, DECRYPTION_KEY_HANDLE)?
                .ok_or(TpmError::NotProvisioned)?;
            rsa_public_from_tpm(&public)
        })
        .await
    }

    async fn sign(&self, digest: &[u8], cancel: &CancelToken) -> Result<Vec<u8>, TpmError> {
        if digest.len() != 32 {
            return Err(TpmError::WrongHashSize { len: digest.len() });
        }
        let digest = digest.to_vec();
        self.run(cancel, move |ctx| sign_blocking(ctx, &digest)).await
    }

    async fn rsa_decrypt(
        &self,
        ciphertext: &[u8],
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, TpmError> {
        let ciphertext = ciphertext.to_vec();
        self.run(cancel, move |ctx| rsa_decrypt_blocking(ctx, &ciphertext))
            .await
    }

    async fn close(&self) -> Result<(), TpmError> {
        let slot = Arc::clone(&self.context);
        tokio::task::spawn_blocking(move || {
            if let Ok(mut guard) = slot.lock() {
                guard.take();
            }
        })
        .await
        .map_err(|e| TpmError::transport(format!("TPM worker died: {e}")))?;
        tracing::info!("TPM transport closed");
        Ok(())
    }
}

/// The five provisioning steps, run under the context mutex.
fn provision_blocking(ctx: &mut Context, cancel: &CancelToken) -> Result<DeviceIdentity, TpmError> {
    let check = |cancel: &CancelToken| -> Result<(), TpmError> {
        if cancel.is_cancelled() {
            Err(TpmError::Cancelled)
        } else {
            Ok(())
        }
    };

    check(cancel)?;
    let ek_public = surface_endorsement_primary(ctx, templates::endorsement_key()?)?;
    tracing::info!(bytes = ek_public.len(), "endorsement key surfaced");

    check(cancel)?;
    let aik_public = surface_endorsement_primary(ctx, templates::attestation_key()?)?;
    tracing::info!(bytes = aik_public.len(), "attestation identity key surfaced");

    check(cancel)?;
    ensure_persistent_key(ctx, templates::signing_key, SIGNING_KEY_HANDLE)?;

    check(cancel)?;
    ensure_persistent_key(ctx, templates::decryption_key, DECRYPTION_KEY_HANDLE)?;

    check(cancel)?;
    let signing_public =
        read_persistent_public(ctx, SIGNING_KEY_HANDLE)?.ok_or(TpmError::NotProvisioned)?;
    let signing_pub_pem = rsa_public_from_tpm(&signing_public)?
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| TpmError::transport(format!("PEM encoding failed: {e}")))?;

    let uuid = derive_device_uuid(&ek_public);
    tracing::info!(%uuid, "device identity derived");

    Ok(DeviceIdentity {
        uuid,
        ek_public,
        aik_public,
        signing_pub_pem,
    })
}

/// Create a primary under the endorsement hierarchy, capture its marshalled
/// public area, and flush the transient handle.
fn surface_endorsement_primary(ctx: &mut Context, template: Public) -> Result<Vec<u8>, TpmError> {
    let result = ctx
        .execute_with_nullauth_session(|c| {
            c.create_primary(Hierarchy::Endorsement, template, None, None, None, None)
        })
        .map_err(TpmError::chip)?;

    let marshalled = result.out_public.marshall().map_err(TpmError::chip);
    let _ = ctx.flush_context(result.key_handle.into());
    marshalled
}

/// Make sure a key built from `template` sits at `raw_handle`.
///
/// Read-public on an absent handle is the signal to create, not an error.
/// A persistence failure is retried once after clearing the target handle.
fn ensure_persistent_key(
    ctx: &mut Context,
    template: fn() -> Result<Public, TpmError>,
    raw_handle: u32,
) -> Result<(), TpmError> {
    if read_persistent_public(ctx, raw_handle)?.is_some() {
        tracing::debug!("key already persistent at 0x{raw_handle:08x}");
        return Ok(());
    }

    evict_existing(ctx, raw_handle)?;
    if let Err(first) = persist_owner_primary(ctx, template()?, raw_handle) {
        tracing::warn!(
            error = %first,
            "persistence at 0x{raw_handle:08x} failed, clearing handle and retrying once"
        );
        evict_existing(ctx, raw_handle)?;
        persist_owner_primary(ctx, template()?, raw_handle)?;
    }

    // The handle must be readable afterwards or provisioning did not happen.
    if read_persistent_public(ctx, raw_handle)?.is_none() {
        return Err(TpmError::chip(format!(
            "persistent handle 0x{raw_handle:08x} absent after evict_control"
        )));
    }

    tracing::info!("key persisted at 0x{raw_handle:08x}");
    Ok(())
}

/// Create a primary in the owner hierarchy and persist it at `raw_handle`.
fn persist_owner_primary(
    ctx: &mut Context,
    template: Public,
    raw_handle: u32,
) -> Result<(), TpmError> {
    let result = ctx
        .execute_with_nullauth_session(|c| {
            c.create_primary(Hierarchy::Owner, template, None, None, None, None)
        })
        .map_err(TpmError::chip)?;

    let persistent = PersistentTpmHandle::new(raw_handle).map_err(TpmError::chip)?;
    let transient: ObjectHandle = result.key_handle.into();
    let evicted = ctx
        .execute_with_nullauth_session(|c| {
            c.evict_control(Provision::Owner, transient, persistent.into())
        })
        .map_err(TpmError::chip);

    let _ = ctx.flush_context(transient);
    evicted.map(|_| ())
}

/// Remove whatever currently occupies `raw_handle`. Absent is fine.
fn evict_existing(ctx: &mut Context, raw_handle: u32) -> Result<(), TpmError> {
    let persistent = PersistentTpmHandle::new(raw_handle).map_err(TpmError::chip)?;
    let Ok(object) = ctx.tr_from_tpm_public(TpmHandle::Persistent(persistent)) else {
        return Ok(());
    };

    ctx.execute_with_nullauth_session(|c| {
        c.evict_control(Provision::Owner, object, persistent.into())
    })
    .map_err(TpmError::chip)?;
    tracing::debug!("evicted previous occupant of 0x{raw_handle:08x}");
    Ok(())
}

/// Read the public area at a persistent handle, `None` when the handle is
/// not installed.
fn read_persistent_public(ctx: &mut Context, raw_handle: u32) -> Result<Option<Public>, TpmError> {
    let persistent = PersistentTpmHandle::new(raw_handle).map_err(TpmError::chip)?;
    let Ok(object) = ctx.tr_from_tpm_public(TpmHandle::Persistent(persistent)) else {
        return Ok(None);
    };

    match ctx.read_public(KeyHandle::from(object)) {
        Ok((public, _, _)) => Ok(Some(public)),
        Err(_) => Ok(None),
    }
}

fn sign_blocking(ctx: &mut Context, digest: &[u8]) -> Result<Vec<u8>, TpmError> {
    let persistent = PersistentTpmHandle::new(SIGNING_KEY_HANDLE).map_err(TpmError::chip)?;
    let key_handle: KeyHandle = ctx
        .tr_from_tpm_public(TpmHandle::Persistent(persistent))
        .map_err(|_| TpmError::NotProvisioned)?
        .into();

    let tpm_digest = Digest::try_from(digest).map_err(TpmError::chip)?;
    let validation = null_hashcheck_ticket()?;

    let signature = ctx
        .execute_with_nullauth_session(|c| {
            c.sign(
                key_handle,
                tpm_digest,
                SignatureScheme::RsaSsa {
                    hash_scheme: HashScheme::new(HashingAlgorithm::Sha256),
                },
                validation,
            )
        })
        .map_err(TpmError::chip)?;

    match signature {
        Signature::RsaSsa(rsa_sig) => Ok(rsa_sig.signature().as_slice().to_vec()),
        other => Err(TpmError::chip(format!(
            "unexpected signature type from TPM: {other:?}"
        ))),
    }
}

fn rsa_decrypt_blocking(ctx: &mut Context, ciphertext: &[u8]) -> Result<Vec<u8>, TpmError> {
    let persistent = PersistentTpmHandle::new(DECRYPTION_KEY_HANDLE).map_err(TpmError::chip)?;
    let key_handle: KeyHandle = ctx
        .tr_from_tpm_public(TpmHandle::Persistent(persistent))
        .map_err(|_| TpmError::NotProvisioned)?
        .into();

    let wrapped = PublicKeyRsa::try_from(ciphertext.to_vec()).map_err(TpmError::chip)?;
    let scheme = RsaDecryptionScheme::Oaep(HashScheme::new(HashingAlgorithm::Sha256));

    let plaintext = ctx
        .execute_with_nullauth_session(|c| {
            c.rsa_decrypt(key_handle, wrapped, scheme, Data::default())
        })
        .map_err(TpmError::chip)?;

    Ok(plaintext.as_slice().to_vec())
}

/// Null validation ticket for signing externally hashed data.
fn null_hashcheck_ticket() -> Result<HashcheckTicket, TpmError> {
    HashcheckTicket::try_from(tss_esapi::tss2_esys::TPMT_TK_HASHCHECK {
        tag: tss_esapi::constants::tss::TPM2_ST_HASHCHECK,
        hierarchy: tss_esapi::constants::tss::TPM2_RH_NULL,
        digest: tss_esapi::tss2_esys::TPM2B_DIGEST {
            size: 0,
            buffer: [0; 64],
        },
    })
    .map_err(TpmError::chip)
}

/// Convert a TPM RSA public area into an [`RsaPublicKey`].
fn rsa_public_from_tpm(public: &Public) -> Result<RsaPublicKey, TpmError> {
    let Public::Rsa {
        unique, parameters, ..
    } = public
    else {
        return Err(TpmError::chip("persistent key is not RSA"));
    };

    let modulus = BigUint::from_bytes_be(unique.value());
    let raw_exponent = parameters.exponent().value();
    // The chip encodes the default exponent as zero.
    let exponent = if raw_exponent == 0 { 65537 } else { raw_exponent };

    RsaPublicKey::new(modulus, BigUint::from(exponent))
        .map_err(|e| TpmError::chip(format!("invalid RSA public from chip: {e}")))
}
