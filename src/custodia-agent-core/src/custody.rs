//! Client for the custody service.
//!
//! The protocol surface is small: device registration, login, operation
//! listing, and envelope store/retrieve. Everything is JSON over HTTPS with a
//! 30-second client timeout, except `store_data` which is multipart with the
//! raw ciphertext as the file part.
//!
//! Error mapping is by status, not by message text: 404 is
//! [`AgentError::NotFound`] (which the registration probe reads as "not
//! registered"), 401/403 is [`AgentError::Unauthorized`], any other non-2xx
//! is [`AgentError::Network`] with the status attached.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use custodia_envelope::{Envelope, EnvelopeMetadata};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Header naming the device on operation calls.
pub const DEVICE_UUID_HEADER: &str = "X-Device-UUID";

/// Registration record for a freshly provisioned device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRegistration {
    /// Device UUID.
    pub uuid: String,
    /// Base64 of the marshalled EK public area.
    pub ek_certificate: String,
    /// Base64 of the marshalled AIK public area.
    pub aik: String,
    /// Signing key public half, SPKI PEM.
    pub public_key: String,
}

/// Login request: the device authenticates with its UUID and EK.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    /// Device UUID.
    pub uuid: String,
    /// Base64 of the marshalled EK public area.
    pub ek_certificate: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// One pending operation as listed by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationTicket {
    /// Opaque operation identifier.
    pub operation_id: String,
    /// File name attached to the operation, when known.
    #[serde(default)]
    pub file_name: Option<String>,
    /// Service-side status label, when present.
    #[serde(default)]
    pub status: Option<String>,
}

/// Acknowledgement for a stored envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreReceipt {
    /// Service-side status label.
    #[serde(default)]
    pub status: Option<String>,
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
    /// Identifier assigned to the stored file.
    #[serde(default)]
    pub file_id: Option<String>,
}

/// An envelope fetched back from the service, plus its file name.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievedEnvelope {
    /// Base64 of `IV ‖ ciphertext`.
    pub encrypted_data: String,
    /// Base64 of the OAEP-wrapped symmetric key.
    pub encrypted_symmetric_key: String,
    /// Base64 of the ciphertext signature.
    pub digital_signature: String,
    /// Base64 of the signed digest.
    pub hash_original: String,
    /// Envelope metadata, when the service stored it.
    #[serde(default)]
    pub metadata: Option<EnvelopeMetadata>,
    /// Name to give the decrypted file.
    #[serde(default)]
    pub file_name: Option<String>,
}

impl RetrievedEnvelope {
    /// Rebuild the envelope, returning it with the suggested file name.
    ///
    /// # Errors
    ///
    /// [`AgentError::Network`] when the ciphertext field is not valid base64
    /// — a malformed service response, not a crypto failure.
    pub fn into_parts(self) -> Result<(Envelope, Option<String>), AgentError> {
        let encrypted_data = BASE64
            .decode(&self.encrypted_data)
            .map_err(|e| AgentError::network(format!("undecodable encrypted_data field: {e}")))?;

        let metadata = self.metadata.unwrap_or_else(|| {
            EnvelopeMetadata::for_file(self.file_name.clone().unwrap_or_default())
        });

        Ok((
            Envelope {
                encrypted_data,
                encrypted_symmetric_key: self.encrypted_symmetric_key,
                digital_signature: self.digital_signature,
                hash_original: self.hash_original,
                metadata,
            },
            self.file_name,
        ))
    }
}

/// The custody protocol surface the orchestrator consumes.
#[async_trait]
pub trait CustodyApi: Send + Sync {
    /// Whether the service answers at all (HEAD on the API root).
    async fn check_connection(&self) -> bool;

    /// Whether this device is already registered. A 404 means "no", not an
    /// error.
    async fn is_registered(&self, uuid: &str) -> Result<bool, AgentError>;

    /// Register a freshly provisioned device.
    async fn register(&self, registration: &DeviceRegistration) -> Result<(), AgentError>;

    /// Authenticate; the bearer token is retained for subsequent calls.
    async fn login(&self, request: &LoginRequest) -> Result<(), AgentError>;

    /// List pending operations for this device.
    async fn list_operations(&self, uuid: &str) -> Result<Vec<OperationTicket>, AgentError>;

    /// Upload a sealed envelope.
    async fn store_envelope(&self, uuid: &str, envelope: &Envelope)
        -> Result<StoreReceipt, AgentError>;

    /// Fetch the envelope behind an operation.
    async fn retrieve_envelope(
        &self,
        uuid: &str,
        operation_id: &str,
    ) -> Result<RetrievedEnvelope, AgentError>;
}

/// HTTPS client for the custody service.
pub struct CustodyClient {
    client: Client,
    base_url: String,
    auth_token: RwLock<Option<String>>,
}

impl CustodyClient {
    /// Build a client against `base_url` (trailing slash expected).
    ///
    /// # Errors
    ///
    /// [`AgentError::Network`] if the underlying HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            auth_token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self.auth_token.read().ok().and_then(|t| t.clone());
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn ensure_success(response: Response) -> Result<Response, AgentError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let reason = response.text().await.unwrap_or_default();
        Err(AgentError::from_status(status.as_u16(), reason))
    }
}

#[async_trait]
impl CustodyApi for CustodyClient {
    async fn check_connection(&self) -> bool {
        match self.client.head(&self.base_url).send().await {
            Ok(response) => {
                let reachable = response.status().is_success();
                if !reachable {
                    tracing::warn!(status = %response.status(), "custody service answered non-2xx");
                }
                reachable
            }
            Err(e) => {
                tracing::warn!(error = %e, "custody service unreachable");
                false
            }
        }
    }

    async fn is_registered(&self, uuid: &str) -> Result<bool, AgentError> {
        let request = self.authorized(self.client.get(self.url(&format!("devices/{uuid}/"))));
        match Self::ensure_success(request.send().await?).await {
            Ok(_) => Ok(true),
            Err(AgentError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn register(&self, registration: &DeviceRegistration) -> Result<(), AgentError> {
        let request = self
            .authorized(self.client.post(self.url("devices/")))
            .json(registration);
        Self::ensure_success(request.send().await?).await?;
        tracing::info!(uuid = %registration.uuid, "device registered with custody service");
        Ok(())
    }

    async fn login(&self, login: &LoginRequest) -> Result<(), AgentError> {
        let request = self
            .client
            .post(self.url("auth/login/"))
            .json(login);
        let response = Self::ensure_success(request.send().await?).await?;
        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| AgentError::network(format!("unparseable login response: {e}")))?;

        if let Ok(mut token) = self.auth_token.write() {
            *token = Some(body.token);
        }
        tracing::info!(uuid = %login.uuid, "logged in to custody service");
        Ok(())
    }

    async fn list_operations(&self, uuid: &str) -> Result<Vec<OperationTicket>, AgentError> {
        let request = self
            .authorized(self.client.get(self.url("operations/")))
            .header(DEVICE_UUID_HEADER, uuid);
        let response = Self::ensure_success(request.send().await?).await?;
        response
            .json()
            .await
            .map_err(|e| AgentError::network(format!("unparseable operations response: {e}")))
    }

    async fn store_envelope(
        &self,
        uuid: &str,
        envelope: &Envelope,
    ) -> Result<StoreReceipt, AgentError> {
        let metadata_json = serde_json::to_string(&envelope.metadata)
            .map_err(|e| AgentError::internal(format!("metadata serialization failed: {e}")))?;

        let form = Form::new()
            .part(
                "encrypted_data",
                Part::bytes(envelope.encrypted_data.clone())
                    .file_name(envelope.metadata.filename.clone()),
            )
            .text(
                "encrypted_symmetric_key",
                envelope.encrypted_symmetric_key.clone(),
            )
            .text("digital_signature", envelope.digital_signature.clone())
            .text("hash_original", envelope.hash_original.clone())
            .text("metadata", metadata_json);

        let request = self
            .authorized(self.client.post(self.url("operations/store_data/")))
            .header(DEVICE_UUID_HEADER, uuid)
            .multipart(form);
        let response = Self::ensure_success(request.send().await?).await?;
        response
            .json()
            .await
            .map_err(|e| AgentError::network(format!("unparseable store response: {e}")))
    }

    async fn retrieve_envelope(
        &self,
        uuid: &str,
        operation_id: &str,
    ) -> Result<RetrievedEnvelope, AgentError> {
        let request = self
            .authorized(self.client.get(self.url("operations/retrieve_data/")))
            .query(&[("operation_id", operation_id)])
            .header(DEVICE_UUID_HEADER, uuid);
        let response = Self::ensure_success(request.send().await?).await?;
        response
            .json()
            .await
            .map_err(|e| AgentError::network(format!("unparseable retrieve response: {e}")))
    }
}

/// Build the registration record from raw identity material.
#[must_use]
pub fn registration_record(
    uuid: &str,
    ek_public: &[u8],
    aik_public: &[u8],
    signing_pub_pem: &str,
) -> DeviceRegistration {
    DeviceRegistration {
        uuid: uuid.to_string(),
        ek_certificate: BASE64.encode(ek_public),
        aik: BASE64.encode(aik_public),
        public_key: signing_pub_pem.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_record_encodes_blobs() {
        let record = registration_record("u-1", b"ek-bytes", b"aik-bytes", "PEM");
        assert_eq!(record.ek_certificate, BASE64.encode(b"ek-bytes"));
        assert_eq!(record.aik, BASE64.encode(b"aik-bytes"));
        assert_eq!(record.public_key, "PEM");
    }

    #[test]
    fn retrieved_envelope_rebuilds() {
        let retrieved = RetrievedEnvelope {
            encrypted_data: BASE64.encode([7u8; 32]),
            encrypted_symmetric_key: "key".into(),
            digital_signature: "sig".into(),
            hash_original: "hash".into(),
            metadata: None,
            file_name: Some("report.pdf".into()),
        };

        let (envelope, file_name) = retrieved.into_parts().unwrap();
        assert_eq!(envelope.encrypted_data, vec![7u8; 32]);
        assert_eq!(envelope.metadata.filename, "report.pdf");
        assert_eq!(file_name.as_deref(), Some("report.pdf"));
    }

    #[test]
    fn retrieved_envelope_rejects_bad_base64() {
        let retrieved = RetrievedEnvelope {
            encrypted_data: "not base64 !!".into(),
            encrypted_symmetric_key: String::new(),
            digital_signature: String::new(),
            hash_original: String::new(),
            metadata: None,
            file_name: None,
        };
        assert!(matches!(
            retrieved.into_parts(),
            Err(AgentError::Network { .. })
        ));
    }

    #[test]
    fn ticket_tolerates_extra_and_missing_fields() {
        let ticket: OperationTicket = serde_json::from_str(
            r#"{"operation_id":"op-9","created_by":"someone","file_name":"a.bin"}"#,
        )
        .unwrap();
        assert_eq!(ticket.operation_id, "op-9");
        assert_eq!(ticket.file_name.as_deref(), Some("a.bin"));
        assert!(ticket.status.is_none());
    }
}
