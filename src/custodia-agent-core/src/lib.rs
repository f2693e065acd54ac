//! # custodia-agent-core
//!
//! Engine of the Custodia desktop agent: binds a machine to the custody
//! service with the TPM as root of trust, then moves user files through the
//! hybrid envelope pipeline.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Agent                            │
//! │                                                         │
//! │  ┌───────────────┐  ┌───────────────┐  ┌─────────────┐  │
//! │  │ TpmBackend    │  │ CustodyClient │  │ Identity    │  │
//! │  │ (custodia-tpm)│  │ (reqwest)     │  │ Manager     │  │
//! │  └───────┬───────┘  └───────┬───────┘  └─────────────┘  │
//! │          │                  │                           │
//! │          ▼                  ▼                           │
//! │  ┌─────────────────────────────────────────────────┐    │
//! │  │        envelope codec (custodia-envelope)       │    │
//! │  │   AES-256-CBC ∘ PKCS#7, OAEP wrap, RSASSA sig   │    │
//! │  └─────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Operations run under outer deadlines with cooperative cancellation; the
//! TPM serializes its own commands; the identity is a one-shot cell written
//! at the end of provisioning.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod agent;
pub mod config;
pub mod custody;
mod error;
pub mod events;
pub mod identity;
pub mod storage;
pub mod task;

pub use agent::{Agent, AgentState};
pub use config::AgentConfig;
pub use custody::{
    CustodyApi, CustodyClient, DeviceRegistration, LoginRequest, OperationTicket,
    RetrievedEnvelope, StoreReceipt,
};
pub use error::AgentError;
pub use events::{EventSink, TracingEventSink};
pub use identity::IdentityManager;

pub use custodia_tpm::{CancelToken, DeviceIdentity, TpmStatus};
