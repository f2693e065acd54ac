//! Configuration for the agent.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`crate::Agent`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Custody service base URL, with a trailing slash.
    pub base_url: String,
    /// Per-request HTTP client timeout.
    pub request_timeout: Duration,
    /// Deadline for status, probe and connectivity checks.
    pub status_deadline: Duration,
    /// Outer deadline for provisioning.
    pub provision_deadline: Duration,
    /// Inner deadline for the registration POST during provisioning.
    pub register_deadline: Duration,
    /// Deadline for login.
    pub login_deadline: Duration,
    /// Outer deadline for encrypt, decrypt and operation listing.
    pub transfer_deadline: Duration,
    /// Inner deadline for a single custody API call inside a transfer.
    pub api_deadline: Duration,
    /// Inner deadline for envelope verification and decryption.
    pub decrypt_deadline: Duration,
    /// Where decrypted files land. `None` means the user downloads directory.
    pub download_dir: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: "https://custody.custodia.dev/api/v1/".into(),
            request_timeout: Duration::from_secs(30),
            status_deadline: Duration::from_secs(10),
            provision_deadline: Duration::from_secs(5 * 60),
            register_deadline: Duration::from_secs(30),
            login_deadline: Duration::from_secs(30),
            transfer_deadline: Duration::from_secs(10 * 60),
            api_deadline: Duration::from_secs(2 * 60),
            decrypt_deadline: Duration::from_secs(5 * 60),
            download_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_ends_with_slash() {
        assert!(AgentConfig::default().base_url.ends_with('/'));
    }
}
