//! Observable side effects of agent operations.

use std::path::Path;

/// Receiver for the events the agent emits toward its host shell.
pub trait EventSink: Send + Sync {
    /// A decrypted file has been written to `path`.
    fn decryption_complete(&self, path: &Path);
}

/// Default sink: emits structured log records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn decryption_complete(&self, path: &Path) {
        tracing::info!(
            event = "decryption_complete",
            status = "success",
            path = %path.display(),
            "decryption complete"
        );
    }
}
