//! Persistence of decrypted files.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::AgentError;

/// Name used when the ticket carries no file name.
#[must_use]
pub fn fallback_file_name(operation_id: &str, now: DateTime<Utc>) -> String {
    format!("decrypted_file_{operation_id}_{}", now.format("%Y%m%dT%H%M%S"))
}

/// Resolve the directory decrypted files land in.
///
/// # Errors
///
/// [`AgentError::Io`] when no downloads directory can be determined.
pub fn resolve_download_dir(configured: Option<&Path>) -> Result<PathBuf, AgentError> {
    if let Some(dir) = configured {
        return Ok(dir.to_path_buf());
    }
    dirs::download_dir().ok_or_else(|| {
        AgentError::io(
            "~/Downloads",
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no user downloads directory on this host",
            ),
        )
    })
}

/// Pick a path under `dir` for `file_name`, appending `_1`, `_2`, … before
/// the extension until the name is unused.
#[must_use]
pub fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, extension) = match file_name.rsplit_once('.') {
        // A leading dot is a hidden file, not an extension.
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file_name, None),
    };

    for counter in 1u32.. {
        let next = match extension {
            Some(ext) => format!("{stem}_{counter}.{ext}"),
            None => format!("{stem}_{counter}"),
        };
        let candidate = dir.join(next);
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!("u32 counters exhausted while deduplicating a file name")
}

/// Write `data` to `path`, readable and writable by the owner only.
///
/// # Errors
///
/// [`AgentError::Io`] with the offending path on any filesystem failure.
pub async fn write_restricted(path: &Path, data: &[u8]) -> Result<(), AgentError> {
    tokio::fs::write(path, data)
        .await
        .map_err(|e| AgentError::io(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| AgentError::io(path, e))?;
    }

    Ok(())
}
