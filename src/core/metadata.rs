//! Best-effort capture and re-application of file attributes.

use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use chrono::{DateTime, Utc};
use filetime::{FileTime, set_file_atime, set_file_mtime, set_file_times};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PreserveError, Result};

/// Attributes captured before a copy so the duplicate can carry them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Unix permission bits; absent on platforms without them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    pub readonly: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessed: Option<DateTime<Utc>>,
}

/// Capture the attributes of `path`.
pub fn collect(path: &Path) -> Result<FileMetadata> {
    let meta = fs::metadata(path).map_err(|e| PreserveError::io(path, e))?;
    let permissions = meta.permissions();

    #[cfg(unix)]
    let mode = Some(permissions.mode());
    #[cfg(not(unix))]
    let mode = None;

    Ok(FileMetadata {
        mode,
        readonly: permissions.readonly(),
        modified: meta.modified().ok().map(DateTime::<Utc>::from),
        accessed: meta.accessed().ok().map(DateTime::<Utc>::from),
    })
}

/// Re-apply captured attributes to `path`.
///
/// Each attribute is attempted independently; everything that fails is
/// folded into a single `MetadataApplyFailed`. Callers log the error and
/// carry on, a half-applied set of attributes never fails an operation.
pub fn apply(path: &Path, metadata: &FileMetadata) -> Result<()> {
    let mut failures: Vec<String> = Vec::new();

    #[cfg(unix)]
    if let Some(mode) = metadata.mode {
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
            debug!(path = %path.display(), error = %e, "Could not apply permissions");
            failures.push(format!("permissions: {e}"));
        }
    }

    #[cfg(not(unix))]
    if metadata.readonly {
        match fs::metadata(path) {
            Ok(meta) => {
                let mut permissions = meta.permissions();
                permissions.set_readonly(true);
                if let Err(e) = fs::set_permissions(path, permissions) {
                    debug!(path = %path.display(), error = %e, "Could not apply read-only flag");
                    failures.push(format!("readonly: {e}"));
                }
            }
            Err(e) => failures.push(format!("readonly: {e}")),
        }
    }

    let timestamps = match (metadata.accessed, metadata.modified) {
        (Some(accessed), Some(modified)) => set_file_times(
            path,
            FileTime::from_system_time(accessed.into()),
            FileTime::from_system_time(modified.into()),
        ),
        (None, Some(modified)) => set_file_mtime(path, FileTime::from_system_time(modified.into())),
        (Some(accessed), None) => set_file_atime(path, FileTime::from_system_time(accessed.into())),
        (None, None) => Ok(()),
    };
    if let Err(e) = timestamps {
        debug!(path = %path.display(), error = %e, "Could not apply timestamps");
        failures.push(format!("timestamps: {e}"));
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(PreserveError::MetadataApplyFailed {
            path: path.to_path_buf(),
            reason: failures.join("; "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn collect_missing_file_is_an_io_error() {
        let temp = tempdir().unwrap();
        let err = collect(&temp.path().join("ghost")).unwrap_err();
        assert!(matches!(err, PreserveError::Io { .. }));
    }

    #[test]
    fn timestamps_round_trip() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("a.txt");
        std::fs::write(&path, b"content").unwrap();

        let stamp = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
        let metadata = FileMetadata {
            mode: None,
            readonly: false,
            modified: Some(stamp),
            accessed: Some(stamp),
        };
        apply(&path, &metadata).unwrap();

        let modified: DateTime<Utc> = std::fs::metadata(&path).unwrap().modified().unwrap().into();
        assert_eq!(modified.timestamp(), 1_600_000_000);
    }

    #[cfg(unix)]
    #[test]
    fn permissions_round_trip() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir().unwrap();
        let original = temp.path().join("original.txt");
        let copy = temp.path().join("copy.txt");
        std::fs::write(&original, b"content").unwrap();
        std::fs::write(&copy, b"content").unwrap();
        std::fs::set_permissions(&original, std::fs::Permissions::from_mode(0o640)).unwrap();

        let collected = collect(&original).unwrap();
        apply(&copy, &collected).unwrap();

        let mode = std::fs::metadata(&copy).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[test]
    fn apply_to_missing_file_reports_what_failed() {
        let temp = tempdir().unwrap();
        let metadata = FileMetadata {
            mode: Some(0o644),
            readonly: false,
            modified: Some(Utc::now()),
            accessed: None,
        };
        let err = apply(&temp.path().join("ghost"), &metadata).unwrap_err();
        match err {
            PreserveError::MetadataApplyFailed { reason, .. } => {
                assert!(reason.contains("timestamps"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
