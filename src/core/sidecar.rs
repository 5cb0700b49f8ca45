//! Optional link-replica sidecars.
//!
//! A sidecar is a small JSON document written next to (or near) each
//! preserved copy, recording where the copy came from and what it looked
//! like. It lets external tooling reconstruct the source relationship
//! without reading the manifest. Writing one is a configuration choice;
//! the engine only calls a writer that was injected.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::manifest::FileEntry;
use crate::core::metadata::{self, FileMetadata};
use crate::error::{PreserveError, Result};

pub const LINK_EXTENSION: &str = "pvlink";
const LINK_VERSION: u32 = 1;

/// Capability for producing a link sidecar per preserved file.
///
/// Implementations must not assume the destination's directory layout
/// beyond the paths they are handed.
pub trait LinkSidecarWriter: Send + Sync {
    /// Write a sidecar describing `dest` as a preserved copy of `source`.
    /// Returns the path of the sidecar written.
    fn write_link(&self, source: &Path, dest: &Path, entry: &FileEntry) -> Result<PathBuf>;
}

/// On-disk sidecar document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkDocument {
    pub link_version: u32,
    pub original_path: String,
    pub preserved_path: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hashes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FileMetadata>,
}

/// Bundled writer producing JSON documents.
///
/// With a `link_dir` the sidecar lands there under the destination's file
/// name; otherwise it sits alongside the copy with `.pvlink` appended to
/// the full file name.
pub struct JsonSidecarWriter {
    link_dir: Option<PathBuf>,
}

impl JsonSidecarWriter {
    pub fn new(link_dir: Option<PathBuf>) -> Self {
        Self { link_dir }
    }

    fn link_path(&self, dest: &Path) -> Result<PathBuf> {
        match &self.link_dir {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(|e| PreserveError::io(dir, e))?;
                let name = dest.file_name().ok_or_else(|| {
                    PreserveError::io(
                        dest,
                        std::io::Error::new(ErrorKind::InvalidInput, "destination has no file name"),
                    )
                })?;
                Ok(append_extension(&dir.join(name)))
            }
            None => Ok(append_extension(dest)),
        }
    }
}

impl LinkSidecarWriter for JsonSidecarWriter {
    fn write_link(&self, source: &Path, dest: &Path, entry: &FileEntry) -> Result<PathBuf> {
        let link_path = self.link_path(dest)?;

        let document = LinkDocument {
            link_version: LINK_VERSION,
            original_path: source.to_string_lossy().into_owned(),
            preserved_path: dest.to_string_lossy().into_owned(),
            created_at: Utc::now(),
            hashes: entry.hashes.clone(),
            size: entry.size,
            // Attributes of the copy itself, so the relationship survives
            // the source going away.
            metadata: metadata::collect(dest).ok(),
        };

        let body = serde_json::to_string_pretty(&document)?;
        fs::write(&link_path, body).map_err(|e| PreserveError::io(&link_path, e))?;

        debug!(link = %link_path.display(), source = %source.display(), "Wrote link sidecar");
        Ok(link_path)
    }
}

/// `a.txt` -> `a.txt.pvlink`, keeping the original extension.
fn append_extension(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(LINK_EXTENSION);
    PathBuf::from(name)
}
