//! The preservation ledger.
//!
//! A manifest records every operation run against one destination and every
//! file those operations touched, keyed by a stable file identifier. It is
//! the source of truth for later verification and restore. Repeated runs
//! against the same destination get sequentially numbered manifest files so
//! each run stays independently restorable.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{PreserveError, Result};

/// Manifest format version this build reads and writes.
pub const MANIFEST_VERSION: u32 = 1;

/// Unsuffixed manifest filename used by the first run into a destination.
pub const MANIFEST_FILENAME: &str = "preserve_manifest.json";

/// Optional subdirectory that keeps manifests out of the payload tree.
pub const PRESERVE_SUBDIR: &str = ".preserve";

const MANIFEST_STEM: &str = "preserve_manifest";

/// Host details captured when a manifest is created. Informational only;
/// never consulted during validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub system: String,
    pub family: String,
    pub machine: String,
}

impl PlatformInfo {
    pub fn current() -> Self {
        Self {
            system: std::env::consts::OS.to_string(),
            family: std::env::consts::FAMILY.to_string(),
            machine: std::env::consts::ARCH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    Copy,
    Move,
    Verify,
    Restore,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationKind::Copy => "COPY",
            OperationKind::Move => "MOVE",
            OperationKind::Verify => "VERIFY",
            OperationKind::Restore => "RESTORE",
        };
        f.write_str(name)
    }
}

/// One recorded COPY/MOVE/VERIFY/RESTORE invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Index within the manifest's operation list, immutable once assigned.
    pub id: usize,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub timestamp: DateTime<Utc>,
    /// Snapshot of the resolved options the operation ran with.
    #[serde(default)]
    pub options: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_line: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub operation_id: usize,
}

/// One tracked file. Entries are created by the first COPY/MOVE that
/// touches a file and updated in place afterwards; nothing deletes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub source_path: String,
    pub destination_path: String,
    pub added_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Algorithm name -> hex digest. Gains algorithms over time, never
    /// loses one.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hashes: BTreeMap<String, String>,
    /// Every operation that touched this entry, in order.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub manifest_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub platform: PlatformInfo,
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub files: BTreeMap<String, FileEntry>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            manifest_version: MANIFEST_VERSION,
            created_at: now,
            updated_at: now,
            platform: PlatformInfo::current(),
            operations: Vec::new(),
            files: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Load a manifest, failing closed: a file claiming any other format
    /// version is rejected outright, never partially parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => PreserveError::NotFound(path.to_path_buf()),
            _ => PreserveError::io(path, e),
        })?;

        let value: Value =
            serde_json::from_str(&text).map_err(|e| PreserveError::ManifestCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        match value.get("manifest_version") {
            Some(version) => {
                let found = version.as_i64().ok_or_else(|| PreserveError::ManifestCorrupt {
                    path: path.to_path_buf(),
                    reason: format!("manifest_version is not an integer: {version}"),
                })?;
                if found != MANIFEST_VERSION as i64 {
                    return Err(PreserveError::ManifestVersionUnsupported {
                        path: path.to_path_buf(),
                        found,
                        supported: MANIFEST_VERSION,
                    });
                }
            }
            None => {
                return Err(PreserveError::ManifestCorrupt {
                    path: path.to_path_buf(),
                    reason: "missing manifest_version".to_string(),
                });
            }
        }

        let manifest: Manifest =
            serde_json::from_value(value).map_err(|e| PreserveError::ManifestCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        debug!(path = %path.display(), operations = manifest.operations.len(), "Loaded manifest");
        Ok(manifest)
    }

    /// Serialize to `path`, refreshing `updated_at` and creating parent
    /// directories as needed.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PreserveError::io(parent, e))?;
        }

        self.updated_at = Utc::now();

        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| PreserveError::io(path, e))?;

        debug!(path = %path.display(), "Saved manifest");
        Ok(())
    }

    /// Append an operation record and return its id.
    pub fn add_operation(
        &mut self,
        kind: OperationKind,
        options: Value,
        source_path: Option<&str>,
        destination_path: Option<&str>,
        command_line: Option<String>,
    ) -> usize {
        let id = self.operations.len();
        self.operations.push(Operation {
            id,
            kind,
            timestamp: Utc::now(),
            options,
            source_path: source_path.map(str::to_string),
            destination_path: destination_path.map(str::to_string),
            command_line,
        });
        id
    }

    /// Record a file under `file_id` (destination path when not supplied).
    ///
    /// Idempotent on the id: an existing entry has its paths and
    /// `updated_at` refreshed rather than being duplicated, and history
    /// grows only when an operation id is supplied.
    pub fn add_file(
        &mut self,
        source_path: &str,
        destination_path: &str,
        size: Option<u64>,
        operation_id: Option<usize>,
        file_id: Option<String>,
    ) -> String {
        let file_id = file_id.unwrap_or_else(|| destination_path.to_string());
        let now = Utc::now();

        match self.files.get_mut(&file_id) {
            Some(entry) => {
                entry.source_path = source_path.to_string();
                entry.destination_path = destination_path.to_string();
                entry.updated_at = Some(now);
                if size.is_some() {
                    entry.size = size;
                }
            }
            None => {
                self.files.insert(
                    file_id.clone(),
                    FileEntry {
                        source_path: source_path.to_string(),
                        destination_path: destination_path.to_string(),
                        added_at: now,
                        updated_at: None,
                        size,
                        hashes: BTreeMap::new(),
                        history: Vec::new(),
                    },
                );
            }
        }

        if let Some(operation_id) = operation_id {
            if let Some(entry) = self.files.get_mut(&file_id) {
                entry.history.push(HistoryEntry {
                    timestamp: now,
                    operation_id,
                });
            }
        }

        file_id
    }

    /// Attach a digest to an entry. Returns false when the id is unknown.
    pub fn add_file_hash(&mut self, file_id: &str, algorithm: &str, hash: &str) -> bool {
        match self.files.get_mut(file_id) {
            Some(entry) => {
                entry
                    .hashes
                    .insert(algorithm.to_string(), hash.to_string());
                true
            }
            None => {
                warn!(file_id, "File not in manifest, dropping hash");
                false
            }
        }
    }

    /// Flip a recorded COPY to MOVE once its sources have been deleted.
    pub fn promote_to_move(&mut self, operation_id: usize) -> bool {
        match self.operations.get_mut(operation_id) {
            Some(op) if op.kind == OperationKind::Copy => {
                op.kind = OperationKind::Move;
                true
            }
            _ => false,
        }
    }

    pub fn file(&self, file_id: &str) -> Option<&FileEntry> {
        self.files.get(file_id)
    }

    pub fn file_by_source(&self, source_path: &str) -> Option<(&String, &FileEntry)> {
        self.files
            .iter()
            .find(|(_, entry)| entry.source_path == source_path)
    }

    pub fn file_by_destination(&self, destination_path: &str) -> Option<(&String, &FileEntry)> {
        self.files
            .iter()
            .find(|(_, entry)| entry.destination_path == destination_path)
    }

    /// Entries whose history references the given operation.
    pub fn files_for_operation(&self, operation_id: usize) -> Vec<(&String, &FileEntry)> {
        self.files
            .iter()
            .filter(|(_, entry)| {
                entry
                    .history
                    .iter()
                    .any(|h| h.operation_id == operation_id)
            })
            .collect()
    }

    pub fn last_operation(&self) -> Option<&Operation> {
        self.operations.last()
    }

    pub fn set_metadata(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    /// Structural self-check: operation ids must match their indices, file
    /// entries must carry both paths, and history must reference recorded
    /// operations.
    pub fn validate(&self) -> (bool, Vec<String>) {
        let mut errors = Vec::new();

        if self.manifest_version != MANIFEST_VERSION {
            errors.push(format!(
                "Unsupported manifest version: {}",
                self.manifest_version
            ));
        }

        for (index, operation) in self.operations.iter().enumerate() {
            if operation.id != index {
                errors.push(format!(
                    "Operation at index {index} has mismatched id {}",
                    operation.id
                ));
            }
        }

        for (file_id, entry) in &self.files {
            if entry.source_path.is_empty() {
                errors.push(format!("File {file_id} is missing source_path"));
            }
            if entry.destination_path.is_empty() {
                errors.push(format!("File {file_id} is missing destination_path"));
            }
            for h in &entry.history {
                if h.operation_id >= self.operations.len() {
                    errors.push(format!(
                        "File {file_id} references unknown operation {}",
                        h.operation_id
                    ));
                }
            }
        }

        (errors.is_empty(), errors)
    }
}

/// One manifest discovered on disk. The legacy unsuffixed file carries
/// number 0 so it sorts before every numbered run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRef {
    pub number: u32,
    pub path: PathBuf,
    pub description: Option<String>,
}

fn manifest_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^preserve_manifest_(\d{3})(?:__(.*))?\.json$").expect("valid regex")
    })
}

/// All manifests in `dir`, sorted by number. A missing or unreadable
/// directory is simply "no manifests".
pub fn find_available_manifests(dir: &Path) -> Vec<ManifestRef> {
    let mut found = Vec::new();

    let legacy = dir.join(MANIFEST_FILENAME);
    if legacy.is_file() {
        found.push(ManifestRef {
            number: 0,
            path: legacy,
            description: None,
        });
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return found,
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(captures) = manifest_pattern().captures(name) else {
            continue;
        };
        let Some(number) = captures.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) else {
            continue;
        };
        found.push(ManifestRef {
            number,
            path: entry.path(),
            description: captures.get(2).map(|m| m.as_str().to_string()),
        });
    }

    found.sort_by_key(|m| m.number);
    found
}

/// Directory the manifest for a destination lives in.
pub fn manifest_dir(destination: &Path, use_preserve_dir: bool) -> PathBuf {
    if use_preserve_dir {
        destination.join(PRESERVE_SUBDIR)
    } else {
        destination.to_path_buf()
    }
}

fn slugify(description: &str) -> String {
    let mut slug = String::new();
    let mut last_was_dash = false;
    for c in description.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
            slug.push(c.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash && !slug.is_empty() {
            slug.push('-');
            last_was_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

fn numbered_name(number: u32, description: Option<&str>) -> String {
    match description.map(slugify).filter(|s| !s.is_empty()) {
        Some(slug) => format!("{MANIFEST_STEM}_{number:03}__{slug}.json"),
        None => format!("{MANIFEST_STEM}_{number:03}.json"),
    }
}

/// Path the next preservation run should write its manifest to.
///
/// First run: the unsuffixed name. Second run: the existing unsuffixed
/// manifest is renamed to `_001` and `_002` comes back — that one-time
/// migration fires whenever the unsuffixed file is alone, so numbered
/// manifests always start at a migrated `_001`. Later runs take the
/// highest existing number plus one.
pub fn next_manifest_path(dir: &Path, description: Option<&str>) -> Result<PathBuf> {
    let manifests = find_available_manifests(dir);

    if manifests.is_empty() {
        return Ok(dir.join(MANIFEST_FILENAME));
    }

    let only_legacy = manifests.len() == 1 && manifests[0].number == 0;
    if only_legacy {
        let migrated = dir.join(numbered_name(1, None));
        fs::rename(&manifests[0].path, &migrated)
            .map_err(|e| PreserveError::io(&manifests[0].path, e))?;
        info!(
            from = %manifests[0].path.display(),
            to = %migrated.display(),
            "Migrated legacy manifest"
        );
        return Ok(dir.join(numbered_name(2, description)));
    }

    let highest = manifests.iter().map(|m| m.number).max().unwrap_or(0);
    Ok(dir.join(numbered_name(highest + 1, description)))
}

/// Pick the manifest a VERIFY or RESTORE should read.
///
/// An explicit path wins when it exists. Otherwise the destination
/// directory is searched, falling back to its `.preserve` subdirectory;
/// `number` selects a specific run, absence selects the newest. `None`
/// means no manifest — a normal, reportable outcome.
pub fn select_manifest(
    dir: &Path,
    number: Option<u32>,
    explicit: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        warn!(path = %path.display(), "Requested manifest does not exist");
        return None;
    }

    let mut manifests = find_available_manifests(dir);
    if manifests.is_empty() {
        manifests = find_available_manifests(&dir.join(PRESERVE_SUBDIR));
    }
    if manifests.is_empty() {
        warn!(dir = %dir.display(), "No manifest files found");
        return None;
    }

    match number {
        Some(number) => {
            let selected = manifests.iter().find(|m| m.number == number);
            if selected.is_none() {
                warn!(number, "Manifest number not found");
            }
            selected.map(|m| m.path.clone())
        }
        None => manifests.last().map(|m| m.path.clone()),
    }
}
