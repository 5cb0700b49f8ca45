//! Operation orchestration.
//!
//! COPY, MOVE, and RESTORE walk a pre-discovered file list strictly
//! sequentially, one manifest per run. Failures are isolated per file: an
//! error is recorded against that file and the batch continues. Only a
//! manifest that cannot be loaded or saved aborts a whole operation. The
//! async entry points wrap the synchronous cores in `spawn_blocking`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::hasher::{HashAlgorithm, digest_file};
use crate::core::manifest::{FileEntry, Manifest, OperationKind};
use crate::core::pathmap::{self, PathStyle};
use crate::core::sidecar::LinkSidecarWriter;
use crate::core::verify::verify_file;
use crate::core::{fileio, metadata};
use crate::error::{PreserveError, Result};

/// Progress and policy notifications emitted while a batch runs.
///
/// Delivery is best-effort; a closed receiver never fails the operation.
#[derive(Debug, Clone)]
pub enum OperationEvent {
    FileStarted { source: PathBuf },
    FileCopied { source: PathBuf, dest: PathBuf, bytes: u64 },
    FileSkipped { source: PathBuf, reason: String },
    FileFailed { source: PathBuf, reason: String },
    FileVerified { dest: PathBuf, verified: bool },
    FileRestored { preserved: PathBuf, original: PathBuf },
    /// A file outside the relative base kept its rootless absolute layout.
    RelativeFallback { source: PathBuf },
    WouldCopy { source: PathBuf, dest: PathBuf },
    WouldRestore { preserved: PathBuf, original: PathBuf },
}

/// Resolved configuration for a COPY batch.
#[derive(Debug, Clone, Serialize)]
pub struct CopyOptions {
    pub path_style: PathStyle,
    pub include_base: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_base: Option<PathBuf>,
    pub overwrite: bool,
    pub preserve_attrs: bool,
    pub verify: bool,
    pub hash_algorithms: Vec<HashAlgorithm>,
    pub dry_run: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            path_style: PathStyle::Relative,
            include_base: false,
            source_base: None,
            overwrite: false,
            preserve_attrs: true,
            verify: true,
            hash_algorithms: vec![HashAlgorithm::Sha256],
            dry_run: false,
        }
    }
}

/// Resolved configuration for a MOVE batch: a COPY plus the delete gate.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MoveOptions {
    #[serde(flatten)]
    pub copy: CopyOptions,
    /// Delete sources even when their copies failed verification.
    pub force: bool,
}

/// Resolved configuration for a RESTORE batch.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreOptions {
    pub overwrite: bool,
    pub preserve_attrs: bool,
    pub verify: bool,
    pub dry_run: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            preserve_attrs: true,
            verify: true,
            dry_run: false,
        }
    }
}

/// Aggregated outcome of one batch, suitable for direct summarization.
#[derive(Debug)]
pub struct OperationResult {
    pub kind: OperationKind,
    /// (source, destination) pairs that completed.
    pub succeeded: Vec<(PathBuf, PathBuf)>,
    pub failed: Vec<(PathBuf, PathBuf)>,
    pub skipped: Vec<(PathBuf, PathBuf)>,
    pub verified: Vec<PathBuf>,
    pub unverified: Vec<PathBuf>,
    /// Source path -> reason, for the failure and skip lists above.
    pub failure_reasons: BTreeMap<String, String>,
    pub skip_reasons: BTreeMap<String, String>,
    /// Supplementary notes that do not revoke a success, e.g. a MOVE that
    /// copied fine but could not remove its source.
    pub notes: BTreeMap<String, String>,
    pub total_bytes: u64,
    pub manifest_path: Option<PathBuf>,
}

impl OperationResult {
    fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            verified: Vec::new(),
            unverified: Vec::new(),
            failure_reasons: BTreeMap::new(),
            skip_reasons: BTreeMap::new(),
            notes: BTreeMap::new(),
            total_bytes: 0,
            manifest_path: None,
        }
    }

    fn add_success(&mut self, source: PathBuf, dest: PathBuf, bytes: u64) {
        self.succeeded.push((source, dest));
        self.total_bytes += bytes;
    }

    fn add_skip(&mut self, source: PathBuf, dest: Option<PathBuf>, reason: &str) {
        self.skip_reasons
            .insert(source.to_string_lossy().into_owned(), reason.to_string());
        self.skipped.push((source, dest.unwrap_or_default()));
    }

    fn add_failure(&mut self, source: PathBuf, dest: Option<PathBuf>, reason: &str) {
        self.failure_reasons
            .insert(source.to_string_lossy().into_owned(), reason.to_string());
        self.failed.push((source, dest.unwrap_or_default()));
    }

    fn add_verification(&mut self, dest: PathBuf, verified: bool) {
        if verified {
            self.verified.push(dest);
        } else {
            self.unverified.push(dest);
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.skipped.len()
    }

    /// True when nothing failed and nothing requested for verification came
    /// back unverified. Skips and notes do not count against success.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.unverified.is_empty()
    }
}

/// Everything a blocking batch needs from the orchestrator.
#[derive(Clone)]
struct BatchContext {
    cancel: CancellationToken,
    events: Option<mpsc::Sender<OperationEvent>>,
    sidecar: Option<Arc<dyn LinkSidecarWriter>>,
}

impl BatchContext {
    fn emit(&self, event: OperationEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.blocking_send(event);
        }
    }
}

/// Runs COPY/MOVE/RESTORE batches against one destination at a time.
#[derive(Default)]
pub struct Orchestrator {
    cancel: CancellationToken,
    events: Option<mpsc::Sender<OperationEvent>>,
    sidecar: Option<Arc<dyn LinkSidecarWriter>>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancellation is honored between files, never mid-file.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_events(mut self, sender: mpsc::Sender<OperationEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn with_sidecar(mut self, writer: impl LinkSidecarWriter + 'static) -> Self {
        self.sidecar = Some(Arc::new(writer));
        self
    }

    fn context(&self) -> BatchContext {
        BatchContext {
            cancel: self.cancel.clone(),
            events: self.events.clone(),
            sidecar: self.sidecar.clone(),
        }
    }

    /// Copy `files` under `dest_base` and record them in a fresh manifest.
    pub async fn copy_files(
        &self,
        files: Vec<PathBuf>,
        dest_base: PathBuf,
        manifest_path: Option<PathBuf>,
        options: CopyOptions,
        command_line: Option<String>,
    ) -> anyhow::Result<OperationResult> {
        let ctx = self.context();
        info!(files = files.len(), dest = %dest_base.display(), "Starting copy");

        tokio::task::spawn_blocking(move || {
            let snapshot = serde_json::to_value(&options)?;
            let (mut result, mut manifest, _) = copy_batch(
                &ctx,
                OperationKind::Copy,
                &files,
                &dest_base,
                &options,
                snapshot,
                command_line,
            )?;
            if let Some(path) = &manifest_path {
                if !options.dry_run {
                    manifest.save(path)?;
                    result.manifest_path = Some(path.clone());
                }
            }
            Ok(result)
        })
        .await?
    }

    /// Copy, then delete each source whose copy is trustworthy.
    ///
    /// A source is removed only when its copy succeeded and verification
    /// was not requested, or confirmed the copy, or `force` is set. The
    /// recorded operation is promoted from COPY to MOVE once the delete
    /// phase has run.
    pub async fn move_files(
        &self,
        files: Vec<PathBuf>,
        dest_base: PathBuf,
        manifest_path: Option<PathBuf>,
        options: MoveOptions,
        command_line: Option<String>,
    ) -> anyhow::Result<OperationResult> {
        let ctx = self.context();
        info!(files = files.len(), dest = %dest_base.display(), "Starting move");

        tokio::task::spawn_blocking(move || {
            let snapshot = serde_json::to_value(&options)?;
            let (mut result, mut manifest, operation_id) = copy_batch(
                &ctx,
                OperationKind::Move,
                &files,
                &dest_base,
                &options.copy,
                snapshot,
                command_line,
            )?;

            if !options.copy.dry_run {
                for (source, dest) in result.succeeded.clone() {
                    let trusted = options.force
                        || !options.copy.verify
                        || result.verified.contains(&dest);
                    if !trusted {
                        debug!(source = %source.display(), "Keeping source, copy not verified");
                        continue;
                    }
                    match fileio::remove_file(&source) {
                        Ok(()) => debug!(source = %source.display(), "Removed source file"),
                        Err(e) => {
                            error!(source = %source.display(), error = %e, "Could not remove source file");
                            result.notes.insert(
                                source.to_string_lossy().into_owned(),
                                format!("Error removing source file: {e}"),
                            );
                        }
                    }
                }
            }

            manifest.promote_to_move(operation_id);
            if let Some(path) = &manifest_path {
                if !options.copy.dry_run {
                    manifest.save(path)?;
                    result.manifest_path = Some(path.clone());
                }
            }
            Ok(result)
        })
        .await?
    }

    /// Put every file recorded in a manifest back at its original path.
    ///
    /// The preserved copy is the read side; relative recorded destinations
    /// resolve against `preserved_dir`. Restored files are verified against
    /// the recorded hashes when any exist.
    pub async fn restore(
        &self,
        manifest_path: PathBuf,
        preserved_dir: PathBuf,
        options: RestoreOptions,
        command_line: Option<String>,
    ) -> anyhow::Result<OperationResult> {
        let ctx = self.context();
        info!(manifest = %manifest_path.display(), "Starting restore");

        tokio::task::spawn_blocking(move || {
            Ok(restore_batch(&ctx, &manifest_path, &preserved_dir, &options, command_line)?)
        })
        .await?
    }
}

/// Per-file outcome of the copy pipeline.
enum FileOutcome {
    Copied {
        dest: PathBuf,
        bytes: u64,
        verified: Option<bool>,
    },
    Skipped {
        reason: String,
    },
    WouldCopy {
        dest: PathBuf,
        bytes: u64,
    },
}

fn copy_batch(
    ctx: &BatchContext,
    kind: OperationKind,
    files: &[PathBuf],
    dest_base: &Path,
    options: &CopyOptions,
    options_snapshot: Value,
    command_line: Option<String>,
) -> Result<(OperationResult, Manifest, usize)> {
    let mut result = OperationResult::new(kind);
    let mut manifest = Manifest::new();

    let sources_summary = files
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(",");
    // Recorded as COPY; a MOVE promotes it after its delete phase.
    let operation_id = manifest.add_operation(
        OperationKind::Copy,
        options_snapshot,
        Some(&sources_summary),
        Some(&dest_base.to_string_lossy()),
        command_line,
    );

    if !options.dry_run {
        fs::create_dir_all(dest_base).map_err(|e| PreserveError::io(dest_base, e))?;
    }

    // The base is fixed once per batch; individual out-of-base files fall
    // back without changing it.
    let base = if options.path_style == PathStyle::Relative {
        pathmap::resolve_base(options.source_base.as_deref(), files)
    } else {
        None
    };

    for source in files {
        if ctx.cancel.is_cancelled() {
            result.add_skip(source.clone(), None, "Operation cancelled");
            continue;
        }

        ctx.emit(OperationEvent::FileStarted {
            source: source.clone(),
        });

        match copy_one(ctx, &mut manifest, operation_id, source, base.as_deref(), dest_base, options) {
            Ok(FileOutcome::Copied {
                dest,
                bytes,
                verified,
            }) => {
                ctx.emit(OperationEvent::FileCopied {
                    source: source.clone(),
                    dest: dest.clone(),
                    bytes,
                });
                if let Some(verified) = verified {
                    if !verified {
                        warn!(dest = %dest.display(), "Verification failed after copy");
                    }
                    ctx.emit(OperationEvent::FileVerified {
                        dest: dest.clone(),
                        verified,
                    });
                    result.add_verification(dest.clone(), verified);
                }
                result.add_success(source.clone(), dest, bytes);
            }
            Ok(FileOutcome::Skipped { reason }) => {
                ctx.emit(OperationEvent::FileSkipped {
                    source: source.clone(),
                    reason: reason.clone(),
                });
                result.add_skip(source.clone(), None, &reason);
            }
            Ok(FileOutcome::WouldCopy { dest, bytes }) => {
                info!(source = %source.display(), dest = %dest.display(), "Would copy (dry run)");
                ctx.emit(OperationEvent::WouldCopy {
                    source: source.clone(),
                    dest: dest.clone(),
                });
                result.add_success(source.clone(), dest, bytes);
            }
            Err(PreserveError::NotFound(_)) => {
                let reason = "Source file does not exist";
                ctx.emit(OperationEvent::FileSkipped {
                    source: source.clone(),
                    reason: reason.to_string(),
                });
                result.add_skip(source.clone(), None, reason);
            }
            Err(PreserveError::AlreadyExists(dest)) => {
                let reason = "Destination exists and overwrite not enabled";
                ctx.emit(OperationEvent::FileSkipped {
                    source: source.clone(),
                    reason: reason.to_string(),
                });
                result.add_skip(source.clone(), Some(dest), reason);
            }
            Err(e) => {
                error!(source = %source.display(), error = %e, "File operation failed");
                ctx.emit(OperationEvent::FileFailed {
                    source: source.clone(),
                    reason: e.to_string(),
                });
                result.add_failure(source.clone(), None, &e.to_string());
            }
        }
    }

    Ok((result, manifest, operation_id))
}

fn copy_one(
    ctx: &BatchContext,
    manifest: &mut Manifest,
    operation_id: usize,
    source: &Path,
    base: Option<&Path>,
    dest_base: &Path,
    options: &CopyOptions,
) -> Result<FileOutcome> {
    let meta = match fs::symlink_metadata(source) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PreserveError::NotFound(source.to_path_buf()));
        }
        Err(e) => return Err(PreserveError::io(source, e)),
    };
    if !meta.is_file() {
        return Ok(FileOutcome::Skipped {
            reason: "Source is not a file".to_string(),
        });
    }

    let projection = pathmap::project(source, options.path_style, base, options.include_base);
    if projection.fell_back {
        warn!(
            source = %source.display(),
            "Not under the relative base, keeping rootless absolute layout"
        );
        ctx.emit(OperationEvent::RelativeFallback {
            source: source.to_path_buf(),
        });
    }
    let dest = dest_base.join(&projection.relative);

    if dest.exists() && !options.overwrite {
        return Err(PreserveError::AlreadyExists(dest));
    }

    if options.dry_run {
        return Ok(FileOutcome::WouldCopy {
            dest,
            bytes: meta.len(),
        });
    }

    let attrs = if options.preserve_attrs {
        match metadata::collect(source) {
            Ok(attrs) => Some(attrs),
            Err(e) => {
                debug!(source = %source.display(), error = %e, "Could not collect attributes");
                None
            }
        }
    } else {
        None
    };

    let bytes = fileio::copy_file(source, &dest)?;

    if let Some(attrs) = &attrs {
        if let Err(e) = metadata::apply(&dest, attrs) {
            debug!(dest = %dest.display(), error = %e, "Could not apply attributes");
        }
    }

    let dest_hashes = if options.verify {
        digest_file(&dest, &options.hash_algorithms)?.unwrap_or_default()
    } else {
        BTreeMap::new()
    };

    let file_id = manifest.add_file(
        &source.to_string_lossy(),
        &dest.to_string_lossy(),
        Some(meta.len()),
        Some(operation_id),
        None,
    );
    for (algorithm, hash) in &dest_hashes {
        manifest.add_file_hash(&file_id, algorithm, hash);
    }

    if let Some(writer) = &ctx.sidecar {
        if let Some(entry) = manifest.file(&file_id) {
            if let Err(e) = writer.write_link(source, &dest, entry) {
                warn!(dest = %dest.display(), error = %e, "Could not write link sidecar");
            }
        }
    }

    let verified = if options.verify {
        let source_hashes = digest_file(source, &options.hash_algorithms)?.unwrap_or_default();
        let (all_match, _) = verify_file(&dest, &source_hashes);
        Some(all_match)
    } else {
        None
    };

    Ok(FileOutcome::Copied {
        dest,
        bytes,
        verified,
    })
}

fn restore_batch(
    ctx: &BatchContext,
    manifest_path: &Path,
    preserved_dir: &Path,
    options: &RestoreOptions,
    command_line: Option<String>,
) -> Result<OperationResult> {
    let mut manifest = Manifest::load(manifest_path)?;
    let mut result = OperationResult::new(OperationKind::Restore);

    let operation_id = manifest.add_operation(
        OperationKind::Restore,
        serde_json::to_value(options)?,
        Some(&preserved_dir.to_string_lossy()),
        None,
        command_line,
    );

    let entries: Vec<(String, FileEntry)> = manifest
        .files
        .iter()
        .map(|(id, entry)| (id.clone(), entry.clone()))
        .collect();

    for (file_id, entry) in entries {
        if ctx.cancel.is_cancelled() {
            result.add_skip(PathBuf::from(&entry.destination_path), None, "Operation cancelled");
            continue;
        }

        if entry.source_path.is_empty() || entry.destination_path.is_empty() {
            result.add_failure(
                PathBuf::from(&entry.destination_path),
                None,
                "Missing source or destination path",
            );
            continue;
        }

        let preserved = resolve_against(&entry.destination_path, preserved_dir);
        let original = PathBuf::from(&entry.source_path);

        match restore_one(&entry, &preserved, &original, options) {
            Ok(Some((bytes, verified))) => {
                ctx.emit(OperationEvent::FileRestored {
                    preserved: preserved.clone(),
                    original: original.clone(),
                });
                if let Some(verified) = verified {
                    if !verified {
                        warn!(original = %original.display(), "Restored file does not match recorded hashes");
                    }
                    result.add_verification(original.clone(), verified);
                }
                manifest.add_file(
                    &entry.source_path,
                    &entry.destination_path,
                    entry.size,
                    Some(operation_id),
                    Some(file_id),
                );
                result.add_success(preserved, original, bytes);
            }
            Ok(None) => {
                info!(preserved = %preserved.display(), original = %original.display(), "Would restore (dry run)");
                ctx.emit(OperationEvent::WouldRestore {
                    preserved: preserved.clone(),
                    original,
                });
                result.add_success(preserved, PathBuf::new(), 0);
            }
            Err(PreserveError::NotFound(path)) => {
                let reason = format!("File not found in preserved location: {}", path.display());
                ctx.emit(OperationEvent::FileFailed {
                    source: preserved.clone(),
                    reason: reason.clone(),
                });
                result.add_failure(preserved, Some(original), &reason);
            }
            Err(PreserveError::AlreadyExists(_)) => {
                let reason = "Original exists and overwrite not enabled";
                ctx.emit(OperationEvent::FileSkipped {
                    source: preserved.clone(),
                    reason: reason.to_string(),
                });
                result.add_skip(preserved, Some(original), reason);
            }
            Err(e) => {
                error!(preserved = %preserved.display(), error = %e, "Restore failed");
                ctx.emit(OperationEvent::FileFailed {
                    source: preserved.clone(),
                    reason: e.to_string(),
                });
                result.add_failure(preserved, Some(original), &e.to_string());
            }
        }
    }

    if !options.dry_run {
        manifest.save(manifest_path)?;
        result.manifest_path = Some(manifest_path.to_path_buf());
    }

    Ok(result)
}

/// One restore: `Ok(Some((bytes, verified)))` on completion, `Ok(None)`
/// for a dry run.
fn restore_one(
    entry: &FileEntry,
    preserved: &Path,
    original: &Path,
    options: &RestoreOptions,
) -> Result<Option<(u64, Option<bool>)>> {
    if !preserved.is_file() {
        return Err(PreserveError::NotFound(preserved.to_path_buf()));
    }
    if original.exists() && !options.overwrite {
        return Err(PreserveError::AlreadyExists(original.to_path_buf()));
    }
    if options.dry_run {
        return Ok(None);
    }

    let attrs = if options.preserve_attrs {
        metadata::collect(preserved).ok()
    } else {
        None
    };

    let bytes = fileio::copy_file(preserved, original)?;

    if let Some(attrs) = &attrs {
        if let Err(e) = metadata::apply(original, attrs) {
            debug!(original = %original.display(), error = %e, "Could not apply attributes");
        }
    }

    let verified = if options.verify && !entry.hashes.is_empty() {
        let (all_match, _) = verify_file(original, &entry.hashes);
        Some(all_match)
    } else {
        None
    };

    Ok(Some((bytes, verified)))
}

fn resolve_against(path: &str, dir: &Path) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::MANIFEST_FILENAME;
    use tempfile::tempdir;

    const HELLO_SHA256: &str =
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn create_file(path: &Path, content: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn copy_records_manifest_and_verifies() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        let dest = temp.path().join("dst");
        create_file(&src.join("a.txt"), b"hello");
        create_file(&src.join("sub/b.txt"), b"world");
        let manifest_path = dest.join(MANIFEST_FILENAME);

        let result = Orchestrator::new()
            .copy_files(
                vec![src.join("a.txt"), src.join("sub/b.txt")],
                dest.clone(),
                Some(manifest_path.clone()),
                CopyOptions::default(),
                Some("preserve copy --dst dst".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(result.succeeded.len(), 2);
        assert_eq!(result.verified.len(), 2);
        assert!(result.is_success());
        assert_eq!(result.total_bytes, 10);
        assert_eq!(std::fs::read(dest.join("a.txt")).unwrap(), b"hello");
        assert_eq!(std::fs::read(dest.join("sub/b.txt")).unwrap(), b"world");

        let manifest = Manifest::load(&manifest_path).unwrap();
        assert_eq!(manifest.files.len(), 2);
        assert_eq!(manifest.operations.len(), 1);
        assert_eq!(manifest.operations[0].kind, OperationKind::Copy);
        let (_, entry) = manifest
            .file_by_destination(&dest.join("a.txt").to_string_lossy())
            .unwrap();
        assert_eq!(entry.hashes.get("SHA256").unwrap(), HELLO_SHA256);
        assert_eq!(entry.size, Some(5));
        assert_eq!(entry.history.len(), 1);
    }

    #[tokio::test]
    async fn existing_destination_skips_unless_overwrite() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        let dest = temp.path().join("dst");
        create_file(&src.join("a.txt"), b"new content");
        create_file(&dest.join("a.txt"), b"old content");

        let orchestrator = Orchestrator::new();
        let result = orchestrator
            .copy_files(
                vec![src.join("a.txt")],
                dest.clone(),
                None,
                CopyOptions::default(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.skipped.len(), 1);
        assert!(
            result
                .skip_reasons
                .values()
                .any(|r| r.contains("overwrite not enabled"))
        );
        assert_eq!(std::fs::read(dest.join("a.txt")).unwrap(), b"old content");

        let result = orchestrator
            .copy_files(
                vec![src.join("a.txt")],
                dest.clone(),
                None,
                CopyOptions {
                    overwrite: true,
                    ..CopyOptions::default()
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.succeeded.len(), 1);
        assert_eq!(std::fs::read(dest.join("a.txt")).unwrap(), b"new content");
    }

    #[tokio::test]
    async fn missing_source_is_a_skip_not_a_failure() {
        let temp = tempdir().unwrap();
        let result = Orchestrator::new()
            .copy_files(
                vec![temp.path().join("ghost.txt")],
                temp.path().join("dst"),
                None,
                CopyOptions::default(),
                None,
            )
            .await
            .unwrap();
        assert!(result.failed.is_empty());
        assert_eq!(result.skipped.len(), 1);
        assert!(
            result
                .skip_reasons
                .values()
                .any(|r| r.contains("does not exist"))
        );
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        let dest = temp.path().join("dst");
        create_file(&src.join("a.txt"), b"hello");
        let manifest_path = dest.join(MANIFEST_FILENAME);

        let result = Orchestrator::new()
            .copy_files(
                vec![src.join("a.txt")],
                dest.clone(),
                Some(manifest_path.clone()),
                CopyOptions {
                    dry_run: true,
                    ..CopyOptions::default()
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.succeeded.len(), 1);
        assert_eq!(result.total_bytes, 5);
        assert!(!dest.exists());
        assert!(!manifest_path.exists());
    }

    #[tokio::test]
    async fn move_deletes_source_and_promotes_operation() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        let dest = temp.path().join("dst");
        create_file(&src.join("a.txt"), b"hello");
        let manifest_path = dest.join(MANIFEST_FILENAME);

        let result = Orchestrator::new()
            .move_files(
                vec![src.join("a.txt")],
                dest.clone(),
                Some(manifest_path.clone()),
                MoveOptions::default(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.succeeded.len(), 1);
        assert_eq!(result.verified.len(), 1);
        assert!(!src.join("a.txt").exists());
        assert_eq!(std::fs::read(dest.join("a.txt")).unwrap(), b"hello");

        let manifest = Manifest::load(&manifest_path).unwrap();
        assert_eq!(manifest.operations[0].kind, OperationKind::Move);
    }

    #[tokio::test]
    async fn move_without_verification_still_deletes() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        let dest = temp.path().join("dst");
        create_file(&src.join("a.txt"), b"hello");

        let options = MoveOptions {
            copy: CopyOptions {
                verify: false,
                ..CopyOptions::default()
            },
            force: false,
        };
        let result = Orchestrator::new()
            .move_files(vec![src.join("a.txt")], dest.clone(), None, options, None)
            .await
            .unwrap();

        assert_eq!(result.succeeded.len(), 1);
        assert!(result.verified.is_empty());
        assert!(!src.join("a.txt").exists());
    }

    #[tokio::test]
    async fn restore_puts_files_back_and_skips_existing() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        let dest = temp.path().join("dst");
        create_file(&src.join("a.txt"), b"hello");
        let manifest_path = dest.join(MANIFEST_FILENAME);

        let orchestrator = Orchestrator::new();
        orchestrator
            .move_files(
                vec![src.join("a.txt")],
                dest.clone(),
                Some(manifest_path.clone()),
                MoveOptions::default(),
                None,
            )
            .await
            .unwrap();
        assert!(!src.join("a.txt").exists());

        let result = orchestrator
            .restore(
                manifest_path.clone(),
                dest.clone(),
                RestoreOptions::default(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.succeeded.len(), 1);
        assert_eq!(result.verified.len(), 1);
        assert!(result.is_success());
        assert_eq!(std::fs::read(src.join("a.txt")).unwrap(), b"hello");

        let manifest = Manifest::load(&manifest_path).unwrap();
        assert_eq!(manifest.operations.len(), 2);
        assert_eq!(manifest.operations[1].kind, OperationKind::Restore);
        let (_, entry) = manifest
            .file_by_source(&src.join("a.txt").to_string_lossy())
            .unwrap();
        assert_eq!(entry.history.len(), 2);

        // Original back in place: a second restore without overwrite skips.
        let result = orchestrator
            .restore(manifest_path, dest, RestoreOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(result.skipped.len(), 1);
        assert!(
            result
                .skip_reasons
                .values()
                .any(|r| r.contains("overwrite not enabled"))
        );
    }

    #[tokio::test]
    async fn cancelled_batch_skips_remaining_files() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        create_file(&src.join("a.txt"), b"hello");
        create_file(&src.join("b.txt"), b"world");

        let token = CancellationToken::new();
        token.cancel();

        let result = Orchestrator::new()
            .with_cancellation(token)
            .copy_files(
                vec![src.join("a.txt"), src.join("b.txt")],
                temp.path().join("dst"),
                None,
                CopyOptions::default(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.skipped.len(), 2);
        assert!(
            result
                .skip_reasons
                .values()
                .all(|r| r == "Operation cancelled")
        );
    }

    #[tokio::test]
    async fn events_are_emitted_during_copy() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        create_file(&src.join("a.txt"), b"hello");
        let (tx, mut rx) = mpsc::channel(16);

        Orchestrator::new()
            .with_events(tx)
            .copy_files(
                vec![src.join("a.txt")],
                temp.path().join("dst"),
                None,
                CopyOptions::default(),
                None,
            )
            .await
            .unwrap();

        let mut saw_started = false;
        let mut saw_copied = false;
        let mut saw_verified = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                OperationEvent::FileStarted { .. } => saw_started = true,
                OperationEvent::FileCopied { bytes, .. } => {
                    saw_copied = true;
                    assert_eq!(bytes, 5);
                }
                OperationEvent::FileVerified { verified, .. } => {
                    saw_verified = true;
                    assert!(verified);
                }
                _ => {}
            }
        }
        assert!(saw_started && saw_copied && saw_verified);
    }
}
