//! Hash verification against recorded manifests.
//!
//! Two entry points: manifest-driven batch verification of a destination,
//! and three-way comparison that localizes a divergence to the live source,
//! the preserved copy, or neither. Per-file outcomes land in exactly one
//! bucket; nothing here raises for an individual file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::hasher::{HashAlgorithm, digest_file};
use crate::core::manifest::{FileEntry, Manifest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    Verified,
    Failed,
    Skipped,
    Error,
    NotFound,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Verified => "verified",
            VerificationStatus::Failed => "failed",
            VerificationStatus::Skipped => "skipped",
            VerificationStatus::Error => "error",
            VerificationStatus::NotFound => "not_found",
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of checking one file.
#[derive(Debug, Clone)]
pub struct FileVerificationResult {
    pub file_path: PathBuf,
    pub status: VerificationStatus,
    pub expected_hash: Option<String>,
    pub actual_hash: Option<String>,
    pub algorithm: Option<String>,
    pub error_message: Option<String>,
}

impl FileVerificationResult {
    fn new(file_path: PathBuf, status: VerificationStatus) -> Self {
        Self {
            file_path,
            status,
            expected_hash: None,
            actual_hash: None,
            algorithm: None,
            error_message: None,
        }
    }

    /// One-line description for summaries and report files.
    pub fn describe(&self) -> String {
        match &self.error_message {
            Some(message) => format!("{}: {} ({})", self.status, self.file_path.display(), message),
            None => format!("{}: {}", self.status, self.file_path.display()),
        }
    }
}

/// Batch verification outcome, one bucket per status.
#[derive(Debug, Default)]
pub struct VerificationReport {
    pub verified: Vec<FileVerificationResult>,
    pub failed: Vec<FileVerificationResult>,
    pub skipped: Vec<FileVerificationResult>,
    pub errors: Vec<FileVerificationResult>,
    pub not_found: Vec<FileVerificationResult>,
}

impl VerificationReport {
    pub fn add(&mut self, result: FileVerificationResult) {
        match result.status {
            VerificationStatus::Verified => self.verified.push(result),
            VerificationStatus::Failed => self.failed.push(result),
            VerificationStatus::Skipped => self.skipped.push(result),
            VerificationStatus::Error => self.errors.push(result),
            VerificationStatus::NotFound => self.not_found.push(result),
        }
    }

    pub fn total_files(&self) -> usize {
        self.verified.len()
            + self.failed.len()
            + self.skipped.len()
            + self.errors.len()
            + self.not_found.len()
    }

    /// True when nothing failed, errored, or went missing.
    pub fn is_successful(&self) -> bool {
        self.failed.is_empty() && self.errors.is_empty() && self.not_found.is_empty()
    }

    /// Every non-verified file with its reason, for operator review.
    pub fn problem_lines(&self) -> Vec<String> {
        self.failed
            .iter()
            .chain(self.not_found.iter())
            .chain(self.errors.iter())
            .chain(self.skipped.iter())
            .map(FileVerificationResult::describe)
            .collect()
    }
}

/// Per-algorithm outcome of a single-source check.
#[derive(Debug, Clone)]
pub struct AlgorithmCheck {
    pub matched: bool,
    pub expected: String,
    pub actual: Option<String>,
}

/// Compare a file against expected digests, all algorithms in one read
/// pass.
///
/// An expected algorithm that cannot be computed (unknown name, or the
/// file could not be hashed) counts as a non-match, not a skip. Returns
/// the overall outcome plus per-algorithm detail keyed as the caller keyed
/// its expectations.
pub fn verify_file(
    path: &Path,
    expected: &BTreeMap<String, String>,
) -> (bool, BTreeMap<String, AlgorithmCheck>) {
    if expected.is_empty() {
        warn!(path = %path.display(), "No expected hashes to verify against");
        return (false, BTreeMap::new());
    }

    let known: Vec<HashAlgorithm> = expected
        .keys()
        .filter_map(|name| HashAlgorithm::from_name(name))
        .collect();

    let actual = match digest_file(path, &known) {
        Ok(Some(hashes)) => hashes,
        Ok(None) => {
            warn!(path = %path.display(), "Cannot hash missing file");
            return (false, BTreeMap::new());
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to calculate hashes");
            return (false, BTreeMap::new());
        }
    };

    let mut details = BTreeMap::new();
    let mut all_match = true;

    for (name, expected_hash) in expected {
        let computed = HashAlgorithm::from_name(name).and_then(|alg| actual.get(alg.as_str()));
        match computed {
            Some(actual_hash) => {
                let matched = actual_hash.eq_ignore_ascii_case(expected_hash);
                if !matched {
                    all_match = false;
                }
                details.insert(
                    name.clone(),
                    AlgorithmCheck {
                        matched,
                        expected: expected_hash.clone(),
                        actual: Some(actual_hash.clone()),
                    },
                );
            }
            None => {
                all_match = false;
                details.insert(
                    name.clone(),
                    AlgorithmCheck {
                        matched: false,
                        expected: expected_hash.clone(),
                        actual: None,
                    },
                );
            }
        }
    }

    (all_match, details)
}

/// Verify every manifest entry against the files under `destination`.
///
/// Relative destination paths resolve against `destination`; absolute
/// paths are taken as recorded. `algorithms` narrows which recorded
/// digests are consulted.
pub async fn verify_against_manifest(
    manifest: &Manifest,
    destination: &Path,
    algorithms: Option<Vec<HashAlgorithm>>,
) -> Result<VerificationReport> {
    let manifest = manifest.clone();
    let destination = destination.to_path_buf();

    info!(
        destination = %destination.display(),
        files = manifest.files.len(),
        "Starting manifest verification"
    );

    tokio::task::spawn_blocking(move || {
        let mut report = VerificationReport::default();
        for entry in manifest.files.values() {
            let result = verify_entry(entry, &destination, algorithms.as_deref());
            match result.status {
                VerificationStatus::Verified => {
                    debug!(file = %result.file_path.display(), "Verified")
                }
                VerificationStatus::Failed => warn!(
                    file = %result.file_path.display(),
                    error = result.error_message.as_deref().unwrap_or(""),
                    "Verification failed"
                ),
                status => debug!(file = %result.file_path.display(), status = %status, "Not verified"),
            }
            report.add(result);
        }
        Ok(report)
    })
    .await?
}

/// Resolve a recorded path against a directory when it is relative.
fn resolve_recorded(path: &str, dir: &Path) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

/// Pick the recorded digest a verification should check: the first of the
/// entry's algorithms surviving the caller's filter.
fn select_expected<'a>(
    entry: &'a FileEntry,
    algorithms: Option<&[HashAlgorithm]>,
) -> Option<(&'a String, &'a String)> {
    entry.hashes.iter().find(|(name, _)| match algorithms {
        Some(filter) => HashAlgorithm::from_name(name)
            .map(|alg| filter.contains(&alg))
            .unwrap_or(false),
        None => true,
    })
}

fn verify_entry(
    entry: &FileEntry,
    destination: &Path,
    algorithms: Option<&[HashAlgorithm]>,
) -> FileVerificationResult {
    let file_path = resolve_recorded(&entry.destination_path, destination);

    if !file_path.exists() {
        let mut result =
            FileVerificationResult::new(file_path.clone(), VerificationStatus::NotFound);
        result.error_message = Some(format!("File not found: {}", file_path.display()));
        return result;
    }

    if entry.hashes.is_empty() {
        let mut result = FileVerificationResult::new(file_path, VerificationStatus::Skipped);
        result.error_message = Some("No hash information in manifest".to_string());
        return result;
    }

    let Some((name, expected_hash)) = select_expected(entry, algorithms) else {
        let mut result = FileVerificationResult::new(file_path, VerificationStatus::Skipped);
        result.error_message = Some("No matching hash algorithm found".to_string());
        return result;
    };

    let Some(algorithm) = HashAlgorithm::from_name(name) else {
        let mut result = FileVerificationResult::new(file_path, VerificationStatus::Error);
        result.algorithm = Some(name.clone());
        result.error_message = Some(format!("Error calculating hash: unsupported algorithm {name}"));
        return result;
    };

    match digest_file(&file_path, &[algorithm]) {
        Ok(Some(hashes)) => {
            // Single requested algorithm, so the map holds exactly it
            let actual = hashes.get(algorithm.as_str()).cloned().unwrap_or_default();
            let mut result = if actual.eq_ignore_ascii_case(expected_hash) {
                FileVerificationResult::new(file_path, VerificationStatus::Verified)
            } else {
                let mut failed =
                    FileVerificationResult::new(file_path, VerificationStatus::Failed);
                failed.error_message = Some(format!(
                    "Hash mismatch: expected {expected_hash}, got {actual}"
                ));
                failed
            };
            result.expected_hash = Some(expected_hash.clone());
            result.actual_hash = Some(actual);
            result.algorithm = Some(algorithm.as_str().to_string());
            result
        }
        Ok(None) => {
            let mut result =
                FileVerificationResult::new(file_path.clone(), VerificationStatus::NotFound);
            result.error_message = Some(format!("File not found: {}", file_path.display()));
            result
        }
        Err(e) => {
            let mut result = FileVerificationResult::new(file_path, VerificationStatus::Error);
            result.algorithm = Some(algorithm.as_str().to_string());
            result.error_message = Some(format!("Error calculating hash: {e}"));
            result
        }
    }
}

/// Which of the three observation points diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreeWayStatus {
    /// Source, preserved copy, and manifest all agree.
    AllMatch,
    /// Preserved copy still matches the manifest; the source moved on.
    SourceModified,
    /// Source still matches the manifest; the preserved copy degraded.
    PreservedCorrupted,
    /// Source and preserved copy both differ from the manifest. No side
    /// can be trusted; surfaced for manual resolution.
    Error,
}

/// Classify a hash triple. Exhaustive and mutually exclusive: every triple
/// lands in exactly one variant, and `AllMatch` exactly when all three
/// agree.
pub fn categorize_difference(source: &str, preserved: &str, manifest: &str) -> ThreeWayStatus {
    let source_ok = source.eq_ignore_ascii_case(manifest);
    let preserved_ok = preserved.eq_ignore_ascii_case(manifest);

    match (source_ok, preserved_ok) {
        (true, true) => ThreeWayStatus::AllMatch,
        (false, true) => ThreeWayStatus::SourceModified,
        (true, false) => ThreeWayStatus::PreservedCorrupted,
        (false, false) => ThreeWayStatus::Error,
    }
}

/// Three-way comparison outcome.
#[derive(Debug, Default)]
pub struct ThreeWayReport {
    pub all_match: Vec<FileVerificationResult>,
    pub source_modified: Vec<FileVerificationResult>,
    pub preserved_corrupted: Vec<FileVerificationResult>,
    pub errors: Vec<FileVerificationResult>,
    pub not_found: Vec<FileVerificationResult>,
    pub skipped: Vec<FileVerificationResult>,
}

impl ThreeWayReport {
    pub fn total_files(&self) -> usize {
        self.all_match.len()
            + self.source_modified.len()
            + self.preserved_corrupted.len()
            + self.errors.len()
            + self.not_found.len()
            + self.skipped.len()
    }

    /// True when the preserved data itself is sound: no corruption, no
    /// unexplained divergence, nothing missing. Source-side edits alone do
    /// not count against the backup.
    pub fn backup_intact(&self) -> bool {
        self.preserved_corrupted.is_empty() && self.errors.is_empty() && self.not_found.is_empty()
    }

    pub fn problem_lines(&self) -> Vec<String> {
        self.source_modified
            .iter()
            .chain(self.preserved_corrupted.iter())
            .chain(self.not_found.iter())
            .chain(self.errors.iter())
            .chain(self.skipped.iter())
            .map(FileVerificationResult::describe)
            .collect()
    }
}

/// Compare live sources, preserved copies, and recorded hashes for every
/// manifest entry.
///
/// Relative recorded paths resolve against `source_dir` / `preserved_dir`
/// respectively. Files missing on either side land in `not_found`; entries
/// without a usable recorded digest land in `skipped`.
pub async fn verify_three_way(
    source_dir: &Path,
    preserved_dir: &Path,
    manifest: &Manifest,
    algorithms: Option<Vec<HashAlgorithm>>,
) -> Result<ThreeWayReport> {
    let manifest = manifest.clone();
    let source_dir = source_dir.to_path_buf();
    let preserved_dir = preserved_dir.to_path_buf();

    info!(
        source = %source_dir.display(),
        preserved = %preserved_dir.display(),
        files = manifest.files.len(),
        "Starting three-way verification"
    );

    tokio::task::spawn_blocking(move || {
        let mut report = ThreeWayReport::default();
        for entry in manifest.files.values() {
            three_way_entry(entry, &source_dir, &preserved_dir, algorithms.as_deref(), &mut report);
        }
        info!(
            all_match = report.all_match.len(),
            source_modified = report.source_modified.len(),
            preserved_corrupted = report.preserved_corrupted.len(),
            errors = report.errors.len(),
            "Three-way verification complete"
        );
        Ok(report)
    })
    .await?
}

fn three_way_entry(
    entry: &FileEntry,
    source_dir: &Path,
    preserved_dir: &Path,
    algorithms: Option<&[HashAlgorithm]>,
    report: &mut ThreeWayReport,
) {
    let preserved_path = resolve_recorded(&entry.destination_path, preserved_dir);
    let source_path = resolve_recorded(&entry.source_path, source_dir);

    let Some((name, manifest_hash)) = select_expected(entry, algorithms) else {
        let mut result =
            FileVerificationResult::new(preserved_path, VerificationStatus::Skipped);
        result.error_message = Some(if entry.hashes.is_empty() {
            "No hash information in manifest".to_string()
        } else {
            "No matching hash algorithm found".to_string()
        });
        report.skipped.push(result);
        return;
    };

    let Some(algorithm) = HashAlgorithm::from_name(name) else {
        let mut result = FileVerificationResult::new(preserved_path, VerificationStatus::Error);
        result.algorithm = Some(name.clone());
        result.error_message = Some(format!("Error calculating hash: unsupported algorithm {name}"));
        report.errors.push(result);
        return;
    };

    let source_hash = match hash_side(&source_path, algorithm, "source", report) {
        Some(hash) => hash,
        None => return,
    };
    let preserved_hash = match hash_side(&preserved_path, algorithm, "preserved", report) {
        Some(hash) => hash,
        None => return,
    };

    let mut result = FileVerificationResult::new(preserved_path, VerificationStatus::Verified);
    result.expected_hash = Some(manifest_hash.clone());
    result.algorithm = Some(algorithm.as_str().to_string());

    match categorize_difference(&source_hash, &preserved_hash, manifest_hash) {
        ThreeWayStatus::AllMatch => {
            result.actual_hash = Some(preserved_hash);
            report.all_match.push(result);
        }
        ThreeWayStatus::SourceModified => {
            result.status = VerificationStatus::Failed;
            result.actual_hash = Some(source_hash);
            result.error_message = Some("Source file modified since preservation".to_string());
            report.source_modified.push(result);
        }
        ThreeWayStatus::PreservedCorrupted => {
            result.status = VerificationStatus::Failed;
            result.actual_hash = Some(preserved_hash);
            result.error_message = Some("Preserved file corrupted".to_string());
            report.preserved_corrupted.push(result);
        }
        ThreeWayStatus::Error => {
            result.status = VerificationStatus::Error;
            result.error_message = Some(format!(
                "Source and preserved copy both diverge: source={source_hash}, preserved={preserved_hash}, manifest={manifest_hash}"
            ));
            report.errors.push(result);
        }
    }
}

/// Hash one side of a three-way comparison, recording missing files and
/// hash errors into the report. `None` means the entry is finished.
fn hash_side(
    path: &Path,
    algorithm: HashAlgorithm,
    side: &str,
    report: &mut ThreeWayReport,
) -> Option<String> {
    match digest_file(path, &[algorithm]) {
        Ok(Some(hashes)) => hashes.get(algorithm.as_str()).cloned(),
        Ok(None) => {
            let mut result =
                FileVerificationResult::new(path.to_path_buf(), VerificationStatus::NotFound);
            result.error_message = Some(format!("{side} file not found: {}", path.display()));
            report.not_found.push(result);
            None
        }
        Err(e) => {
            let mut result =
                FileVerificationResult::new(path.to_path_buf(), VerificationStatus::Error);
            result.error_message = Some(format!("Error hashing {side} file: {e}"));
            report.errors.push(result);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::OperationKind;
    use tempfile::tempdir;

    const HELLO_SHA256: &str =
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn expected_of(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn verify_file_matches_known_digest() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let (all_match, details) = verify_file(&path, &expected_of(&[("SHA256", HELLO_SHA256)]));
        assert!(all_match);
        assert!(details.get("SHA256").unwrap().matched);
    }

    #[test]
    fn verify_file_detects_mismatch() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("a.txt");
        std::fs::write(&path, b"tampered").unwrap();

        let (all_match, details) = verify_file(&path, &expected_of(&[("SHA256", HELLO_SHA256)]));
        assert!(!all_match);
        let check = details.get("SHA256").unwrap();
        assert!(!check.matched);
        assert!(check.actual.is_some());
    }

    #[test]
    fn unknown_expected_algorithm_is_a_non_match() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let (all_match, details) = verify_file(
            &path,
            &expected_of(&[("SHA256", HELLO_SHA256), ("WHIRLPOOL", "ffff")]),
        );
        assert!(!all_match);
        assert!(details.get("SHA256").unwrap().matched);
        let unknown = details.get("WHIRLPOOL").unwrap();
        assert!(!unknown.matched);
        assert!(unknown.actual.is_none());
    }

    #[test]
    fn verify_file_with_nothing_expected_fails() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let (all_match, details) = verify_file(&path, &BTreeMap::new());
        assert!(!all_match);
        assert!(details.is_empty());
    }

    #[test]
    fn verify_missing_file_fails() {
        let temp = tempdir().unwrap();
        let (all_match, details) = verify_file(
            &temp.path().join("ghost"),
            &expected_of(&[("SHA256", HELLO_SHA256)]),
        );
        assert!(!all_match);
        assert!(details.is_empty());
    }

    #[test]
    fn categorization_is_exhaustive_and_exclusive() {
        let hashes = ["aa", "bb", "cc"];
        for s in hashes {
            for p in hashes {
                for m in hashes {
                    let status = categorize_difference(s, p, m);
                    let expected = match (s == m, p == m) {
                        (true, true) => ThreeWayStatus::AllMatch,
                        (false, true) => ThreeWayStatus::SourceModified,
                        (true, false) => ThreeWayStatus::PreservedCorrupted,
                        (false, false) => ThreeWayStatus::Error,
                    };
                    assert_eq!(status, expected, "triple ({s}, {p}, {m})");
                    assert_eq!(
                        status == ThreeWayStatus::AllMatch,
                        s == p && p == m,
                        "all_match iff all equal for ({s}, {p}, {m})"
                    );
                }
            }
        }
    }

    #[test]
    fn categorization_ignores_hex_case() {
        assert_eq!(categorize_difference("AB", "ab", "aB"), ThreeWayStatus::AllMatch);
    }

    fn manifest_with_entry(id: &str, source: &str, dest: &str, hashes: &[(&str, &str)]) -> Manifest {
        let mut manifest = Manifest::new();
        let op = manifest.add_operation(
            OperationKind::Copy,
            serde_json::Value::Null,
            None,
            None,
            None,
        );
        let file_id = manifest.add_file(source, dest, None, Some(op), Some(id.to_string()));
        for (alg, hash) in hashes {
            manifest.add_file_hash(&file_id, alg, hash);
        }
        manifest
    }

    #[tokio::test]
    async fn manifest_verification_buckets_every_status() {
        let temp = tempdir().unwrap();
        let dest = temp.path().join("dest");
        std::fs::create_dir_all(&dest).unwrap();

        std::fs::write(dest.join("good.txt"), b"hello").unwrap();
        std::fs::write(dest.join("bad.txt"), b"corrupted").unwrap();
        std::fs::write(dest.join("nohash.txt"), b"whatever").unwrap();
        std::fs::write(dest.join("odd.txt"), b"hello").unwrap();

        let mut manifest = Manifest::new();
        let mut add = |id: &str, dest_path: &Path, hashes: &[(&str, &str)]| {
            let file_id = manifest.add_file(
                "/src/ignored",
                &dest_path.to_string_lossy(),
                None,
                None,
                Some(id.to_string()),
            );
            for (alg, hash) in hashes {
                manifest.add_file_hash(&file_id, alg, hash);
            }
        };
        add("good", &dest.join("good.txt"), &[("SHA256", HELLO_SHA256)]);
        add("bad", &dest.join("bad.txt"), &[("SHA256", HELLO_SHA256)]);
        add("nohash", &dest.join("nohash.txt"), &[]);
        add("odd", &dest.join("odd.txt"), &[("WHIRLPOOL", "ffff")]);
        add("gone", &dest.join("gone.txt"), &[("SHA256", HELLO_SHA256)]);

        let report = verify_against_manifest(&manifest, &dest, None).await.unwrap();
        assert_eq!(report.verified.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.not_found.len(), 1);
        assert_eq!(report.total_files(), 5);
        assert!(!report.is_successful());
        assert!(
            report.failed[0]
                .error_message
                .as_deref()
                .unwrap()
                .starts_with("Hash mismatch")
        );
    }

    #[tokio::test]
    async fn relative_destinations_resolve_against_directory() {
        let temp = tempdir().unwrap();
        let dest = temp.path().join("dest");
        std::fs::create_dir_all(dest.join("sub")).unwrap();
        std::fs::write(dest.join("sub/a.txt"), b"hello").unwrap();

        let manifest = manifest_with_entry(
            "sub/a.txt",
            "/src/a.txt",
            "sub/a.txt",
            &[("SHA256", HELLO_SHA256)],
        );

        let report = verify_against_manifest(&manifest, &dest, None).await.unwrap();
        assert_eq!(report.verified.len(), 1);
        assert!(report.is_successful());
    }

    #[tokio::test]
    async fn algorithm_filter_narrows_and_skips() {
        let temp = tempdir().unwrap();
        let dest = temp.path().join("dest");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("a.txt"), b"hello").unwrap();

        // MD5 recorded wrong, SHA256 right: the filter decides the verdict.
        let manifest = manifest_with_entry(
            "a",
            "/src/a.txt",
            &dest.join("a.txt").to_string_lossy(),
            &[("MD5", "0000"), ("SHA256", HELLO_SHA256)],
        );

        let narrowed = verify_against_manifest(&manifest, &dest, Some(vec![HashAlgorithm::Sha256]))
            .await
            .unwrap();
        assert_eq!(narrowed.verified.len(), 1);

        let unmatched =
            verify_against_manifest(&manifest, &dest, Some(vec![HashAlgorithm::Sha512]))
                .await
                .unwrap();
        assert_eq!(unmatched.skipped.len(), 1);
    }

    #[tokio::test]
    async fn three_way_localizes_divergence() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("source");
        let preserved = temp.path().join("preserved");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::create_dir_all(&preserved).unwrap();

        // intact: all three agree
        std::fs::write(source.join("intact.txt"), b"hello").unwrap();
        std::fs::write(preserved.join("intact.txt"), b"hello").unwrap();
        // edited: source moved on after preservation
        std::fs::write(source.join("edited.txt"), b"hello v2").unwrap();
        std::fs::write(preserved.join("edited.txt"), b"hello").unwrap();
        // rotted: preserved copy no longer matches
        std::fs::write(source.join("rotted.txt"), b"hello").unwrap();
        std::fs::write(preserved.join("rotted.txt"), b"bitrot").unwrap();
        // chaos: both sides diverged
        std::fs::write(source.join("chaos.txt"), b"one way").unwrap();
        std::fs::write(preserved.join("chaos.txt"), b"another").unwrap();
        // vanished: source side missing
        std::fs::write(preserved.join("vanished.txt"), b"hello").unwrap();

        let mut manifest = Manifest::new();
        for name in ["intact.txt", "edited.txt", "rotted.txt", "chaos.txt", "vanished.txt"] {
            let id = manifest.add_file(
                &source.join(name).to_string_lossy(),
                &preserved.join(name).to_string_lossy(),
                None,
                None,
                None,
            );
            manifest.add_file_hash(&id, "SHA256", HELLO_SHA256);
        }
        // chaos had different recorded content from either side already
        let report = verify_three_way(&source, &preserved, &manifest, None)
            .await
            .unwrap();

        assert_eq!(report.all_match.len(), 1);
        assert_eq!(report.source_modified.len(), 1);
        assert_eq!(report.preserved_corrupted.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.not_found.len(), 1);
        assert_eq!(report.total_files(), 5);
        assert!(!report.backup_intact());

        let complex = &report.errors[0];
        let message = complex.error_message.as_deref().unwrap();
        assert!(message.contains("source="));
        assert!(message.contains("preserved="));
        assert!(message.contains("manifest="));
    }

    #[tokio::test]
    async fn three_way_all_clean() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("source");
        let preserved = temp.path().join("preserved");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::create_dir_all(&preserved).unwrap();
        std::fs::write(source.join("a.txt"), b"hello").unwrap();
        std::fs::write(preserved.join("a.txt"), b"hello").unwrap();

        let mut manifest = Manifest::new();
        let id = manifest.add_file(
            &source.join("a.txt").to_string_lossy(),
            &preserved.join("a.txt").to_string_lossy(),
            None,
            None,
            None,
        );
        manifest.add_file_hash(&id, "SHA256", HELLO_SHA256);

        let report = verify_three_way(&source, &preserved, &manifest, None)
            .await
            .unwrap();
        assert_eq!(report.all_match.len(), 1);
        assert!(report.backup_intact());
    }
}
