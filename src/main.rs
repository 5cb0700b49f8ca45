use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use preserve::config::{self, AppConfig};
use preserve::core::manifest::{
    Manifest, OperationKind, PRESERVE_SUBDIR, find_available_manifests, manifest_dir,
    next_manifest_path, select_manifest,
};
use preserve::core::sidecar::JsonSidecarWriter;
use preserve::core::verify::{
    ThreeWayReport, VerificationReport, verify_against_manifest, verify_three_way,
};
use preserve::core::{
    CopyOptions, HashAlgorithm, MoveOptions, OperationEvent, OperationResult, Orchestrator,
    PathStyle, RestoreOptions,
};
use preserve::{discover, logging};
use serde::Serialize;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "preserve")]
#[command(about = "Copy, move, verify, and restore files with manifest tracking", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Alternate config file (default: preserve.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy files into a destination and record a manifest
    Copy(CopyArgs),
    /// Copy files, then delete each source whose copy is trustworthy
    Move(MoveArgs),
    /// Check preserved files against a recorded manifest
    Verify(VerifyArgs),
    /// Put preserved files back at their original paths
    Restore(RestoreArgs),
}

#[derive(Args, Serialize)]
struct CopyArgs {
    /// Files or directories to preserve
    #[serde(skip)]
    #[arg(required_unless_present = "load_file_list")]
    sources: Vec<PathBuf>,

    /// Destination directory
    #[serde(skip)]
    #[arg(long, value_name = "DIR")]
    dst: PathBuf,

    /// Recurse into source directories
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    recursive: Option<bool>,

    /// Keep the base directory's own name at the destination root
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    include_base: Option<bool>,

    /// Lay files out relative to the source base (the default)
    #[serde(skip)]
    #[arg(long, group = "style")]
    rel: bool,

    /// Recreate full source paths under the destination
    #[serde(skip)]
    #[arg(long, group = "style")]
    abs: bool,

    /// Drop directory structure, filenames only
    #[serde(skip)]
    #[arg(long, group = "style")]
    flat: bool,

    /// Base directory for relative layout
    #[serde(skip)]
    #[arg(long, value_name = "PATH")]
    src_base: Option<PathBuf>,

    /// Newline-delimited list of additional files to preserve
    #[serde(skip)]
    #[arg(long, value_name = "FILE")]
    load_file_list: Option<PathBuf>,

    /// Overwrite files already present at the destination
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    overwrite: Option<bool>,

    /// Do not copy permissions and timestamps
    #[serde(skip)]
    #[arg(long)]
    no_preserve_attrs: bool,

    /// Skip hash verification after copying
    #[serde(skip)]
    #[arg(long)]
    no_verify: bool,

    /// Hash algorithm to record (repeatable: MD5, SHA1, SHA256, SHA512)
    #[serde(rename = "hash_algorithms", skip_serializing_if = "Vec::is_empty")]
    #[arg(long = "hash", value_name = "ALG")]
    hash: Vec<HashAlgorithm>,

    /// Keep the manifest under <dst>/.preserve/ instead of the root
    #[serde(rename = "use_preserve_dir", skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    preserve_dir: Option<bool>,

    /// Short description carried in the numbered manifest filename
    #[serde(skip)]
    #[arg(long, value_name = "TEXT")]
    description: Option<String>,

    /// Walk the full pipeline without writing anything
    #[serde(skip)]
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Serialize)]
struct MoveArgs {
    #[command(flatten)]
    #[serde(flatten)]
    copy: CopyArgs,

    /// Delete sources even when their copies failed verification
    #[serde(skip)]
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct VerifyArgs {
    /// Directory holding the preserved files
    #[arg(long, value_name = "DIR")]
    dst: PathBuf,

    /// Original source directory; enables three-way comparison
    #[arg(long, value_name = "DIR")]
    src: Option<PathBuf>,

    /// Explicit manifest file to check against
    #[arg(long, value_name = "PATH", conflicts_with = "number")]
    manifest: Option<PathBuf>,

    /// Manifest number to check against (default: newest)
    #[arg(long, value_name = "N")]
    number: Option<u32>,

    /// Restrict checking to these hash algorithms (repeatable)
    #[arg(long = "hash", value_name = "ALG")]
    hash: Vec<HashAlgorithm>,

    /// Write a plain-text report to this file
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// List available manifests and exit
    #[arg(long)]
    list: bool,
}

#[derive(Args)]
struct RestoreArgs {
    /// Directory holding the preserved files
    #[arg(long, value_name = "DIR")]
    src: PathBuf,

    /// Explicit manifest file to restore from
    #[arg(long, value_name = "PATH", conflicts_with = "number")]
    manifest: Option<PathBuf>,

    /// Manifest number to restore from (default: newest)
    #[arg(long, value_name = "N")]
    number: Option<u32>,

    /// Overwrite originals that still exist
    #[arg(long)]
    overwrite: bool,

    /// Walk the full pipeline without writing anything
    #[arg(long)]
    dry_run: bool,

    /// List available manifests and exit
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let command_line = std::env::args().collect::<Vec<_>>().join(" ");
    let cli = Cli::parse();

    let config_file = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_FILE));
    let mut config = match &cli.command {
        Commands::Copy(args) => AppConfig::with_file(&config_file, Some(args))?,
        Commands::Move(args) => AppConfig::with_file(&config_file, Some(args))?,
        Commands::Verify(_) | Commands::Restore(_) => {
            AppConfig::with_file(&config_file, None::<&CopyArgs>)?
        }
    };
    config.verbose |= cli.verbose;
    config.json_logs |= cli.json_logs;

    logging::init(logging::LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
    });

    let code = match cli.command {
        Commands::Copy(args) => run_copy(args, &config, command_line)
            .await
            .context("Copy operation failed")?,
        Commands::Move(args) => run_move(args, &config, command_line)
            .await
            .context("Move operation failed")?,
        Commands::Verify(args) => run_verify(args, command_line)
            .await
            .context("Verify operation failed")?,
        Commands::Restore(args) => run_restore(args, &config, command_line)
            .await
            .context("Restore operation failed")?,
    };

    std::process::exit(code);
}

async fn run_copy(args: CopyArgs, config: &AppConfig, command_line: String) -> Result<i32> {
    let files = discover::gather(&args.sources, args.load_file_list.as_deref(), config.recursive)?;
    if files.is_empty() {
        println!("No files to copy");
        return Ok(0);
    }
    println!("Copying {} file(s) to {}", files.len(), args.dst.display());

    let options = copy_options(&args, config);
    let manifest_path = manifest_target(&args, config, options.dry_run)?;

    let (events, printer) = event_printer();
    let orchestrator = build_orchestrator(&args, config).with_events(events);
    let result = orchestrator
        .copy_files(
            files,
            args.dst.clone(),
            manifest_path,
            options,
            Some(command_line),
        )
        .await?;
    drop(orchestrator);
    let _ = printer.await;

    print_summary(&result);
    Ok(if result.is_success() { 0 } else { 1 })
}

async fn run_move(args: MoveArgs, config: &AppConfig, command_line: String) -> Result<i32> {
    let files = discover::gather(
        &args.copy.sources,
        args.copy.load_file_list.as_deref(),
        config.recursive,
    )?;
    if files.is_empty() {
        println!("No files to move");
        return Ok(0);
    }
    println!(
        "Moving {} file(s) to {}",
        files.len(),
        args.copy.dst.display()
    );

    let options = MoveOptions {
        copy: copy_options(&args.copy, config),
        force: args.force,
    };
    let manifest_path = manifest_target(&args.copy, config, options.copy.dry_run)?;

    let (events, printer) = event_printer();
    let orchestrator = build_orchestrator(&args.copy, config).with_events(events);
    let result = orchestrator
        .move_files(
            files,
            args.copy.dst.clone(),
            manifest_path,
            options,
            Some(command_line),
        )
        .await?;
    drop(orchestrator);
    let _ = printer.await;

    print_summary(&result);
    Ok(if result.is_success() { 0 } else { 1 })
}

async fn run_verify(args: VerifyArgs, command_line: String) -> Result<i32> {
    if args.list {
        return Ok(list_manifests(&args.dst));
    }

    let Some(manifest_path) = select_manifest(&args.dst, args.number, args.manifest.as_deref())
    else {
        println!("No manifest found in {}", args.dst.display());
        return Ok(1);
    };
    println!("Verifying against {}", manifest_path.display());

    let manifest = Manifest::load(&manifest_path)
        .with_context(|| format!("loading manifest {}", manifest_path.display()))?;
    let (valid, problems) = manifest.validate();
    if !valid {
        for problem in &problems {
            warn!(problem = %problem, "Manifest inconsistency");
        }
    }

    let algorithms = (!args.hash.is_empty()).then(|| args.hash.clone());

    let code = match &args.src {
        Some(source_dir) => {
            let report = verify_three_way(source_dir, &args.dst, &manifest, algorithms).await?;
            print_three_way_summary(&report);
            if let Some(report_file) = &args.report {
                write_report(report_file, three_way_report_text(&manifest_path, &report))?;
            }
            if report.backup_intact() { 0 } else { 1 }
        }
        None => {
            let report = verify_against_manifest(&manifest, &args.dst, algorithms).await?;
            print_verification_summary(&report);
            if let Some(report_file) = &args.report {
                write_report(report_file, verification_report_text(&manifest_path, &report))?;
            }
            if report.is_successful() { 0 } else { 1 }
        }
    };

    record_verification(&manifest_path, manifest, &args, command_line);
    Ok(code)
}

async fn run_restore(args: RestoreArgs, config: &AppConfig, command_line: String) -> Result<i32> {
    if args.list {
        return Ok(list_manifests(&args.src));
    }

    let Some(manifest_path) = select_manifest(&args.src, args.number, args.manifest.as_deref())
    else {
        println!("No manifest found in {}", args.src.display());
        return Ok(1);
    };
    println!("Restoring from {}", manifest_path.display());

    let options = RestoreOptions {
        overwrite: args.overwrite || config.overwrite,
        preserve_attrs: config.preserve_attrs,
        verify: config.verify,
        dry_run: args.dry_run,
    };

    let (events, printer) = event_printer();
    let orchestrator = Orchestrator::new()
        .with_cancellation(interrupt_token())
        .with_events(events);
    let result = orchestrator
        .restore(manifest_path, args.src.clone(), options, Some(command_line))
        .await?;
    drop(orchestrator);
    let _ = printer.await;

    print_summary(&result);
    Ok(if result.is_success() { 0 } else { 1 })
}

fn copy_options(args: &CopyArgs, config: &AppConfig) -> CopyOptions {
    let path_style = if args.flat {
        PathStyle::Flat
    } else if args.abs {
        PathStyle::Absolute
    } else if args.rel {
        PathStyle::Relative
    } else {
        config.path_style
    };

    CopyOptions {
        path_style,
        include_base: config.include_base,
        source_base: args.src_base.clone(),
        overwrite: config.overwrite,
        preserve_attrs: config.preserve_attrs && !args.no_preserve_attrs,
        verify: config.verify && !args.no_verify,
        hash_algorithms: config.hash_algorithms.clone(),
        dry_run: args.dry_run,
    }
}

/// Where the new run's manifest goes. Picking a slot renames a lone legacy
/// manifest on disk, so a dry run must not ask for one.
fn manifest_target(args: &CopyArgs, config: &AppConfig, dry_run: bool) -> Result<Option<PathBuf>> {
    if dry_run {
        return Ok(None);
    }
    let dir = manifest_dir(&args.dst, config.use_preserve_dir);
    let path = next_manifest_path(&dir, args.description.as_deref())?;
    Ok(Some(path))
}

fn build_orchestrator(args: &CopyArgs, config: &AppConfig) -> Orchestrator {
    let mut orchestrator = Orchestrator::new().with_cancellation(interrupt_token());
    if config.sidecar_links {
        let link_dir = config
            .use_preserve_dir
            .then(|| manifest_dir(&args.dst, true));
        orchestrator = orchestrator.with_sidecar(JsonSidecarWriter::new(link_dir));
    }
    orchestrator
}

/// Cancel between files on Ctrl-C; the file in flight still completes.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current file");
            cancel.cancel();
        }
    });
    token
}

/// Print per-file progress as operation events arrive.
fn event_printer() -> (mpsc::Sender<OperationEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<OperationEvent>(256);
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                OperationEvent::FileCopied { source, dest, .. } => {
                    println!("  {} -> {}", source.display(), dest.display());
                }
                OperationEvent::FileRestored {
                    preserved,
                    original,
                } => {
                    println!("  {} -> {}", preserved.display(), original.display());
                }
                OperationEvent::FileSkipped { source, reason } => {
                    println!("  skipped {} ({reason})", source.display());
                }
                OperationEvent::FileFailed { source, reason } => {
                    println!("  failed {} ({reason})", source.display());
                }
                OperationEvent::FileVerified {
                    dest,
                    verified: false,
                } => {
                    println!("  verification failed {}", dest.display());
                }
                OperationEvent::WouldCopy { source, dest } => {
                    println!("  would copy {} -> {}", source.display(), dest.display());
                }
                OperationEvent::WouldRestore {
                    preserved,
                    original,
                } => {
                    println!(
                        "  would restore {} -> {}",
                        preserved.display(),
                        original.display()
                    );
                }
                _ => {}
            }
        }
    });
    (tx, handle)
}

fn print_summary(result: &OperationResult) {
    println!();
    println!("{} summary:", result.kind);
    println!("  Total:       {}", result.total());
    println!("  Succeeded:   {}", result.succeeded.len());
    println!("  Failed:      {}", result.failed.len());
    for (path, reason) in &result.failure_reasons {
        println!("    {path}: {reason}");
    }
    println!("  Skipped:     {}", result.skipped.len());
    for (path, reason) in &result.skip_reasons {
        println!("    {path}: {reason}");
    }
    if !result.verified.is_empty() || !result.unverified.is_empty() {
        println!("  Verified:    {}", result.verified.len());
        println!("  Unverified:  {}", result.unverified.len());
        for path in &result.unverified {
            println!("    {}", path.display());
        }
    }
    println!("  Total bytes: {}", result.total_bytes);
    for (path, note) in &result.notes {
        println!("  Note: {path}: {note}");
    }
    if let Some(path) = &result.manifest_path {
        println!("  Manifest:    {}", path.display());
    }
}

fn print_verification_summary(report: &VerificationReport) {
    println!();
    println!("VERIFY summary:");
    println!("  Total:     {}", report.total_files());
    println!("  Verified:  {}", report.verified.len());
    println!("  Failed:    {}", report.failed.len());
    println!("  Skipped:   {}", report.skipped.len());
    println!("  Errors:    {}", report.errors.len());
    println!("  Not found: {}", report.not_found.len());
    for line in report.problem_lines() {
        println!("    {line}");
    }
}

fn print_three_way_summary(report: &ThreeWayReport) {
    println!();
    println!("Three-way VERIFY summary:");
    println!("  Total:               {}", report.total_files());
    println!("  All match:           {}", report.all_match.len());
    println!("  Source modified:     {}", report.source_modified.len());
    println!("  Preserved corrupted: {}", report.preserved_corrupted.len());
    println!("  Errors:              {}", report.errors.len());
    println!("  Not found:           {}", report.not_found.len());
    println!("  Skipped:             {}", report.skipped.len());
    for line in report.problem_lines() {
        println!("    {line}");
    }
}

fn write_report(path: &Path, text: String) -> Result<()> {
    fs::write(path, text).with_context(|| format!("writing report to {}", path.display()))?;
    println!("Report written to {}", path.display());
    Ok(())
}

fn verification_report_text(manifest_path: &Path, report: &VerificationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "preserve verification report");
    let _ = writeln!(out, "manifest: {}", manifest_path.display());
    let _ = writeln!(out, "generated: {}", Utc::now().to_rfc3339());
    let _ = writeln!(out);
    let problems = report.problem_lines();
    if problems.is_empty() {
        let _ = writeln!(out, "all files verified");
    } else {
        for line in problems {
            let _ = writeln!(out, "{line}");
        }
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "total: {}", report.total_files());
    let _ = writeln!(out, "verified: {}", report.verified.len());
    let _ = writeln!(out, "failed: {}", report.failed.len());
    let _ = writeln!(out, "skipped: {}", report.skipped.len());
    let _ = writeln!(out, "errors: {}", report.errors.len());
    let _ = writeln!(out, "not found: {}", report.not_found.len());
    out
}

fn three_way_report_text(manifest_path: &Path, report: &ThreeWayReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "preserve three-way verification report");
    let _ = writeln!(out, "manifest: {}", manifest_path.display());
    let _ = writeln!(out, "generated: {}", Utc::now().to_rfc3339());
    let _ = writeln!(out);
    let problems = report.problem_lines();
    if problems.is_empty() {
        let _ = writeln!(out, "all files match");
    } else {
        for line in problems {
            let _ = writeln!(out, "{line}");
        }
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "total: {}", report.total_files());
    let _ = writeln!(out, "all match: {}", report.all_match.len());
    let _ = writeln!(out, "source modified: {}", report.source_modified.len());
    let _ = writeln!(
        out,
        "preserved corrupted: {}",
        report.preserved_corrupted.len()
    );
    let _ = writeln!(out, "errors: {}", report.errors.len());
    let _ = writeln!(out, "not found: {}", report.not_found.len());
    let _ = writeln!(out, "skipped: {}", report.skipped.len());
    out
}

/// Record the VERIFY in the manifest's operation history when the file is
/// writable; a read-only manifest stays verifiable in report-only mode.
fn record_verification(
    manifest_path: &Path,
    mut manifest: Manifest,
    args: &VerifyArgs,
    command_line: String,
) {
    let options = serde_json::json!({
        "three_way": args.src.is_some(),
        "algorithms": args.hash,
    });
    let source = args.src.as_ref().map(|p| p.to_string_lossy().into_owned());
    manifest.add_operation(
        OperationKind::Verify,
        options,
        source.as_deref(),
        Some(&args.dst.to_string_lossy()),
        Some(command_line),
    );
    if let Err(e) = manifest.save(manifest_path) {
        debug!(
            path = %manifest_path.display(),
            error = %e,
            "Manifest not writable, verification not recorded"
        );
    }
}

/// Enumerate the manifests a VERIFY or RESTORE could pick from.
fn list_manifests(dir: &Path) -> i32 {
    let mut manifests = find_available_manifests(dir);
    if manifests.is_empty() {
        manifests = find_available_manifests(&dir.join(PRESERVE_SUBDIR));
    }
    if manifests.is_empty() {
        println!("No manifests found in {}", dir.display());
        return 1;
    }

    println!("Manifests in {}:", dir.display());
    for reference in manifests {
        let name = reference
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let label = if reference.number == 0 {
            "legacy".to_string()
        } else {
            format!("{:03}", reference.number)
        };
        match Manifest::load(&reference.path) {
            Ok(manifest) => {
                let last = manifest
                    .last_operation()
                    .map(|op| op.kind.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {label:>6}  {name}  operations: {}, last: {last}, updated: {}",
                    manifest.operations.len(),
                    manifest.updated_at.format("%Y-%m-%d %H:%M:%S"),
                );
            }
            Err(e) => println!("  {label:>6}  {name}  unreadable: {e}"),
        }
    }
    0
}
