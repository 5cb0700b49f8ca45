//! Destination path projection.
//!
//! Maps a source path to the sub-path it occupies under a destination root,
//! according to the configured style. Projection is a pure function of its
//! inputs; only [`unique_destination`] touches the filesystem.

use std::path::{Component, Path, PathBuf, Prefix};

use serde::{Deserialize, Serialize};

/// Policy governing how a source path maps to a destination path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathStyle {
    /// Path relative to a base directory, structure preserved.
    #[default]
    Relative,
    /// Full source path re-rooted under the destination.
    Absolute,
    /// Filename only, all files directly in the destination.
    Flat,
}

impl PathStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathStyle::Relative => "relative",
            PathStyle::Absolute => "absolute",
            PathStyle::Flat => "flat",
        }
    }
}

impl std::fmt::Display for PathStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PathStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relative" | "rel" => Ok(PathStyle::Relative),
            "absolute" | "abs" => Ok(PathStyle::Absolute),
            "flat" => Ok(PathStyle::Flat),
            other => Err(format!("unknown path style: {other}")),
        }
    }
}

/// Outcome of projecting one source path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    /// Sub-path to join onto the destination root.
    pub relative: PathBuf,
    /// True when a `relative` request could not use the base and dropped to
    /// the absolute algorithm for this file. A policy event, not an error.
    pub fell_back: bool,
}

/// Strip a path to its OS-relative form.
///
/// The root is dropped; on drive-letter systems the drive becomes an
/// ordinary leading segment (`C:` becomes `C`), and UNC server/share names
/// become the two leading segments.
pub fn rootless(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => match prefix.kind() {
                Prefix::Disk(letter) | Prefix::VerbatimDisk(letter) => {
                    out.push((letter as char).to_string());
                }
                Prefix::UNC(server, share) | Prefix::VerbatimUNC(server, share) => {
                    out.push(server);
                    out.push(share);
                }
                Prefix::DeviceNS(device) => out.push(device),
                Prefix::Verbatim(part) => out.push(part),
            },
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir => out.push(".."),
            Component::Normal(segment) => out.push(segment),
        }
    }
    out
}

/// Resolve `.` and `..` segments textually, without touching the
/// filesystem or following symlinks.
pub fn normalize_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let ends_with_normal =
                    matches!(out.components().next_back(), Some(Component::Normal(_)));
                if ends_with_normal {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Project a source path into the sub-path it occupies under a destination
/// root.
///
/// `relative` needs a base; when the source is not under the base (or no
/// base could be resolved for the batch) the file is projected with the
/// absolute algorithm instead, and the result is marked as a fallback so
/// the caller can log it. Structure is never silently flattened.
pub fn project(
    source: &Path,
    style: PathStyle,
    base: Option<&Path>,
    include_base: bool,
) -> Projection {
    match style {
        PathStyle::Flat => Projection {
            relative: source.file_name().map(PathBuf::from).unwrap_or_default(),
            fell_back: false,
        },
        PathStyle::Absolute => Projection {
            relative: rootless(source),
            fell_back: false,
        },
        PathStyle::Relative => {
            let Some(base) = base else {
                return Projection {
                    relative: rootless(source),
                    fell_back: true,
                };
            };
            match source.strip_prefix(base) {
                Ok(rel) => {
                    let mut relative = PathBuf::new();
                    if include_base {
                        if let Some(name) = base.file_name() {
                            relative.push(name);
                        }
                    }
                    relative.push(rel);
                    Projection {
                        relative,
                        fell_back: false,
                    }
                }
                Err(_) => Projection {
                    relative: rootless(source),
                    fell_back: true,
                },
            }
        }
    }
}

/// Longest common leading segment run across all paths, compared
/// segment-wise rather than character-wise.
pub fn common_segment_prefix(paths: &[PathBuf]) -> Option<PathBuf> {
    let (first, rest) = paths.split_first()?;
    let mut prefix: Vec<Component> = first.components().collect();

    for path in rest {
        let matched = prefix
            .iter()
            .zip(path.components())
            .take_while(|(kept, next)| **kept == *next)
            .count();
        prefix.truncate(matched);
        if prefix.is_empty() {
            return None;
        }
    }

    Some(prefix.iter().map(|c| c.as_os_str()).collect())
}

/// Implicit base for a batch: the common directory prefix of the files'
/// parent directories. A prefix with no real segment (bare root or bare
/// drive) is no base at all.
pub fn implicit_base(files: &[PathBuf]) -> Option<PathBuf> {
    let parents: Vec<PathBuf> = files
        .iter()
        .filter_map(|f| f.parent().map(Path::to_path_buf))
        .collect();
    if parents.is_empty() {
        return None;
    }
    let prefix = common_segment_prefix(&parents)?;
    if prefix
        .components()
        .any(|c| matches!(c, Component::Normal(_)))
    {
        Some(prefix)
    } else {
        None
    }
}

/// Base directory for `relative` projection: an explicit base wins,
/// otherwise the batch's implicit common prefix.
pub fn resolve_base(explicit: Option<&Path>, files: &[PathBuf]) -> Option<PathBuf> {
    match explicit {
        Some(base) => Some(normalize_lexical(base)),
        None => implicit_base(files),
    }
}

/// First name of the form `stem_N.ext` not occupied by an existing file.
/// Returns the input unchanged when it is free.
pub fn unique_destination(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    let extension = path.extension();
    let parent = path.parent().unwrap_or(Path::new(""));

    let mut counter: u32 = 1;
    loop {
        let mut name = stem.clone();
        name.push(format!("_{counter}"));
        if let Some(ext) = extension {
            name.push(".");
            name.push(ext);
        }
        let candidate = parent.join(&name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}
