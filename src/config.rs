use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::core::hasher::HashAlgorithm;
use crate::core::pathmap::PathStyle;

pub const DEFAULT_CONFIG_FILE: &str = "preserve.toml";

/// Resolved application configuration.
///
/// Merged lowest-precedence first: built-in defaults, `preserve.toml`,
/// `PRESERVE_`-prefixed environment variables, then serialized CLI
/// arguments (absent CLI fields never mask lower layers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub path_style: PathStyle,
    pub include_base: bool,
    pub recursive: bool,
    pub overwrite: bool,
    pub preserve_attrs: bool,
    /// Verify copies right after writing them, and gate MOVE deletes on
    /// the outcome.
    pub verify: bool,
    pub hash_algorithms: Vec<HashAlgorithm>,
    /// Keep manifests and sidecars under `<dst>/.preserve/`.
    pub use_preserve_dir: bool,
    /// Write a link sidecar for every preserved file.
    pub sidecar_links: bool,
    pub verbose: bool,
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            path_style: PathStyle::Relative,
            include_base: false,
            recursive: false,
            overwrite: false,
            preserve_attrs: true,
            verify: true,
            hash_algorithms: vec![HashAlgorithm::Sha256],
            use_preserve_dir: false,
            sidecar_links: false,
            verbose: false,
            json_logs: false,
        }
    }
}

impl AppConfig {
    pub fn new(cli: Option<&impl Serialize>) -> Result<Self, figment::Error> {
        Self::with_file(Path::new(DEFAULT_CONFIG_FILE), cli)
    }

    pub fn with_file(path: &Path, cli: Option<&impl Serialize>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("PRESERVE_"));
        if let Some(cli) = cli {
            figment = figment.merge(Serialized::defaults(cli));
        }
        figment.extract()
    }
}
