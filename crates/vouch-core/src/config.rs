use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use dirs_next::home_dir;
use url::Url;

/// Environment override for the compiler binary cache directory.
pub const COMPILER_DIR_ENV: &str = "VOUCH_COMPILER_DIR";

const REPOSITORY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Explicit service configuration, constructed once at startup and passed by
/// reference into every component that needs it. Immutable thereafter.
#[derive(Clone, Debug)]
pub struct VouchConfig {
    /// Root of the filesystem repository (`contracts/…`, `manifest.json`).
    pub repository_root: PathBuf,
    /// Version string stamped into the repository manifest.
    pub repository_version: String,
    /// SQLite database path for the relational backend.
    pub database_path: PathBuf,
    /// Local cache directory for compiler binaries and scripted engines.
    pub compiler_dir: PathBuf,
    /// Release index + binary host for the solc family.
    pub solc_base_url: Url,
    /// Release host for the vyper family.
    pub vyper_base_url: Url,
    /// Optional IPFS HTTP API endpoint; when set, every repository write is
    /// mirrored.
    pub ipfs_api: Option<Url>,
}

impl VouchConfig {
    /// Builds a configuration rooted at the given repository directory, with
    /// the database and compiler cache in their default locations.
    pub fn new(repository_root: impl Into<PathBuf>) -> Result<Self> {
        let repository_root = repository_root.into();
        let database_path = repository_root.join("vouch.sqlite");
        Ok(Self {
            repository_root,
            repository_version: REPOSITORY_VERSION.to_string(),
            database_path,
            compiler_dir: default_compiler_dir()?,
            solc_base_url: Url::parse("https://binaries.soliditylang.org/")?,
            vyper_base_url: Url::parse("https://github.com/vyperlang/vyper/releases/download/")?,
            ipfs_api: None,
        })
    }

    pub fn with_ipfs_api(mut self, api: Url) -> Self {
        self.ipfs_api = Some(api);
        self
    }

    pub fn with_compiler_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.compiler_dir = dir.into();
        self
    }

    #[must_use]
    pub fn repository_root(&self) -> &Path {
        &self.repository_root
    }
}

/// `$VOUCH_COMPILER_DIR` when set, otherwise `~/.vouch/compilers`.
pub fn default_compiler_dir() -> Result<PathBuf> {
    if let Some(override_dir) = env::var_os(COMPILER_DIR_ENV) {
        return Ok(PathBuf::from(override_dir));
    }
    let home = home_dir().ok_or_else(|| anyhow!("unable to determine home directory"))?;
    Ok(home.join(".vouch").join("compilers"))
}
