//! Provisioning for the solc compiler family.
//!
//! Resolution order per requested version: a cached native platform binary,
//! then the scripted soljson engine, and for versions old enough to leak
//! state across invocations, the engine runs in an isolated context per
//! compilation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use reqwest::Client;
use semver::Version;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::VouchConfig;
use crate::error::ProvisionError;

use super::{
    fetch_bytes, http_client, run_standard_json, validate_binary, CompilerCache, FetchPolicy,
    JsWorkerPool, Platform,
};

/// Engine versions below this exhibit cross-invocation state leakage and are
/// compiled in one fresh execution context per invocation.
const LEGACY_ENGINE_CEILING: (u64, u64, u64) = (0, 5, 0);

pub struct SolcProvisioner {
    cache: CompilerCache,
    platform: Platform,
    client: Client,
    base_url: Url,
    policy: FetchPolicy,
    worker: Option<JsWorkerPool>,
}

impl SolcProvisioner {
    pub fn new(config: &VouchConfig) -> Result<Self> {
        let cache = CompilerCache::new(config.compiler_dir.clone());
        let worker = match JsWorkerPool::new(&cache) {
            Ok(pool) => Some(pool),
            Err(err) => {
                warn!(%err, "scripted-engine runner unavailable; native binaries only");
                None
            }
        };
        Ok(Self {
            cache,
            platform: Platform::detect(),
            client: http_client()?,
            base_url: config.solc_base_url.clone(),
            policy: FetchPolicy::default(),
            worker,
        })
    }

    /// Normalize vendor naming quirks: a leading `v` and the `-ci.` nightly
    /// tag form, which the release index publishes as `-nightly.`.
    #[must_use]
    pub fn normalize_version(raw: &str) -> String {
        raw.trim().trim_start_matches('v').replace("-ci.", "-nightly.")
    }

    /// Compile standard-json input with the requested compiler version,
    /// provisioning it first if needed.
    pub async fn compile(&self, version: &str, input: &Value) -> Result<Value> {
        let version = Self::normalize_version(version);
        if let Some(binary) = self.ensure_native(&version).await? {
            return run_standard_json(&binary, &["--standard-json"], input).await;
        }
        let engine = self.ensure_engine(&version).await?;
        let worker = self.worker.as_ref().ok_or_else(|| {
            ProvisionError::EngineUnavailable("no node runtime on PATH".to_string())
        })?;
        if is_legacy(&version) {
            worker.compile_isolated(&engine, input).await
        } else {
            worker.compile_shared(&engine, input).await
        }
    }

    /// Make sure the requested version is present in the local cache,
    /// without compiling anything. Used by the startup prewarm.
    pub async fn ensure_version(&self, version: &str) -> Result<()> {
        let version = Self::normalize_version(version);
        if self.ensure_native(&version).await?.is_some() {
            return Ok(());
        }
        self.ensure_engine(&version).await.map(|_| ())
    }

    /// All versions known to the vendor release index, newest first as
    /// published.
    pub async fn list_versions(&self) -> Result<Vec<String>> {
        let url = self.release_url("bin", "list.txt")?;
        let body = fetch_bytes(&self.client, &url, self.policy).await?;
        let listing = String::from_utf8_lossy(&body);
        Ok(listing
            .lines()
            .filter_map(|line| {
                line.trim()
                    .strip_prefix("soljson-v")
                    .and_then(|rest| rest.strip_suffix(".js"))
                    .map(str::to_string)
            })
            .collect())
    }

    /// Cached native binary for this platform, downloading and validating on
    /// a miss. `None` means this version has no usable native tier here and
    /// the caller should fall back to the scripted engine.
    async fn ensure_native(&self, version: &str) -> Result<Option<PathBuf>> {
        let Some(dir) = self.platform.solc_dir() else {
            return Ok(None);
        };
        let file_name = format!("solc-{dir}-v{version}");
        let path = self.cache.entry_path(&file_name);
        if path.exists() {
            match validate_binary(&path, version).await {
                Ok(()) => return Ok(Some(path)),
                Err(err) => {
                    warn!(%version, %err, "cached solc binary failed validation; refetching");
                    let _ = std::fs::remove_file(&path);
                }
            }
        }

        let bytes = match self.fetch_release(dir, &file_name).await {
            Ok(bytes) => bytes,
            Err(err)
                if matches!(
                    err.downcast_ref::<ProvisionError>(),
                    Some(ProvisionError::ReleaseNotFound { .. })
                ) =>
            {
                debug!(%version, platform = dir, "no native release; using scripted engine");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let path = self.cache.write_executable(&file_name, &bytes)?;
        match validate_binary(&path, version).await {
            Ok(()) => {
                info!(%version, path = %path.display(), "provisioned native solc");
                Ok(Some(path))
            }
            Err(err) => {
                warn!(%version, %err, "downloaded solc failed validation; falling back");
                let _ = std::fs::remove_file(&path);
                Ok(None)
            }
        }
    }

    /// Cached soljson engine, downloading on a miss.
    async fn ensure_engine(&self, version: &str) -> Result<PathBuf> {
        let file_name = format!("soljson-v{version}.js");
        let path = self.cache.entry_path(&file_name);
        if path.exists() {
            return Ok(path);
        }
        let bytes = self.fetch_release("bin", &file_name).await?;
        let path = self.cache.write_plain(&file_name, &bytes)?;
        info!(%version, path = %path.display(), "provisioned soljson engine");
        Ok(path)
    }

    /// Fetch a release file. A historical quirk of the vendor repository:
    /// some entries are a one-line pointer naming a differently-named
    /// release; those are re-resolved and re-fetched once.
    async fn fetch_release(&self, dir: &str, file_name: &str) -> Result<Vec<u8>> {
        let url = self.release_url(dir, file_name)?;
        let bytes = fetch_bytes(&self.client, &url, self.policy).await?;
        if let Some(pointer) = redirect_pointer(&bytes) {
            debug!(from = file_name, to = %pointer, "following release pointer");
            let url = self.release_url(dir, &pointer)?;
            return fetch_bytes(&self.client, &url, self.policy).await;
        }
        Ok(bytes)
    }

    fn release_url(&self, dir: &str, file_name: &str) -> Result<Url> {
        self.base_url
            .join(&format!("{dir}/{file_name}"))
            .with_context(|| format!("invalid release url for {dir}/{file_name}"))
    }
}

fn is_legacy(version: &str) -> bool {
    let Ok(parsed) = parse_version(version) else {
        return false;
    };
    let (major, minor, patch) = LEGACY_ENGINE_CEILING;
    // Compare on the release triple only; nightlies of 0.5.0 are not legacy.
    (parsed.major, parsed.minor, parsed.patch) < (major, minor, patch)
}

fn parse_version(version: &str) -> Result<Version> {
    Version::parse(version).with_context(|| format!("unparseable compiler version {version}"))
}

/// Detect the vendor's redirect-like payload: a short, single-line body
/// naming another release file instead of binary content.
fn redirect_pointer(bytes: &[u8]) -> Option<String> {
    if bytes.len() > 256 {
        return None;
    }
    let text = std::str::from_utf8(bytes).ok()?;
    let trimmed = text.trim();
    if trimmed.lines().count() != 1 {
        return None;
    }
    (trimmed.starts_with("solc-") || trimmed.starts_with("soljson-"))
        .then(|| trimmed.to_string())
}
