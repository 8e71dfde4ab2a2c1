//! Provisioning for the vyper compiler family: structurally the solc flow
//! with a single native tier and no legacy engine path.

use std::path::PathBuf;

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use crate::config::VouchConfig;
use crate::error::ProvisionError;

use super::{
    fetch_bytes, http_client, run_standard_json, validate_binary, CompilerCache, FetchPolicy,
    Platform,
};

pub struct VyperProvisioner {
    cache: CompilerCache,
    platform: Platform,
    client: Client,
    base_url: Url,
    policy: FetchPolicy,
}

impl VyperProvisioner {
    pub fn new(config: &VouchConfig) -> Result<Self> {
        Ok(Self {
            cache: CompilerCache::new(config.compiler_dir.clone()),
            platform: Platform::detect(),
            client: http_client()?,
            base_url: config.vyper_base_url.clone(),
            policy: FetchPolicy::default(),
        })
    }

    #[must_use]
    pub fn normalize_version(raw: &str) -> String {
        raw.trim().trim_start_matches('v').to_string()
    }

    pub async fn compile(&self, version: &str, input: &Value) -> Result<Value> {
        let version = Self::normalize_version(version);
        let binary = self.ensure_binary(&version).await?;
        run_standard_json(&binary, &["--standard-json"], input).await
    }

    pub async fn ensure_version(&self, version: &str) -> Result<()> {
        let version = Self::normalize_version(version);
        self.ensure_binary(&version).await.map(|_| ())
    }

    async fn ensure_binary(&self, version: &str) -> Result<PathBuf> {
        let Some(tag) = self.platform.vyper_tag() else {
            return Err(ProvisionError::UnsupportedPlatform { family: "vyper" }.into());
        };
        let file_name = format!("vyper.{version}.{tag}");
        let path = self.cache.entry_path(&file_name);
        let expected = release_tag(version);
        if path.exists() {
            match validate_binary(&path, expected).await {
                Ok(()) => return Ok(path),
                Err(err) => {
                    warn!(%version, %err, "cached vyper binary failed validation; refetching");
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        let url = self
            .base_url
            .join(&format!("v{}/{}", expected, file_name))
            .with_context(|| format!("invalid release url for {file_name}"))?;
        let bytes = fetch_bytes(&self.client, &url, self.policy).await?;
        let path = self.cache.write_executable(&file_name, &bytes)?;
        validate_binary(&path, expected).await?;
        info!(%version, path = %path.display(), "provisioned vyper");
        Ok(path)
    }
}

/// The release tag is the version without its `+commit.…` suffix.
fn release_tag(version: &str) -> &str {
    version.split('+').next().unwrap_or(version)
}
