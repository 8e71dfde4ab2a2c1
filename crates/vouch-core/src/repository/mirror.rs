//! Idempotent mirroring of the repository tree into an IPFS node's mutable
//! filesystem over the HTTP API.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use reqwest::multipart;
use serde_json::Value;
use tracing::debug;
use url::Url;

pub struct IpfsMirror {
    api: Url,
    client: reqwest::Client,
}

impl IpfsMirror {
    pub fn new(api: Url) -> Result<Self> {
        Ok(Self {
            api,
            client: crate::provision::http_client()?,
        })
    }

    /// Mirror every file under `dir` (a directory inside `root`) into the
    /// node, addressed by its path relative to `root`. Files that already
    /// exist at the destination are skipped; parents are created as needed.
    pub async fn mirror_dir(&self, root: &Path, dir: &Path) -> Result<()> {
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            for entry in std::fs::read_dir(&current)
                .with_context(|| format!("failed to read {}", current.display()))?
            {
                let entry = entry?;
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    stack.push(path);
                    continue;
                }
                let relative = path
                    .strip_prefix(root)
                    .with_context(|| format!("{} escapes the repository", path.display()))?;
                let dst = format!("/{}", relative.to_string_lossy().replace('\\', "/"));
                if self.exists(&dst).await? {
                    continue;
                }
                self.ensure_parent(&dst).await?;
                let cid = self.add_file(&path).await?;
                self.link(&cid, &dst).await?;
                debug!(%dst, %cid, "mirrored repository file");
            }
        }
        Ok(())
    }

    /// `files/stat` as the cheap presence probe.
    async fn exists(&self, dst: &str) -> Result<bool> {
        let url = self.endpoint("files/stat", &[("arg", dst)])?;
        let response = self
            .client
            .post(url)
            .send()
            .await
            .context("ipfs files/stat failed")?;
        Ok(response.status().is_success())
    }

    async fn ensure_parent(&self, dst: &str) -> Result<()> {
        let Some((parent, _)) = dst.rsplit_once('/') else {
            return Ok(());
        };
        if parent.is_empty() {
            return Ok(());
        }
        let url = self.endpoint("files/mkdir", &[("arg", parent), ("parents", "true")])?;
        self.client
            .post(url)
            .send()
            .await
            .context("ipfs files/mkdir failed")?
            .error_for_status()
            .context("ipfs files/mkdir rejected")?;
        Ok(())
    }

    /// Add the file's content, returning its content id.
    async fn add_file(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let form = multipart::Form::new().part(
            "file",
            multipart::Part::bytes(bytes).file_name(file_name),
        );
        let url = self.endpoint("add", &[("pin", "true"), ("quieter", "true")])?;
        let response: Value = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .context("ipfs add failed")?
            .error_for_status()
            .context("ipfs add rejected")?
            .json()
            .await
            .context("ipfs add returned invalid json")?;
        response
            .get("Hash")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("ipfs add response missing Hash"))
    }

    /// Link an already-added content id at the destination path.
    async fn link(&self, cid: &str, dst: &str) -> Result<()> {
        let src = format!("/ipfs/{cid}");
        let url = self.endpoint("files/cp", &[("arg", src.as_str()), ("arg", dst)])?;
        self.client
            .post(url)
            .send()
            .await
            .context("ipfs files/cp failed")?
            .error_for_status()
            .context("ipfs files/cp rejected")?;
        Ok(())
    }

    fn endpoint(&self, method: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self
            .api
            .join(&format!("api/v0/{method}"))
            .with_context(|| format!("invalid ipfs api endpoint {method}"))?;
        url.query_pairs_mut().extend_pairs(query);
        Ok(url)
    }
}
