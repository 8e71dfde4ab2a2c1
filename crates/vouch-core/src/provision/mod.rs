//! Compiler provisioning: locating, downloading, caching, validating, and
//! executing historical compiler releases against untrusted input.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};
use url::Url;

use crate::error::ProvisionError;

mod solc;
mod vyper;
mod worker;

pub use solc::SolcProvisioner;
pub use vyper::VyperProvisioner;
pub use worker::JsWorkerPool;

/// Hard ceiling on captured compiler output. Standard-json output for large
/// projects routinely exceeds ordinary pipe buffer limits; beyond this the
/// invocation fails with `OutputTooLarge` instead of truncating.
pub const MAX_COMPILER_OUTPUT: usize = 64 * 1024 * 1024;

const USER_AGENT: &str = concat!("vouch/", env!("CARGO_PKG_VERSION"));

/// Retry policy for release downloads: fixed attempt count, per-attempt
/// timeout doubling, in-flight request aborted on timeout.
#[derive(Clone, Copy, Debug)]
pub struct FetchPolicy {
    pub attempts: usize,
    pub initial_timeout: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_timeout: Duration::from_secs(30),
        }
    }
}

pub(crate) fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build http client")
}

/// Fetch a URL with bounded exponential backoff. Dropping the in-flight
/// future on timeout aborts the request before the next attempt starts.
pub(crate) async fn fetch_bytes(client: &Client, url: &Url, policy: FetchPolicy) -> Result<Vec<u8>> {
    let mut timeout = policy.initial_timeout;
    let mut last_reason = String::from("no attempts made");
    for attempt in 0..policy.attempts {
        if attempt > 0 {
            debug!(%url, attempt, ?timeout, "retrying download");
        }
        match tokio::time::timeout(timeout, fetch_once(client, url)).await {
            Ok(Ok(bytes)) => return Ok(bytes),
            // A 404 is a fact about the release index, not a transient fault.
            Ok(Err(err))
                if matches!(
                    err.downcast_ref::<ProvisionError>(),
                    Some(ProvisionError::ReleaseNotFound { .. })
                ) =>
            {
                return Err(err);
            }
            Ok(Err(err)) => last_reason = format!("{err:#}"),
            Err(_) => last_reason = format!("timed out after {timeout:?}"),
        }
        timeout *= 2;
    }
    Err(ProvisionError::DownloadFailed {
        url: url.to_string(),
        attempts: policy.attempts,
        reason: last_reason,
    }
    .into())
}

async fn fetch_once(client: &Client, url: &Url) -> Result<Vec<u8>> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("failed to fetch {url}"))?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(ProvisionError::ReleaseNotFound {
            url: url.to_string(),
        }
        .into());
    }
    let response = response
        .error_for_status()
        .with_context(|| format!("unexpected response for {url}"))?;
    let bytes = response
        .bytes()
        .await
        .with_context(|| format!("stream error for {url}"))?;
    Ok(bytes.to_vec())
}

/// Platform family for native compiler binaries, selected once at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    LinuxAmd64,
    MacosAmd64,
    MacosArm64,
    WindowsAmd64,
    Other,
}

impl Platform {
    #[must_use]
    pub fn detect() -> Self {
        if cfg!(all(target_os = "linux", target_arch = "x86_64")) {
            Self::LinuxAmd64
        } else if cfg!(all(target_os = "macos", target_arch = "x86_64")) {
            Self::MacosAmd64
        } else if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
            Self::MacosArm64
        } else if cfg!(all(target_os = "windows", target_arch = "x86_64")) {
            Self::WindowsAmd64
        } else {
            Self::Other
        }
    }

    /// Vendor release directory for solc native binaries, or `None` when the
    /// platform has no native tier and must fall back to the scripted engine.
    #[must_use]
    pub fn solc_dir(self) -> Option<&'static str> {
        match self {
            Self::LinuxAmd64 => Some("linux-amd64"),
            // Arm macs run the amd64 release under translation.
            Self::MacosAmd64 | Self::MacosArm64 => Some("macosx-amd64"),
            Self::WindowsAmd64 => Some("windows-amd64"),
            Self::Other => None,
        }
    }

    /// Release filename suffix for vyper binaries.
    #[must_use]
    pub fn vyper_tag(self) -> Option<&'static str> {
        match self {
            Self::LinuxAmd64 => Some("linux"),
            Self::MacosAmd64 | Self::MacosArm64 => Some("darwin"),
            Self::WindowsAmd64 => Some("windows.exe"),
            Self::Other => None,
        }
    }
}

/// Local (platform, version) → file cache for compiler executables and
/// scripted engines.
#[derive(Clone, Debug)]
pub struct CompilerCache {
    dir: PathBuf,
}

impl CompilerCache {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[must_use]
    pub fn entry_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Persist a downloaded compiler binary with execute permission, via a
    /// temp file in the same directory so a crash never leaves a partial
    /// entry at the final path.
    pub fn write_executable(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let dest = self.write_plain(file_name, bytes)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755))
                .with_context(|| format!("failed to mark {} executable", dest.display()))?;
        }
        Ok(dest)
    }

    pub fn write_plain(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let dest = self.entry_path(file_name);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("failed to create temp file under {}", self.dir.display()))?;
        std::io::Write::write_all(&mut tmp, bytes)
            .with_context(|| format!("failed to write {file_name}"))?;
        tmp.persist(&dest)
            .map_err(|err| anyhow!("unable to persist {file_name}: {err}"))?;
        Ok(dest)
    }
}

/// Probe a cached binary: it must exit 0 from `--version` and, when we know
/// the expected version, report it.
pub(crate) async fn validate_binary(path: &Path, expected_version: &str) -> Result<()> {
    let probe = Command::new(path)
        .arg("--version")
        .output()
        .await
        .with_context(|| format!("failed to probe compiler at {}", path.display()));
    let output = match probe {
        Ok(output) => output,
        Err(err) => {
            warn!(path = %path.display(), %err, "compiler version probe could not run");
            return Err(ProvisionError::ValidationFailed {
                path: path.to_path_buf(),
                expected: expected_version.to_string(),
            }
            .into());
        }
    };
    let reported = String::from_utf8_lossy(&output.stdout);
    if !output.status.success()
        || (!expected_version.is_empty() && !reported.contains(expected_version))
    {
        return Err(ProvisionError::ValidationFailed {
            path: path.to_path_buf(),
            expected: expected_version.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Run a native compiler with standard-json input piped over stdin, capturing
/// stdout against the output ceiling.
pub(crate) async fn run_standard_json(binary: &Path, args: &[&str], input: &Value) -> Result<Value> {
    let mut child = Command::new(binary)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn compiler at {}", binary.display()))?;

    let payload = serde_json::to_vec(input).context("failed to serialize compiler input")?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("compiler stdin unavailable"))?;
    stdin
        .write_all(&payload)
        .await
        .context("failed to write compiler input")?;
    drop(stdin);

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("compiler stdout unavailable"))?;
    let captured = match read_capped(stdout, MAX_COMPILER_OUTPUT).await? {
        Some(bytes) => bytes,
        None => {
            let _ = child.kill().await;
            return Err(ProvisionError::OutputTooLarge {
                limit: MAX_COMPILER_OUTPUT,
            }
            .into());
        }
    };
    let status = child.wait().await.context("failed to wait for compiler")?;
    // Compilers exit non-zero on semantic errors but still emit standard-json
    // output; the errors array is authoritative, not the exit code.
    if captured.is_empty() {
        return Err(ProvisionError::InvalidOutput(format!(
            "no output (exit {:?})",
            status.code()
        ))
        .into());
    }
    parse_standard_output(&captured)
}

/// Read up to `limit` bytes; `None` means the limit was exceeded.
pub(crate) async fn read_capped(
    mut reader: impl tokio::io::AsyncRead + Unpin,
    limit: usize,
) -> Result<Option<Vec<u8>>> {
    let mut captured = Vec::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = reader
            .read(&mut buffer)
            .await
            .context("stream error while reading compiler output")?;
        if read == 0 {
            return Ok(Some(captured));
        }
        if captured.len() + read > limit {
            return Ok(None);
        }
        captured.extend_from_slice(&buffer[..read]);
    }
}

/// Parse standard-json output; entries in `errors` with severity `"error"`
/// are a hard compilation failure, not a warning.
pub(crate) fn parse_standard_output(bytes: &[u8]) -> Result<Value> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|err| ProvisionError::InvalidOutput(err.to_string()))?;
    let errors: Vec<Value> = value
        .get("errors")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter(|entry| {
                    entry.get("severity").and_then(Value::as_str) == Some("error")
                })
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    if errors.is_empty() {
        Ok(value)
    } else {
        Err(ProvisionError::CompilerError { errors }.into())
    }
}
