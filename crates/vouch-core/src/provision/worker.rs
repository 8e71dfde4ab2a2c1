//! Scripted-engine execution under Node.js.
//!
//! Recent engine versions share one long-lived worker per engine file. Engine
//! versions below the legacy threshold leak state across invocations, so they
//! get a fresh process every time: no state survives across distinct
//! invocations below the threshold.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::ProvisionError;

use super::{parse_standard_output, read_capped, CompilerCache, MAX_COMPILER_OUTPUT};

const DRIVER_FILENAME: &str = "engine-driver.js";

const DRIVER_JS: &str = r#"'use strict';
const fs = require('fs');
const engine = require(process.argv[2]);
const once = process.argv[3] === '--once';
function bind(name, args) {
  try {
    if (typeof engine.cwrap === 'function') return engine.cwrap(name, 'string', args);
  } catch (err) {}
  return null;
}
const compile =
  bind('solidity_compile', ['string', 'number', 'number']) ||
  bind('compileStandard', ['string', 'number']) ||
  bind('compileJSON', ['string', 'number']);
if (!compile) {
  process.stderr.write('engine exposes no compile entrypoint\n');
  process.exit(2);
}
if (once) {
  process.stdout.write(compile(fs.readFileSync(0, 'utf8'), 0));
  process.exit(0);
}
const readline = require('readline');
const rl = readline.createInterface({ input: process.stdin, terminal: false });
rl.on('line', (line) => {
  let reply;
  try {
    reply = { output: compile(JSON.parse(line).input, 0) };
  } catch (err) {
    reply = { error: String(err) };
  }
  process.stdout.write(JSON.stringify(reply) + '\n');
});
"#;

struct Worker {
    // Held so the process is killed when the worker is dropped.
    _child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Runs scripted compiler engines in Node.js subprocesses: one long-lived
/// worker per engine file, or a throwaway process for legacy versions.
pub struct JsWorkerPool {
    node: PathBuf,
    driver: PathBuf,
    workers: Mutex<HashMap<PathBuf, Worker>>,
}

impl JsWorkerPool {
    pub fn new(cache: &CompilerCache) -> Result<Self> {
        let node = which::which("node")
            .map_err(|err| ProvisionError::EngineUnavailable(err.to_string()))?;
        let driver = cache.write_plain(DRIVER_FILENAME, DRIVER_JS.as_bytes())?;
        Ok(Self {
            node,
            driver,
            workers: Mutex::new(HashMap::new()),
        })
    }

    /// Compile with a fresh engine context that is torn down afterwards.
    pub async fn compile_isolated(&self, engine: &Path, input: &Value) -> Result<Value> {
        debug!(engine = %engine.display(), "compiling in isolated engine context");
        let mut child = self
            .spawn(engine, true)
            .with_context(|| format!("failed to spawn engine runner for {}", engine.display()))?;
        let payload = serde_json::to_vec(input).context("failed to serialize compiler input")?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("engine stdin unavailable"))?;
        stdin
            .write_all(&payload)
            .await
            .context("failed to write compiler input")?;
        drop(stdin);
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("engine stdout unavailable"))?;
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
        let status = child.wait().await.context("failed to wait for engine")?;
        if captured.is_empty() {
            return Err(ProvisionError::InvalidOutput(format!(
                "engine produced no output (exit {:?})",
                status.code()
            ))
            .into());
        }
        parse_standard_output(&captured)
    }

    /// Compile on the long-lived worker for this engine, spawning it on first
    /// use. A worker that fails mid-exchange is discarded, not reused.
    pub async fn compile_shared(&self, engine: &Path, input: &Value) -> Result<Value> {
        let mut workers = self.workers.lock().await;
        if !workers.contains_key(engine) {
            let mut child = self
                .spawn(engine, false)
                .with_context(|| format!("failed to spawn engine worker for {}", engine.display()))?;
            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("engine stdin unavailable"))?;
            let stdout = BufReader::new(
                child
                    .stdout
                    .take()
                    .ok_or_else(|| anyhow!("engine stdout unavailable"))?,
            );
            workers.insert(
                engine.to_path_buf(),
                Worker {
                    _child: child,
                    stdin,
                    stdout,
                },
            );
            debug!(engine = %engine.display(), "started long-lived engine worker");
        }
        let worker = workers
            .get_mut(engine)
            .ok_or_else(|| anyhow!("engine worker missing after spawn"))?;

        let result = Self::exchange(worker, input).await;
        if result.is_err() {
            warn!(engine = %engine.display(), "discarding failed engine worker");
            workers.remove(engine);
        }
        result
    }

    async fn exchange(worker: &mut Worker, input: &Value) -> Result<Value> {
        let input_text = serde_json::to_string(input)?;
        let job = serde_json::to_string(&json!({ "input": input_text }))?;
        worker
            .stdin
            .write_all(job.as_bytes())
            .await
            .context("failed to write engine job")?;
        worker
            .stdin
            .write_all(b"\n")
            .await
            .context("failed to write engine job")?;
        worker
            .stdin
            .flush()
            .await
            .context("failed to flush engine job")?;

        let mut line = Vec::new();
        let mut limited = (&mut worker.stdout).take((MAX_COMPILER_OUTPUT + 1) as u64);
        limited
            .read_until(b'\n', &mut line)
            .await
            .context("failed to read engine reply")?;
        if line.len() > MAX_COMPILER_OUTPUT {
            return Err(ProvisionError::OutputTooLarge {
                limit: MAX_COMPILER_OUTPUT,
            }
            .into());
        }
        if line.is_empty() {
            return Err(ProvisionError::EngineUnavailable(
                "engine worker closed its output".to_string(),
            )
            .into());
        }
        let reply: Value = serde_json::from_slice(&line)
            .map_err(|err| ProvisionError::InvalidOutput(err.to_string()))?;
        if let Some(error) = reply.get("error").and_then(Value::as_str) {
            return Err(ProvisionError::InvalidOutput(error.to_string()).into());
        }
        let output = reply
            .get("output")
            .and_then(Value::as_str)
            .ok_or_else(|| ProvisionError::InvalidOutput("engine reply had no output".into()))?;
        parse_standard_output(output.as_bytes())
    }

    fn spawn(&self, engine: &Path, once: bool) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.node);
        cmd.arg(&self.driver).arg(engine);
        if once {
            cmd.arg("--once");
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}
