//! Model client abstraction.
//!
//! The [`ModelClient`] trait decouples the steps from the model backend
//! (currently `codex exec`). A client receives one prompt and must leave its
//! final JSON message at `request.output_path`; parsing and schema
//! validation happen afterwards in [`request_structured`], so nothing the
//! model writes is trusted before the process has exited.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::structured::{ParseError, ResultSchema};
use crate::io::config::ModelConfig;
use crate::io::process::{CommandOutput, run_command_with_stream};

/// Parameters for one model invocation.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Working directory for the model process.
    pub workdir: PathBuf,
    pub prompt: String,
    /// JSON Schema constraining the final message.
    pub output_schema_path: PathBuf,
    /// Where the final message must be written.
    pub output_path: PathBuf,
    /// stdout/stderr log of the model process.
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    /// When `Some`, JSONL events are tee'd here as they arrive.
    pub stream_path: Option<PathBuf>,
}

/// Abstraction over model backends.
pub trait ModelClient {
    /// Run the model. Must write its final message to `request.output_path`.
    fn exec(&self, request: &ModelRequest) -> Result<()>;
}

impl<M: ModelClient + ?Sized> ModelClient for &M {
    fn exec(&self, request: &ModelRequest) -> Result<()> {
        (**self).exec(request)
    }
}

/// Why a structured request produced no usable value.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The model process failed, timed out, or left no output.
    #[error("model request failed: {0:#}")]
    Transport(anyhow::Error),
    #[error(transparent)]
    Malformed(#[from] ParseError),
}

/// Client that spawns `codex exec`.
#[derive(Debug, Clone)]
pub struct CodexClient {
    program: String,
    model: String,
    reasoning_effort: String,
}

impl CodexClient {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            program: config.program.clone(),
            model: config.model.clone(),
            reasoning_effort: config.reasoning_effort.clone(),
        }
    }
}

impl ModelClient for CodexClient {
    #[instrument(skip_all, fields(program = %self.program, timeout_secs = request.timeout.as_secs(), streaming = request.stream_path.is_some()))]
    fn exec(&self, request: &ModelRequest) -> Result<()> {
        info!(workdir = %request.workdir.display(), "starting model request");

        if !request.output_schema_path.exists() {
            return Err(anyhow!(
                "missing output schema {}",
                request.output_schema_path.display()
            ));
        }
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }
        // A stale message from an earlier attempt must not be mistaken for this one.
        if request.output_path.exists() {
            fs::remove_file(&request.output_path).with_context(|| {
                format!("remove stale output {}", request.output_path.display())
            })?;
        }

        let mut cmd = Command::new(&self.program);
        cmd.arg("exec")
            .arg("-c")
            .arg(format!("model_reasoning_effort={}", self.reasoning_effort))
            .arg("--skip-git-repo-check");
        if !self.model.trim().is_empty() {
            cmd.arg("-m").arg(&self.model);
        }
        if request.stream_path.is_some() {
            cmd.arg("--json");
        }
        cmd.arg("--output-schema")
            .arg(&request.output_schema_path)
            .arg("--output-last-message")
            .arg(&request.output_path)
            .arg("-")
            .current_dir(&request.workdir);

        let output = run_command_with_stream(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
            request.stream_path.as_deref(),
        )
        .with_context(|| format!("run {} exec", self.program))?;

        write_model_log(&request.log_path, &output, request.output_limit_bytes)?;

        if output.timed_out {
            warn!(
                timeout_secs = request.timeout.as_secs(),
                "model request timed out"
            );
            return Err(anyhow!("model request timed out after {:?}", request.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "model request failed");
            return Err(anyhow!(
                "{} exec failed with status {:?}",
                self.program,
                output.status.code()
            ));
        }

        debug!("model request completed");
        Ok(())
    }
}

/// Run the model and parse its final message against `schema`.
#[instrument(skip_all, fields(schema = schema.name(), output_path = %request.output_path.display()))]
pub fn request_structured<M, T>(
    model: &M,
    request: &ModelRequest,
    schema: &ResultSchema,
) -> Result<T, ModelError>
where
    M: ModelClient + ?Sized,
    T: DeserializeOwned,
{
    // A previous round's answer must never be read back as this one.
    if request.output_path.exists() {
        fs::remove_file(&request.output_path)
            .with_context(|| format!("remove stale output {}", request.output_path.display()))
            .map_err(ModelError::Transport)?;
    }
    model.exec(request).map_err(ModelError::Transport)?;
    let raw = read_output(&request.output_path).map_err(ModelError::Transport)?;
    let value = schema.parse(&raw)?;
    debug!(bytes = raw.len(), "parsed model output");
    Ok(value)
}

fn read_output(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(anyhow!("missing model output {}", path.display()));
    }
    fs::read_to_string(path).with_context(|| format!("read model output {}", path.display()))
}

fn write_model_log(path: &Path, output: &CommandOutput, output_limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create model log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.truncated_notice("model"));
    if output.timed_out {
        buf.push_str("\n[model timed out]\n");
    }

    if buf.len() > output_limit {
        let mut cut = output_limit;
        while !buf.is_char_boundary(cut) {
            cut -= 1;
        }
        let dropped = buf.len() - cut;
        buf.truncate(cut);
        buf.push_str(&format!("\n[truncated {dropped} bytes]\n"));
    }

    fs::write(path, buf).with_context(|| format!("write model log {}", path.display()))
}
