//! Configuration stored under `.optiloop/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Top-level configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct OptiloopConfig {
    pub model: ModelConfig,
    pub sandbox: SandboxConfig,
    pub controller: ControllerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Executable for the model CLI.
    pub program: String,
    /// Model name passed with `-m`. Empty uses the CLI default.
    pub model: String,
    pub reasoning_effort: String,
    /// Wall-clock budget for a single model request.
    pub timeout_secs: u64,
    /// Truncate model process logs beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Tee the model's JSONL event stream to `model/<step>.stream.jsonl`.
    pub stream_events: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            program: "codex".to_string(),
            model: String::new(),
            reasoning_effort: "medium".to_string(),
            timeout_secs: 10 * 60,
            output_limit_bytes: 200_000,
            stream_events: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Compose invocation prefix (e.g. `["docker","compose"]`).
    pub compose_command: Vec<String>,
    /// Cleanup command run after `down`. Empty disables it.
    pub prune_command: Vec<String>,
    pub build_timeout_secs: u64,
    pub run_timeout_secs: u64,
    /// Truncate the per-phase sandbox log file beyond this many bytes.
    pub log_limit_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            compose_command: vec!["docker".to_string(), "compose".to_string()],
            prune_command: vec![
                "docker".to_string(),
                "image".to_string(),
                "prune".to_string(),
                "-f".to_string(),
            ],
            build_timeout_secs: 20 * 60,
            run_timeout_secs: 60 * 60,
            log_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Consecutive fix attempts allowed before giving up. `0` = unbounded.
    pub max_fix_attempts: u32,
    /// Maximum prompt size before droppable sections are removed.
    pub prompt_budget_bytes: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_fix_attempts: 5,
            prompt_budget_bytes: 60_000,
        }
    }
}

impl ControllerConfig {
    /// Whether `attempts` fixes already spend the budget.
    pub fn fix_budget_spent(&self, attempts: u32) -> bool {
        self.max_fix_attempts != 0 && attempts >= self.max_fix_attempts
    }
}

impl OptiloopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.program.trim().is_empty() {
            return Err(anyhow!("model.program must be non-empty"));
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if self.model.output_limit_bytes == 0 {
            return Err(anyhow!("model.output_limit_bytes must be > 0"));
        }
        if self.sandbox.compose_command.is_empty() || self.sandbox.compose_command[0].trim().is_empty() {
            return Err(anyhow!("sandbox.compose_command must be a non-empty array"));
        }
        if self.sandbox.build_timeout_secs == 0 || self.sandbox.run_timeout_secs == 0 {
            return Err(anyhow!("sandbox timeouts must be > 0"));
        }
        if self.sandbox.log_limit_bytes == 0 {
            return Err(anyhow!("sandbox.log_limit_bytes must be > 0"));
        }
        if self.controller.prompt_budget_bytes == 0 {
            return Err(anyhow!("controller.prompt_budget_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OptiloopConfig::default()`.
pub fn load_config(path: &Path) -> Result<OptiloopConfig> {
    if !path.exists() {
        let cfg = OptiloopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OptiloopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OptiloopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
