//! Container sandbox bridge.
//!
//! A sandbox attempt is build, then run, then teardown. Teardown always
//! runs and its failures are only logged. Build and run failures are not
//! errors here: they come back as an [`ExecutionFailure`] the controller
//! routes to the fix step. `Err` is reserved for the sandbox tooling itself
//! being unusable (e.g. the compose binary cannot be spawned).

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::excerpt::run_failure_excerpt;
use crate::core::types::{ExecutionFailure, SandboxPhase};
use crate::io::config::SandboxConfig;
use crate::io::process::run_command_merged;
use crate::io::workspace::{COMPOSE_FILE, Session};

/// Service name the generated compose file must declare.
pub const SERVICE_NAME: &str = "solver";

/// Combined output of one sandbox phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseOutput {
    pub output: String,
    pub succeeded: bool,
    pub timed_out: bool,
}

/// Abstraction over sandbox backends.
pub trait Sandbox {
    fn build(&self, workspace: &Path, log_path: &Path) -> Result<PhaseOutput>;
    fn run(&self, workspace: &Path, log_path: &Path) -> Result<PhaseOutput>;
    fn teardown(&self, workspace: &Path) -> Result<()>;
}

impl<S: Sandbox + ?Sized> Sandbox for &S {
    fn build(&self, workspace: &Path, log_path: &Path) -> Result<PhaseOutput> {
        (**self).build(workspace, log_path)
    }

    fn run(&self, workspace: &Path, log_path: &Path) -> Result<PhaseOutput> {
        (**self).run(workspace, log_path)
    }

    fn teardown(&self, workspace: &Path) -> Result<()> {
        (**self).teardown(workspace)
    }
}

/// What one sandbox attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxReport {
    /// Output of the last phase that ran.
    pub output: String,
    pub failure: Option<ExecutionFailure>,
}

impl SandboxReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Build, run, and tear down the session workspace.
#[instrument(skip_all, fields(session = %session.id))]
pub fn execute_in_sandbox<S: Sandbox + ?Sized>(
    sandbox: &S,
    session: &Session,
) -> Result<SandboxReport> {
    let workspace = session.workspace_dir();
    let result = build_and_run(sandbox, session, &workspace);
    if let Err(err) = sandbox.teardown(&workspace) {
        warn!(err = %format!("{err:#}"), "sandbox teardown failed");
    }
    result
}

fn build_and_run<S: Sandbox + ?Sized>(
    sandbox: &S,
    session: &Session,
    workspace: &Path,
) -> Result<SandboxReport> {
    let build = sandbox
        .build(workspace, &session.sandbox_log(SandboxPhase::Build))
        .context("sandbox build")?;
    if !build.succeeded {
        info!(timed_out = build.timed_out, "sandbox build failed");
        let original_error = with_timeout_note(build.output.clone(), build.timed_out);
        return Ok(SandboxReport {
            output: build.output,
            failure: Some(ExecutionFailure {
                phase: SandboxPhase::Build,
                original_error,
            }),
        });
    }

    let run = sandbox
        .run(workspace, &session.sandbox_log(SandboxPhase::Run))
        .context("sandbox run")?;
    if !run.succeeded {
        info!(timed_out = run.timed_out, "sandbox run failed");
        let original_error = with_timeout_note(run_failure_excerpt(&run.output), run.timed_out);
        return Ok(SandboxReport {
            output: run.output,
            failure: Some(ExecutionFailure {
                phase: SandboxPhase::Run,
                original_error,
            }),
        });
    }

    debug!(bytes = run.output.len(), "sandbox run succeeded");
    Ok(SandboxReport {
        output: run.output,
        failure: None,
    })
}

fn with_timeout_note(mut text: String, timed_out: bool) -> String {
    if timed_out {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str("[timed out: the process was killed]");
    }
    text
}

/// Sandbox driven through `docker compose`.
#[derive(Debug, Clone)]
pub struct ComposeSandbox {
    config: SandboxConfig,
    project: String,
}

impl ComposeSandbox {
    /// `project` names the compose project; sessions use their id.
    pub fn new(config: SandboxConfig, project: &str) -> Self {
        let project = format!("optiloop-{}", project.to_lowercase());
        Self { config, project }
    }

    fn compose(&self, workspace: &Path) -> Result<Command> {
        let (program, prefix) = self
            .config
            .compose_command
            .split_first()
            .ok_or_else(|| anyhow!("sandbox.compose_command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(prefix)
            .arg("-f")
            .arg(COMPOSE_FILE)
            .arg("-p")
            .arg(&self.project)
            .current_dir(workspace);
        Ok(cmd)
    }

    fn phase(&self, cmd: Command, timeout_secs: u64, log_path: &Path) -> Result<PhaseOutput> {
        let output = run_command_merged(
            cmd,
            Duration::from_secs(timeout_secs),
            log_path,
            self.config.log_limit_bytes,
        )?;
        Ok(PhaseOutput {
            succeeded: output.succeeded(),
            timed_out: output.timed_out,
            output: output.text,
        })
    }
}

impl Sandbox for ComposeSandbox {
    #[instrument(skip_all, fields(project = %self.project))]
    fn build(&self, workspace: &Path, log_path: &Path) -> Result<PhaseOutput> {
        let mut cmd = self.compose(workspace)?;
        cmd.arg("build");
        self.phase(cmd, self.config.build_timeout_secs, log_path)
    }

    #[instrument(skip_all, fields(project = %self.project))]
    fn run(&self, workspace: &Path, log_path: &Path) -> Result<PhaseOutput> {
        let mut cmd = self.compose(workspace)?;
        cmd.args(["up", "--abort-on-container-exit", "--exit-code-from", SERVICE_NAME]);
        self.phase(cmd, self.config.run_timeout_secs, log_path)
    }

    /// `compose down`, then the prune command. Prune runs even when `down`
    /// fails; both failures are reported together.
    #[instrument(skip_all, fields(project = %self.project))]
    fn teardown(&self, workspace: &Path) -> Result<()> {
        let mut failures = Vec::new();

        let mut cmd = self.compose(workspace)?;
        cmd.args(["down", "--rmi", "local", "--volumes", "--remove-orphans"]);
        if let Err(err) = quiet_status(cmd, "compose down") {
            failures.push(format!("{err:#}"));
        }

        if let Some((program, args)) = self.config.prune_command.split_first() {
            let mut cmd = Command::new(program);
            cmd.args(args).current_dir(workspace);
            if let Err(err) = quiet_status(cmd, program) {
                failures.push(format!("{err:#}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("sandbox teardown: {}", failures.join("; ")))
        }
    }
}

fn quiet_status(mut cmd: Command, label: &str) -> Result<()> {
    let status = cmd
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .with_context(|| format!("spawn {label}"))?;
    if !status.success() {
        return Err(anyhow!("{label} failed with status {:?}", status.code()));
    }
    Ok(())
}
