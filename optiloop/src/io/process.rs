//! Helpers for running child processes with timeouts.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output with separate streams.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn truncated_notice(&self, label: &str) -> String {
        let mut buf = String::new();
        if self.stdout_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        if self.stderr_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        buf
    }
}

/// Captured child process output with stdout and stderr interleaved.
#[derive(Debug)]
pub struct MergedOutput {
    pub status: ExitStatus,
    /// Lines from both streams in arrival order.
    pub text: String,
    pub timed_out: bool,
}

impl MergedOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.success()
    }
}

/// Run a command with a timeout, optionally feeding stdin and tee-ing stdout
/// lines to `stream_path` as they arrive.
///
/// Output is read concurrently while the child runs. `output_limit_bytes`
/// bounds the stdout/stderr kept in memory; bytes beyond it are discarded
/// while the pipe keeps draining.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes, streaming = stream_path.is_some()))]
pub fn run_command_with_stream(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    stream_path: Option<&Path>,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
        // Dropping closes the pipe so the child sees EOF.
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let tee = match stream_path {
        Some(path) => Some(create_tee(path)?),
        None => None,
    };

    let stdout_handle =
        thread::spawn(move || read_lines_limited(stdout, output_limit_bytes, tee));
    let stderr_handle = thread::spawn(move || read_lines_limited(stderr, output_limit_bytes, None));

    let (status, timed_out) = wait_or_kill(&mut child, timeout)?;

    let (stdout, stdout_truncated) = join_reader(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_reader(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Run a command with a timeout, collecting stdout and stderr as one
/// append-only text stream.
///
/// Every line is also appended to `log_path` as it arrives (bounded by
/// `log_limit_bytes`); the in-memory text is kept whole.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), log = %log_path.display()))]
pub fn run_command_merged(
    mut cmd: Command,
    timeout: Duration,
    log_path: &Path,
    log_limit_bytes: usize,
) -> Result<MergedOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (tx, rx) = mpsc::channel::<String>();
    let stdout_tx = tx.clone();
    let stdout_handle = thread::spawn(move || forward_lines(stdout, stdout_tx));
    let stderr_handle = thread::spawn(move || forward_lines(stderr, tx));

    let mut log = create_tee(log_path)?;
    let collector = thread::spawn(move || -> String {
        let mut text = String::new();
        let mut logged = 0usize;
        for line in rx {
            if logged < log_limit_bytes {
                let keep = line.len().min(log_limit_bytes - logged);
                if let Err(e) = log
                    .write_all(&line.as_bytes()[..keep])
                    .and_then(|()| log.flush())
                {
                    warn!(err = %e, "failed to write sandbox log");
                }
                logged += keep;
            }
            text.push_str(&line);
        }
        text
    });

    let (status, timed_out) = wait_or_kill(&mut child, timeout)?;

    join_forwarder(stdout_handle).context("join stdout")?;
    join_forwarder(stderr_handle).context("join stderr")?;
    let text = collector
        .join()
        .map_err(|_| anyhow!("output collector thread panicked"))?;

    debug!(exit_code = ?status.code(), timed_out, bytes = text.len(), "command finished");
    Ok(MergedOutput {
        status,
        text,
        timed_out,
    })
}

fn wait_or_kill(child: &mut std::process::Child, timeout: Duration) -> Result<(ExitStatus, bool)> {
    match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => Ok((status, false)),
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            child.kill().context("kill command")?;
            let status = child.wait().context("wait command after kill")?;
            Ok((status, true))
        }
    }
}

fn create_tee(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("create log file {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn join_forwarder(handle: thread::JoinHandle<Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output forwarder thread panicked")),
    }
}

/// Read a stream line by line, keeping at most `limit` bytes and tee-ing
/// every line to `tee` when provided.
fn read_lines_limited<R: Read>(
    reader: R,
    limit: usize,
    mut tee: Option<BufWriter<File>>,
) -> Result<(Vec<u8>, usize)> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        if let Some(writer) = tee.as_mut()
            && let Err(e) = writer.write_all(&line).and_then(|()| writer.flush())
        {
            warn!(err = %e, "failed to write stream file");
        }

        let remaining = limit.saturating_sub(collected.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            collected.extend_from_slice(&line[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((collected, truncated))
}

fn forward_lines<R: Read>(reader: R, tx: mpsc::Sender<String>) -> Result<()> {
    let mut buf_reader = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            return Ok(());
        }
        // The collector only disappears after both forwarders finish.
        if tx.send(String::from_utf8_lossy(&line).into_owned()).is_err() {
            return Ok(());
        }
    }
}
