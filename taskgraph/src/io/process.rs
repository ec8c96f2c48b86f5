//! Helpers for running child processes with timeouts and bounded output.

use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Lines of stderr kept when summarizing a failed command.
const STDERR_TAIL_LINES: usize = 20;

/// Captured child process output.
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
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn stdout_truncated_notice(&self, label: &str) -> String {
        if self.stdout_truncated > 0 {
            format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            )
        } else {
            String::new()
        }
    }

    /// One-paragraph description of why the command did not succeed.
    ///
    /// Includes the last lines of stderr (falling back to stdout) so a
    /// classifier can see the traceback.
    pub fn failure_summary(&self, label: &str) -> String {
        let head = if self.timed_out {
            format!("{label} timed out")
        } else {
            match self.status.code() {
                Some(code) => format!("{label} exited with status {code}"),
                None => format!("{label} was terminated by a signal"),
            }
        };
        let stderr = self.stderr_text();
        let detail = if stderr.trim().is_empty() {
            self.stdout_text()
        } else {
            stderr
        };
        let tail = tail_lines(&detail, STDERR_TAIL_LINES);
        if tail.is_empty() {
            head
        } else {
            format!("{head}: {tail}")
        }
    }
}

/// Last `max_lines` non-empty lines of `text`, joined with newlines.
pub fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

/// Build a command that runs `script` through the configured shell
/// (e.g. `["sh", "-c"]`), optionally inside `cwd`.
pub fn shell_command(shell: &[String], script: &str, cwd: Option<&Path>) -> Result<Command> {
    let (program, args) = shell
        .split_first()
        .ok_or_else(|| anyhow!("shell must be a non-empty array"))?;
    let mut cmd = Command::new(program);
    cmd.args(args).arg(script);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    Ok(cmd)
}

/// Bytes kept from one output stream, plus the count dropped past the limit.
struct Capture {
    kept: Vec<u8>,
    dropped: usize,
}

/// Run `cmd` under a wall-clock budget and capture its output.
///
/// `label` names the process in logs, reader threads and error context (e.g.
/// ``command `ls` `` or `oracle command`). Both pipes are drained on their own
/// threads before any stdin is written, so a chatty child cannot stall on a
/// full pipe. At most `output_limit_bytes` of each stream are kept. On timeout
/// the child is killed and reaped and `timed_out` is set.
#[instrument(skip_all, fields(label = %label, timeout_secs = timeout.as_secs()))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    label: &str,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    debug!(label, program = ?cmd.get_program(), "spawning");
    let mut child = cmd
        .spawn()
        .inspect_err(|err| error!(label, err = %err, "spawn failed"))
        .with_context(|| format!("spawn {label}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("{label}: stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("{label}: stderr was not piped"))?;
    let stdout = drain(format!("{label} stdout"), stdout, output_limit_bytes)?;
    let stderr = drain(format!("{label} stderr"), stderr, output_limit_bytes)?;

    if let Some(input) = stdin {
        let mut pipe = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("{label}: stdin was not piped"))?;
        pipe.write_all(input)
            .with_context(|| format!("write stdin of {label}"))?;
    }

    let (status, timed_out) = match child
        .wait_timeout(timeout)
        .with_context(|| format!("wait for {label}"))?
    {
        Some(status) => (status, false),
        None => {
            warn!(label, timeout_secs = timeout.as_secs(), "timed out, killing");
            child.kill().with_context(|| format!("kill {label}"))?;
            let status = child.wait().with_context(|| format!("reap {label}"))?;
            (status, true)
        }
    };

    let stdout = collect(label, "stdout", stdout)?;
    let stderr = collect(label, "stderr", stderr)?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            label,
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "output truncated"
        );
    }

    debug!(label, exit_code = ?status.code(), timed_out, "finished");
    Ok(CommandOutput {
        status,
        stdout: stdout.kept,
        stderr: stderr.kept,
        stdout_truncated: stdout.dropped,
        stderr_truncated: stderr.dropped,
        timed_out,
    })
}

/// Run a command and turn non-zero exit or timeout into an error.
///
/// Used by handlers and the verifier, where a failed process is a fault.
pub fn run_checked(
    cmd: Command,
    label: &str,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    let output = run_command_with_timeout(cmd, label, None, timeout, output_limit_bytes)?;
    if !output.success() {
        return Err(anyhow!(output.failure_summary(label)));
    }
    Ok(output)
}

fn drain<R: Read + Send + 'static>(
    name: String,
    reader: R,
    limit: usize,
) -> Result<thread::JoinHandle<Result<Capture>>> {
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || capture(reader, limit))
        .with_context(|| format!("start reader for {name}"))
}

fn capture<R: Read>(mut reader: R, limit: usize) -> Result<Capture> {
    let mut captured = Capture {
        kept: Vec::new(),
        dropped: 0,
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(captured);
        }
        let room = limit.saturating_sub(captured.kept.len()).min(n);
        captured.kept.extend_from_slice(&chunk[..room]);
        captured.dropped += n - room;
    }
}

fn collect(
    label: &str,
    stream: &str,
    handle: thread::JoinHandle<Result<Capture>>,
) -> Result<Capture> {
    handle
        .join()
        .map_err(|_| anyhow!("{label}: {stream} reader panicked"))?
        .with_context(|| format!("read {stream} of {label}"))
}
