//! Local subprocess runner - runs a step's command on this machine

use crate::core::Step;
use crate::runner::{OutputCallback, OutputStream, RunLimits, RunOutcome, StepEnvironment, StepRunner};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Variables passed through from the parent when the environment is not inherited
const PASSTHROUGH_VARS: &[&str] = &["PATH", "HOME", "TMPDIR", "LANG"];

/// How long output is still read after the command itself has exited
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Settings for [`ProcessRunner`]
#[derive(Debug, Clone)]
pub struct ProcessRunnerConfig {
    /// Directory steps run in; a step's `dir` is resolved against it
    pub workspace: PathBuf,

    /// Inherit the whole parent environment instead of a minimal set
    pub inherit_env: bool,
}

impl Default for ProcessRunnerConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            inherit_env: false,
        }
    }
}

/// Runner that spawns each step as a child process
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    config: ProcessRunnerConfig,
}

enum Finish {
    Exited(std::io::Result<ExitStatus>),
    Deadline,
    Cancelled,
}

impl ProcessRunner {
    pub fn new(config: ProcessRunnerConfig) -> Self {
        Self { config }
    }

    pub fn with_workspace(workspace: impl Into<PathBuf>) -> Self {
        Self::new(ProcessRunnerConfig {
            workspace: workspace.into(),
            ..Default::default()
        })
    }

    pub fn workspace(&self) -> &Path {
        &self.config.workspace
    }

    fn working_dir(&self, step: &Step) -> PathBuf {
        match &step.dir {
            Some(dir) => self.config.workspace.join(dir),
            None => self.config.workspace.clone(),
        }
    }

    fn command(&self, step: &Step, env: &StepEnvironment) -> Command {
        let (program, args) = step.command();
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(self.working_dir(step))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        if !self.config.inherit_env {
            command.env_clear();
            for name in PASSTHROUGH_VARS {
                if let Ok(value) = std::env::var(name) {
                    command.env(name, value);
                }
            }
        }
        command.envs(env.vars());
        command
    }
}

/// One output pipe read as lines of lossy UTF-8
///
/// Invalid bytes never stop the reader, so the pipe keeps draining and the
/// child cannot block on a full buffer.
struct LineReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    open: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
            open: true,
        }
    }

    /// Next line without its terminator, `None` once the pipe is closed.
    ///
    /// Cancel safe: bytes read by an interrupted call stay in `pending`.
    async fn next_line(&mut self) -> Option<String> {
        match self.reader.read_until(b'\n', &mut self.pending).await {
            Ok(0) if self.pending.is_empty() => {
                self.open = false;
                None
            }
            Ok(_) => {
                if self.pending.last() == Some(&b'\n') {
                    self.pending.pop();
                    if self.pending.last() == Some(&b'\r') {
                        self.pending.pop();
                    }
                }
                let line = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                Some(line)
            }
            Err(e) => {
                debug!("Output pipe closed: {}", e);
                self.open = false;
                None
            }
        }
    }
}

fn record_line(
    output: &mut String,
    callback: &dyn OutputCallback,
    step_id: &str,
    stream: OutputStream,
    line: &str,
) {
    output.push_str(line);
    output.push('\n');
    callback.on_line(step_id, stream, line);
}

#[async_trait]
impl StepRunner for ProcessRunner {
    async fn run(
        &self,
        step: &Step,
        env: &StepEnvironment,
        limits: RunLimits,
        callback: &dyn OutputCallback,
    ) -> RunOutcome {
        debug!(
            "Spawning step {}: {} (env: {:?})",
            step.id,
            step.display_command(),
            env.plain_names()
        );

        let mut child = match self.command(step, env).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to launch step {}: {}", step.id, e);
                return RunOutcome::LaunchFailed {
                    message: format!("failed to launch '{}': {}", step.command().0, e),
                };
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return RunOutcome::LaunchFailed {
                message: "child process has no output pipes".to_string(),
            };
        };
        // The child leads its own process group; remember it for cleanup
        let process_group = child.id();
        let mut stdout = LineReader::new(stdout);
        let mut stderr = LineReader::new(stderr);
        let mut output = String::new();
        let mut exit: Option<std::io::Result<ExitStatus>> = None;

        let deadline = tokio::time::sleep_until(limits.deadline);
        tokio::pin!(deadline);

        let finish = loop {
            if !stdout.open && !stderr.open {
                if let Some(status) = exit.take() {
                    break Finish::Exited(status);
                }
            }

            tokio::select! {
                line = stdout.next_line(), if stdout.open => if let Some(line) = line {
                    record_line(&mut output, callback, &step.id, OutputStream::Stdout, &line);
                },
                line = stderr.next_line(), if stderr.open => if let Some(line) = line {
                    record_line(&mut output, callback, &step.id, OutputStream::Stderr, &line);
                },
                status = child.wait(), if exit.is_none() => {
                    // Background processes may still hold the pipes; drain them only briefly
                    let drain_until = (Instant::now() + OUTPUT_DRAIN_GRACE).min(limits.deadline);
                    deadline.as_mut().reset(drain_until);
                    exit = Some(status);
                }
                _ = &mut deadline => match exit.take() {
                    Some(status) => {
                        debug!("Step {} left its output pipes open after exiting", step.id);
                        break Finish::Exited(status);
                    }
                    None => break Finish::Deadline,
                },
                _ = limits.cancel.cancelled(), if exit.is_none() => break Finish::Cancelled,
            }
        };

        match finish {
            Finish::Exited(Ok(status)) => {
                // Nothing the step started in the background outlives it
                kill_process_group(process_group);
                // Killed by a signal: no code, report as generic failure
                let code = status.code().unwrap_or(-1);
                debug!("Step {} exited with code {}", step.id, code);
                RunOutcome::Exited { code, output }
            }
            Finish::Exited(Err(e)) => {
                kill_process_group(process_group);
                RunOutcome::LaunchFailed {
                    message: format!("failed to wait for '{}': {}", step.command().0, e),
                }
            }
            Finish::Deadline => {
                warn!("Step {} exceeded its {:?} budget, killing", step.id, limits.budget);
                kill_process_group(process_group);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill step {}: {}", step.id, e);
                }
                RunOutcome::TimedOut { output }
            }
            Finish::Cancelled => {
                debug!("Step {} cancelled, killing", step.id);
                kill_process_group(process_group);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill step {}: {}", step.id, e);
                }
                RunOutcome::Cancelled { output }
            }
        }
    }
}

/// SIGKILL every process left in a step's process group
#[cfg(unix)]
fn kill_process_group(process_group: Option<u32>) {
    let Some(pgid) = process_group.and_then(|id| libc::pid_t::try_from(id).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; an empty group fails with ESRCH
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        debug!(
            "No processes left in group {}: {}",
            pgid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_process_group: Option<u32>) {}
