//! External command stages and their execution.
//!
//! Every interaction with `git`, the OTP build scripts, `patch` and `brew`
//! goes through [`StageRunner::execute`]. The working directory is always
//! passed explicitly; nothing here changes the process-wide current directory.
//!
//! On unix each stage leads its own process group. Cancelling a stage kills
//! the whole group, so `make -jN` workers and their children stop together
//! with the stage, and the runner reaps the child before returning.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Number of stderr lines kept in failure details.
const STDERR_TAIL_LINES: usize = 20;

/// One external command invocation.
#[derive(Debug, Clone)]
pub struct StageCommand {
    /// Human-readable stage name (`configure`, `git checkout`, ...).
    pub name: String,

    /// Program followed by its arguments.
    pub command: Vec<String>,

    /// Working directory for the child.
    pub cwd: PathBuf,

    /// Bytes written to the child's stdin, if any.
    pub stdin: Option<String>,

    /// Extra environment variables.
    pub env: Vec<(String, String)>,

    /// Kills the stage's process group when cancelled.
    pub cancel: Option<CancellationToken>,
}

impl StageCommand {
    pub fn new<I, S>(name: &str, cwd: &Path, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            command: command.into_iter().map(Into::into).collect(),
            cwd: cwd.to_path_buf(),
            stdin: None,
            env: Vec::new(),
            cancel: None,
        }
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_cancellation(mut self, cancel: &CancellationToken) -> Self {
        self.cancel = Some(cancel.clone());
        self
    }
}

/// Result of a stage execution.
#[derive(Debug, Clone)]
pub struct StageOutput {
    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub success: bool,
}

impl StageOutput {
    /// Whether this stage passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// One-line failure description with the tail of stderr.
    pub fn failure_detail(&self) -> String {
        let lines: Vec<&str> = self.stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
        if tail.is_empty() {
            format!("exited with code {}", self.exit_code)
        } else {
            format!("exited with code {}: {}", self.exit_code, tail)
        }
    }
}

/// Runs [`StageCommand`]s as child processes.
pub struct StageRunner;

impl StageRunner {
    /// Execute a single stage and return its output.
    ///
    /// Errors when the child cannot be spawned or fed, and with
    /// [`std::io::ErrorKind::Interrupted`] when the stage's cancellation
    /// token fires. In that case the process group is already dead and
    /// reaped. A non-zero exit is reported through [`StageOutput::passed`].
    pub async fn execute(stage: &StageCommand) -> std::io::Result<StageOutput> {
        let start = Instant::now();

        let (exe, args) = stage.command.split_first().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("stage {} has empty command", stage.name),
            )
        })?;

        debug!(stage = %stage.name, command = ?stage.command, cwd = %stage.cwd.display(), "Spawning stage");

        let mut command = Command::new(exe);
        command
            .args(args)
            .current_dir(&stage.cwd)
            .envs(stage.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if stage.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command.spawn()?;

        if let Some(input) = &stage.stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes()).await?;
                pipe.shutdown().await?;
            }
        }

        let stdout = tokio::spawn(read_all(child.stdout.take()));
        let stderr = tokio::spawn(read_all(child.stderr.take()));

        let status = match &stage.cancel {
            Some(cancel) => tokio::select! {
                status = child.wait() => Some(status?),
                _ = cancel.cancelled() => None,
            },
            None => Some(child.wait().await?),
        };

        let Some(status) = status else {
            warn!(stage = %stage.name, "Stage cancelled, killing its process group");
            terminate(&mut child).await?;
            stdout.abort();
            stderr.abort();
            return Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                format!("stage {} was cancelled", stage.name),
            ));
        };

        let stdout = stdout.await.map_err(std::io::Error::other)??;
        let stderr = stderr.await.map_err(std::io::Error::other)??;

        Ok(StageOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
            success: status.success(),
        })
    }
}

async fn read_all<R>(pipe: Option<R>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Kill the child's process group and wait for the child to exit.
#[cfg(unix)]
async fn terminate(child: &mut Child) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(errno) => return Err(errno.into()),
        }
    }
    child.wait().await.map(|_| ())
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child) -> std::io::Result<()> {
    child.kill().await
}
