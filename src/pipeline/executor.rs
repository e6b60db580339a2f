use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::error::{Result, StagegateError};

/// One command to run on behalf of a stage.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub command: String,
    pub env: IndexMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

/// Result of a command that was started.
#[derive(Debug, Clone, Default)]
pub struct CommandOutcome {
    /// `None` when the process was killed by a signal or timed out
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Runs stage commands. The runner is generic over this so tests can script
/// outcomes without spawning processes.
pub trait Executor {
    fn execute(&self, spec: &CommandSpec) -> impl Future<Output = Result<CommandOutcome>> + Send;
}

/// Executes commands through a local shell, `sh -c` by default.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    pub shell: String,
    pub shell_args: Vec<String>,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            shell_args: vec!["-c".to_string()],
        }
    }
}

impl ShellExecutor {
    pub fn new(shell: String, shell_args: Vec<String>) -> Self {
        Self { shell, shell_args }
    }
}

/// Output read from a child stream so far.
type Captured = Arc<Mutex<Vec<u8>>>;

/// How long readers may keep draining after a timed-out child is killed.
/// Grandchildren can hold the pipes open past that.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Reads `stream` to the end in a background task, appending chunks to a
/// shared buffer so a partial read survives an aborted task.
fn capture<R>(stream: Option<R>) -> (Captured, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer: Captured = Arc::default();
    let sink = Arc::clone(&buffer);

    let reader = tokio::spawn(async move {
        let Some(mut stream) = stream else {
            return;
        };
        let mut chunk = [0u8; 8192];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut out) = sink.lock() {
                        out.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    });

    (buffer, reader)
}

fn captured_text(buffer: &Captured) -> String {
    buffer
        .lock()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

impl Executor for ShellExecutor {
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutcome> {
        let mut cmd = Command::new(&self.shell);
        cmd.args(&self.shell_args)
            .arg(&spec.command)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            StagegateError::Execution(format!("failed to spawn '{}': {e}", self.shell))
        })?;

        let (stdout, mut stdout_reader) = capture(child.stdout.take());
        let (stderr, mut stderr_reader) = capture(child.stderr.take());

        let Some(limit) = spec.timeout else {
            let status = child.wait().await?;
            let _ = tokio::join!(stdout_reader, stderr_reader);
            return Ok(CommandOutcome {
                exit_code: status.code(),
                stdout: captured_text(&stdout),
                stderr: captured_text(&stderr),
                duration: started.elapsed(),
                timed_out: false,
            });
        };

        if let Ok(status) = tokio::time::timeout(limit, child.wait()).await {
            let status = status?;
            let _ = tokio::join!(stdout_reader, stderr_reader);
            return Ok(CommandOutcome {
                exit_code: status.code(),
                stdout: captured_text(&stdout),
                stderr: captured_text(&stderr),
                duration: started.elapsed(),
                timed_out: false,
            });
        }

        debug!("Command timed out after {limit:?}, killing it");
        if let Err(e) = child.kill().await {
            warn!("Failed to kill timed-out command: {e}");
        }

        let _ = tokio::time::timeout(DRAIN_GRACE, async {
            let _ = tokio::join!(&mut stdout_reader, &mut stderr_reader);
        })
        .await;
        stdout_reader.abort();
        stderr_reader.abort();

        let mut stderr = captured_text(&stderr);
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!("command timed out after {limit:?}"));

        Ok(CommandOutcome {
            exit_code: None,
            stdout: captured_text(&stdout),
            stderr,
            duration: started.elapsed(),
            timed_out: true,
        })
    }
}
