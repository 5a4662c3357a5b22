//! Subprocess execution.
//!
//! Tasks never spawn processes directly; they describe a [`CommandSpec`]
//! and hand it to a [`ProcessRunner`]. The tokio-backed runner is used in
//! production and a recording runner in tests.

use futures::future::{join_all, BoxFuture};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A command to run: program, arguments, working directory, extra
/// environment and an optional timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Looks up an environment override by key.
    #[cfg(test)]
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The command line as a single string, for logs and errors.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command `{command}` failed ({})", describe_exit(.code))]
    Failed {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Failed to wait for `{command}`")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command `{command}` timed out after {timeout:?}")]
    TimedOut {
        command: String,
        timeout: Duration,
        stdout: String,
        stderr: String,
    },
}

impl ProcessError {
    /// Output captured before the failure, as `(stdout, stderr)`.
    pub fn captured_output(&self) -> Option<(&str, &str)> {
        match self {
            ProcessError::Failed { stdout, stderr, .. }
            | ProcessError::TimedOut { stdout, stderr, .. } => Some((stdout, stderr)),
            _ => None,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// Something that can run a [`CommandSpec`] to completion.
pub trait ProcessRunner: Send + Sync {
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> BoxFuture<'a, Result<ProcessOutput, ProcessError>>;
}

/// Run `spec` and turn a non-zero exit into [`ProcessError::Failed`].
pub async fn run_checked(
    runner: &dyn ProcessRunner,
    spec: &CommandSpec,
) -> Result<ProcessOutput, ProcessError> {
    let output = runner.run(spec).await?;

    if output.success() {
        Ok(output)
    } else {
        Err(ProcessError::Failed {
            command: spec.command_line(),
            code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Runs commands with `tokio::process`. The child is killed if its timeout
/// expires.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

impl ProcessRunner for TokioProcessRunner {
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> BoxFuture<'a, Result<ProcessOutput, ProcessError>> {
        Box::pin(spawn_and_wait(spec))
    }
}

async fn spawn_and_wait(spec: &CommandSpec) -> Result<ProcessOutput, ProcessError> {
    let command_line = spec.command_line();
    debug!("Running: {}", command_line);

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(ref cwd) = spec.cwd {
        command.current_dir(cwd);
    }

    let start = Instant::now();
    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        command: command_line.clone(),
        source,
    })?;

    let stdout = Captured::default();
    let stderr = Captured::default();
    let mut readers = [
        drain(child.stdout.take(), stdout.clone()),
        drain(child.stderr.take(), stderr.clone()),
    ];

    let waited = match spec.timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
        None => Some(child.wait().await),
    };

    let Some(status) = waited else {
        let limit = spec.timeout.unwrap_or_default();
        if let Err(e) = child.kill().await {
            warn!("Failed to kill `{}`: {}", command_line, e);
        }
        // a grandchild may still hold the pipes open
        let _ = tokio::time::timeout(DRAIN_GRACE, join_all(readers.iter_mut())).await;
        for reader in &readers {
            reader.abort();
        }
        return Err(ProcessError::TimedOut {
            command: command_line,
            timeout: limit,
            stdout: captured_text(&stdout),
            stderr: captured_text(&stderr),
        });
    };

    let status = status.map_err(|source| ProcessError::Wait {
        command: command_line.clone(),
        source,
    })?;
    join_all(readers).await;

    let elapsed = start.elapsed();
    debug!("`{}` finished in {:.2}s", command_line, elapsed.as_secs_f64());

    Ok(ProcessOutput {
        code: status.code(),
        stdout: captured_text(&stdout),
        stderr: captured_text(&stderr),
        elapsed,
    })
}

/// Bytes read so far from one of the child's pipes.
type Captured = Arc<Mutex<Vec<u8>>>;

/// How long to keep reading pipes after a timed-out child was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Copy `reader` into `sink` chunk by chunk, so a partial read is visible
/// even if the task is aborted.
fn drain<R>(reader: Option<R>, sink: Captured) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut reader) = reader else {
            return;
        };
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]),
            }
        }
    })
}

fn captured_text(captured: &Captured) -> String {
    let bytes = captured.lock().unwrap_or_else(PoisonError::into_inner);
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
pub mod testing {
    //! A [`ProcessRunner`] that records commands instead of running them.

    use super::*;
    use std::sync::Mutex;

    type Responder = Box<dyn Fn(&CommandSpec) -> Result<ProcessOutput, ProcessError> + Send + Sync>;

    pub struct RecordingRunner {
        calls: Mutex<Vec<CommandSpec>>,
        responder: Responder,
    }

    impl RecordingRunner {
        /// Every command succeeds with empty output.
        pub fn succeeding() -> Self {
            Self::with(|_| {
                Ok(ProcessOutput {
                    code: Some(0),
                    ..Default::default()
                })
            })
        }

        pub fn with<F>(responder: F) -> Self
        where
            F: Fn(&CommandSpec) -> Result<ProcessOutput, ProcessError> + Send + Sync + 'static,
        {
            Self {
                calls: Mutex::new(Vec::new()),
                responder: Box::new(responder),
            }
        }

        pub fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ProcessRunner for RecordingRunner {
        fn run<'a>(
            &'a self,
            spec: &'a CommandSpec,
        ) -> BoxFuture<'a, Result<ProcessOutput, ProcessError>> {
            self.calls.lock().unwrap().push(spec.clone());
            let result = (self.responder)(spec);
            Box::pin(async move { result })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingRunner;
    use super::*;

    #[test]
    fn test_command_line() {
        let spec = CommandSpec::new("coverage")
            .args(["html", "--title", "Code Coverage"])
            .env("COVERAGE_FILE", "/tmp/c.dat");
        assert_eq!(spec.command_line(), "coverage html --title Code Coverage");
        assert_eq!(spec.env_value("COVERAGE_FILE"), Some("/tmp/c.dat"));
        assert_eq!(spec.env_value("HOME"), None);
    }

    #[tokio::test]
    async fn test_run_checked_maps_nonzero_exit() {
        let runner = RecordingRunner::with(|_| {
            Ok(ProcessOutput {
                code: Some(3),
                stdout: "out".to_string(),
                stderr: "err".to_string(),
                ..Default::default()
            })
        });

        let err = run_checked(&runner, &CommandSpec::new("flow_tests"))
            .await
            .unwrap_err();

        assert_eq!(err.captured_output(), Some(("out", "err")));
        assert!(err.to_string().contains("exit code 3"));
    }

    #[tokio::test]
    async fn test_run_checked_passes_success_through() {
        let runner = RecordingRunner::succeeding();
        let output = run_checked(&runner, &CommandSpec::new("true")).await.unwrap();
        assert!(output.success());
        assert_eq!(runner.calls().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tokio_runner_captures_output() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo hello; echo oops >&2; exit 2"])
            .env("CI_BUNDLE_TEST", "1");

        let output = TokioProcessRunner.run(&spec).await.unwrap();

        assert_eq!(output.code, Some(2));
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tokio_runner_times_out() {
        let spec = CommandSpec::new("sleep")
            .arg("5")
            .timeout(Duration::from_millis(100));

        let err = TokioProcessRunner.run(&spec).await.unwrap_err();

        assert!(matches!(err, ProcessError::TimedOut { .. }));
        assert!(err.to_string().ends_with("timed out after 100ms"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_keeps_output_printed_so_far() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo partial-progress; echo warming-up >&2; sleep 5"])
            .timeout(Duration::from_millis(500));

        let started = Instant::now();
        let err = run_checked(&TokioProcessRunner, &spec).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(4));
        let (stdout, stderr) = err.captured_output().unwrap();
        assert_eq!(stdout.trim(), "partial-progress");
        assert_eq!(stderr.trim(), "warming-up");
    }

    #[tokio::test]
    async fn test_tokio_runner_reports_spawn_failure() {
        let spec = CommandSpec::new("definitely-not-a-real-program-ci-bundle");
        let err = TokioProcessRunner.run(&spec).await.unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
