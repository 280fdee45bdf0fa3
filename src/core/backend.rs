//! Search backends
//!
//! The dispatcher only sees [`SearchBackend`]. The default implementation
//! shells out to a worker process (by default this binary's `search`
//! subcommand) once per call, with a hard wall-clock limit.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use crate::core::config::EffectiveConfig;

/// How long a timed-out worker gets between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("failed to launch search backend `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("search backend timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("failed to collect search backend output: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured output of one worker run.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchInvocation {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl SearchInvocation {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    /// Text for the MCP content block: stdout on success, otherwise stderr,
    /// falling back to stdout when stderr is empty.
    pub fn text(&self) -> String {
        if self.succeeded() {
            return self.stdout.clone();
        }
        if !self.stderr.is_empty() {
            self.stderr.clone()
        } else if !self.stdout.is_empty() {
            self.stdout.clone()
        } else {
            format!("search backend exited with status {}", self.exit_code)
        }
    }
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn invoke(
        &self,
        query: &str,
        config: EffectiveConfig,
    ) -> Result<SearchInvocation, InvocationError>;
}

/// Program plus leading arguments used to start the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl BackendCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// This executable's own `search` subcommand.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg("search"))
    }

    /// Look the program up on `PATH` when it is a bare name.
    pub fn resolve_program(&self) -> Option<PathBuf> {
        if self.program.components().count() > 1 {
            return self.program.exists().then(|| self.program.clone());
        }
        which::which(&self.program).ok()
    }

    /// Full argument list for one run. The query is attached as
    /// `--query=<Q>` so a value starting with `-` is never read as a flag.
    pub fn argv(&self, query: &str) -> Vec<OsString> {
        let mut query_arg = OsString::from("--query=");
        query_arg.push(query);

        let mut argv = self.args.clone();
        argv.push(query_arg);
        argv
    }

    pub fn display(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }
}

/// Runs one child process per query. No pooling, no shared state.
#[derive(Debug, Clone)]
pub struct SubprocessBackend {
    command: BackendCommand,
}

impl SubprocessBackend {
    pub fn new(command: BackendCommand) -> Self {
        Self { command }
    }

    fn build(&self, query: &str, config: &EffectiveConfig) -> Command {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(self.command.argv(query))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Secrets travel through the environment, never argv.
        for (key, value) in config.env_vars() {
            cmd.env(key, value);
        }
        if config.system_prompt.is_none() {
            cmd.env_remove(crate::core::config::ENV_SYSTEM_PROMPT);
        }
        cmd
    }
}

#[async_trait]
impl SearchBackend for SubprocessBackend {
    async fn invoke(
        &self,
        query: &str,
        config: EffectiveConfig,
    ) -> Result<SearchInvocation, InvocationError> {
        let started = Instant::now();
        let mut child = self
            .build(query, &config)
            .spawn()
            .map_err(|source| InvocationError::Launch {
                program: self.command.program.display().to_string(),
                source,
            })?;

        tracing::debug!(pid = ?child.id(), backend = %self.command.display(), "search backend started");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async {
            tokio::try_join!(child.wait(), drain(stdout), drain(stderr))
        };
        let outcome = tokio::time::timeout(config.timeout(), run).await;

        match outcome {
            Ok(result) => {
                let (status, stdout, stderr) = result?;
                Ok(SearchInvocation {
                    stdout: String::from_utf8_lossy(&stdout).trim().to_string(),
                    stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
                    exit_code: exit_code(status),
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
            Err(_) => {
                tracing::warn!(
                    pid = ?child.id(),
                    timeout_seconds = config.timeout_seconds,
                    "search backend timed out, terminating"
                );
                terminate(&mut child).await;
                Err(InvocationError::Timeout {
                    seconds: config.timeout_seconds,
                })
            }
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// SIGTERM, a short grace period, then SIGKILL. Always reaps the child.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                let _ = libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            if let Ok(Ok(_)) = tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
                return;
            }
        }
    }

    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "failed to kill search backend");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::config::ConfigLayer;

    fn config(timeout_seconds: u64) -> EffectiveConfig {
        ConfigLayer {
            base_url: Some("https://api.example.test".to_string()),
            api_key: Some("test-secret-key".to_string()),
            timeout_seconds: Some(timeout_seconds),
            ..Default::default()
        }
        .finish()
        .unwrap()
    }

    fn shell(script: &str) -> SubprocessBackend {
        SubprocessBackend::new(BackendCommand::new("sh").arg("-c").arg(script))
    }

    fn process_alive(pid: i32) -> bool {
        unsafe { libc::kill(pid, 0) == 0 }
    }

    #[tokio::test]
    async fn test_successful_run_captures_stdout() {
        let backend = shell("printf 'result text'");
        let result = backend.invoke("anything", config(5)).await.unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "result text");
        assert_eq!(result.stderr, "");
        assert!(result.succeeded());
        assert_eq!(result.text(), "result text");
    }

    #[tokio::test]
    async fn test_nonzero_exit_prefers_stderr() {
        let backend = shell("echo partial; echo boom >&2; exit 1");
        let result = backend.invoke("q", config(5)).await.unwrap();

        assert_eq!(result.exit_code, 1);
        assert_eq!(result.stdout, "partial");
        assert_eq!(result.stderr, "boom");
        assert_eq!(result.text(), "boom");
    }

    #[tokio::test]
    async fn test_nonzero_exit_falls_back_to_stdout() {
        let backend = shell("echo only-stdout; exit 3");
        let result = backend.invoke("q", config(5)).await.unwrap();
        assert_eq!(result.text(), "only-stdout");

        let backend = shell("exit 4");
        let result = backend.invoke("q", config(5)).await.unwrap();
        assert_eq!(result.text(), "search backend exited with status 4");
    }

    #[tokio::test]
    async fn test_query_is_argument_and_secret_is_env() {
        // sh -c receives `--query=<q>` as $0.
        let backend = shell(r#"printf '%s|%s|%s' "$0" "$GROK_API_KEY" "$GROK_TIMEOUT_SECONDS""#);
        let result = backend.invoke("-what is rust", config(9)).await.unwrap();
        assert_eq!(result.stdout, "--query=-what is rust|test-secret-key|9");
    }

    #[tokio::test]
    async fn test_missing_executable_is_launch_error() {
        let backend = SubprocessBackend::new(BackendCommand::new(
            "/nonexistent/grok-search-backend",
        ));
        let err = backend.invoke("q", config(5)).await.unwrap_err();
        assert!(matches!(err, InvocationError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let dir = tempfile::TempDir::new().unwrap();
        let pid_file = dir.path().join("pid");
        let backend = shell(&format!(
            "echo $$ > '{}'; exec sleep 30",
            pid_file.display()
        ));

        let started = Instant::now();
        let err = backend.invoke("q", config(1)).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, InvocationError::Timeout { seconds: 1 }));
        assert!(elapsed < Duration::from_millis(1500), "took {:?}", elapsed);

        let pid: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(!process_alive(pid));
    }

    #[test]
    fn test_argv_attaches_query() {
        let cmd = BackendCommand::new("grok-search-mcp")
            .arg("search")
            .arg("--config")
            .arg("config.json");
        assert_eq!(
            cmd.argv("--help me"),
            vec![
                OsString::from("search"),
                OsString::from("--config"),
                OsString::from("config.json"),
                OsString::from("--query=--help me"),
            ]
        );
    }

    #[test]
    fn test_backend_command_display() {
        let cmd = BackendCommand::new("grok-search-mcp").arg("search");
        assert_eq!(cmd.display(), "grok-search-mcp search");
    }
}
