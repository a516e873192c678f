//! Subprocess steps with output forwarding.
//!
//! Output of every external tool the relay drives is copied byte-for-byte to
//! the relay's own stdout/stderr and mirrored to `tracing` at debug level.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::RelayError;
use crate::server::health::StderrBuffer;

/// A named external step, used in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Fetch a repository-sourced provider.
    Clone,
    /// Install a cloned repository's own dependencies.
    Install,
    /// Run a cloned repository's build script.
    Build,
    /// The single batched install into the workspace root.
    WorkspaceInstall,
    /// Start the stdio-to-socket adapter.
    Adapter,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Clone => "git clone",
            Step::Install => "dependency install",
            Step::Build => "build",
            Step::WorkspaceInstall => "workspace install",
            Step::Adapter => "adapter",
        };
        f.write_str(name)
    }
}

/// Which parent stream a child's output is copied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Copy a child's output stream to the matching parent stream until EOF.
///
/// Lines are written whole under the parent stream's lock so concurrent
/// providers do not interleave mid-line. When `tail` is given, each line is
/// also kept there for diagnostics.
pub fn forward_output<R>(
    reader: R,
    stream: OutputStream,
    label: String,
    tail: Option<Arc<Mutex<StderrBuffer>>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::with_capacity(256);
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    write_to_parent(stream, &line);
                    let text = String::from_utf8_lossy(&line);
                    let text = text.trim_end();
                    tracing::debug!(
                        provider = %label,
                        stream = ?stream,
                        line = %text,
                        "subprocess output"
                    );
                    if let Some(tail) = &tail {
                        tail.lock().await.push(text.to_string());
                    }
                }
                Err(e) => {
                    tracing::debug!(provider = %label, error = %e, "subprocess output closed");
                    break;
                }
            }
        }
    })
}

fn write_to_parent(stream: OutputStream, bytes: &[u8]) {
    let result = match stream {
        OutputStream::Stdout => {
            let mut out = std::io::stdout().lock();
            out.write_all(bytes).and_then(|_| out.flush())
        }
        OutputStream::Stderr => {
            let mut err = std::io::stderr().lock();
            err.write_all(bytes).and_then(|_| err.flush())
        }
    };
    if let Err(e) = result {
        tracing::trace!(error = %e, "failed to forward subprocess output");
    }
}

/// One external command run to completion on behalf of a provider.
#[derive(Debug, Clone)]
pub struct StepCommand {
    step: Step,
    provider: String,
    program: PathBuf,
    args: Vec<String>,
    cwd: PathBuf,
    stderr_tail: Option<Arc<Mutex<StderrBuffer>>>,
}

impl StepCommand {
    pub fn new(step: Step, provider: impl Into<String>, program: impl AsRef<Path>) -> Self {
        Self {
            step,
            provider: provider.into(),
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            cwd: PathBuf::from("."),
            stderr_tail: None,
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

    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = cwd.as_ref().to_path_buf();
        self
    }

    /// Also keep the step's stderr lines in `tail`.
    pub fn stderr_tail(mut self, tail: Arc<Mutex<StderrBuffer>>) -> Self {
        self.stderr_tail = Some(tail);
        self
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    /// Run the command, forwarding its output, and require a zero exit.
    ///
    /// The child is killed if this future is dropped before it finishes.
    pub async fn run(&self) -> crate::Result<()> {
        tracing::info!(
            provider = %self.provider,
            step = %self.step,
            command = %self.display_command(),
            cwd = %self.cwd.display(),
            "running step"
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            RelayError::SpawnFailed(
                self.provider.clone(),
                self.step,
                format!("{}: {}", self.program.display(), e),
            )
        })?;

        let stdout = child
            .stdout
            .take()
            .map(|out| forward_output(out, OutputStream::Stdout, self.provider.clone(), None));
        let stderr = child.stderr.take().map(|err| {
            forward_output(
                err,
                OutputStream::Stderr,
                self.provider.clone(),
                self.stderr_tail.clone(),
            )
        });

        let status = child.wait().await.map_err(|e| {
            RelayError::SpawnFailed(self.provider.clone(), self.step, e.to_string())
        })?;

        // Drain the forwarders so the step's output precedes its outcome
        for forwarder in [stdout, stderr].into_iter().flatten() {
            if let Err(e) = forwarder.await {
                tracing::debug!(provider = %self.provider, error = %e, "output forwarder ended abnormally");
            }
        }

        if status.success() {
            tracing::debug!(provider = %self.provider, step = %self.step, "step finished");
            Ok(())
        } else {
            tracing::warn!(
                provider = %self.provider,
                step = %self.step,
                code = ?status.code(),
                "step exited unsuccessfully"
            );
            Err(RelayError::StepFailed(
                self.provider.clone(),
                self.step,
                status.code(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_command() {
        let cmd = StepCommand::new(Step::Clone, "github:org/tool", "git")
            .arg("clone")
            .args(["https://github.com/org/tool", "tool"]);
        assert_eq!(
            cmd.display_command(),
            "git clone https://github.com/org/tool tool"
        );
        assert_eq!(cmd.get_args().len(), 3);
    }

    #[test]
    fn test_step_display() {
        assert_eq!(Step::Clone.to_string(), "git clone");
        assert_eq!(Step::WorkspaceInstall.to_string(), "workspace install");
    }

    #[tokio::test]
    async fn test_run_success() {
        let result = StepCommand::new(Step::Build, "p", "true").run().await;
        assert!(result.is_ok(), "true should succeed: {:?}", result);
    }

    #[tokio::test]
    async fn test_run_nonzero_exit() {
        let result = StepCommand::new(Step::Clone, "github:org/tool", "false")
            .run()
            .await;
        assert!(matches!(
            result,
            Err(RelayError::StepFailed(provider, Step::Clone, Some(1))) if provider == "github:org/tool"
        ));
    }

    #[tokio::test]
    async fn test_run_missing_program() {
        let result = StepCommand::new(Step::Install, "p", "/this/command/does/not/exist-relay")
            .run()
            .await;
        assert!(matches!(
            result,
            Err(RelayError::SpawnFailed(provider, Step::Install, _)) if provider == "p"
        ));
    }

    #[tokio::test]
    async fn test_run_missing_cwd_is_spawn_failure() {
        let result = StepCommand::new(Step::Build, "p", "true")
            .cwd("/nonexistent/relay/checkout")
            .run()
            .await;
        assert!(matches!(result, Err(RelayError::SpawnFailed(_, Step::Build, _))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_flushes_output_before_returning() {
        let tail = Arc::new(Mutex::new(StderrBuffer::new(5)));
        let result = StepCommand::new(Step::Build, "p", "sh")
            .args([
                "-c",
                "i=0; while [ $i -lt 200 ]; do i=$((i+1)); echo line$i >&2; done; exit 3",
            ])
            .stderr_tail(tail.clone())
            .run()
            .await;
        assert!(matches!(result, Err(RelayError::StepFailed(_, Step::Build, Some(3)))));

        let tail = tail.lock().await;
        assert_eq!(tail.lines().back().map(String::as_str), Some("line200"));
        assert_eq!(tail.lines().len(), 5);
    }

    #[tokio::test]
    async fn test_forward_output_fills_tail() {
        let input: &[u8] = b"first line\nsecond line\nno newline at end";
        let tail = Arc::new(Mutex::new(StderrBuffer::new(2)));
        forward_output(input, OutputStream::Stderr, "p".to_string(), Some(tail.clone()))
            .await
            .expect("forwarder task");
        let tail = tail.lock().await;
        let lines: Vec<&String> = tail.lines().iter().collect();
        assert_eq!(lines, vec!["second line", "no newline at end"]);
    }
}
