use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::CommandError;

/// Executable path that has been checked to be absolute and to point at an
/// existing regular file. Bare program names are never resolved through
/// `$PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedExecutable(PathBuf);

impl ResolvedExecutable {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, CommandError> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(CommandError::RelativePath(path.display().to_string()));
        }
        if contains_nul(path.as_os_str()) {
            return Err(CommandError::NulByte);
        }
        let metadata = std::fs::metadata(path).map_err(|_| {
            CommandError::NotExecutable(path.display().to_string())
        })?;
        if !metadata.is_file() {
            return Err(CommandError::NotExecutable(path.display().to_string()));
        }
        Ok(Self(path.to_path_buf()))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

fn contains_nul(value: &OsStr) -> bool {
    value.as_encoded_bytes().contains(&0)
}

/// One invocation. Arguments are handed to the child as an argv array; no
/// shell is involved.
#[derive(Clone)]
pub struct CommandRequest {
    pub program: ResolvedExecutable,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
}

impl fmt::Debug for CommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRequest")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("stdin_len", &self.stdin.as_ref().map(Vec::len))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CommandRequest {
    pub fn new(program: ResolvedExecutable, timeout: Duration) -> Self {
        Self {
            program,
            args: Vec::new(),
            stdin: None,
            timeout,
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

    pub fn stdin(mut self, bytes: Vec<u8>) -> Self {
        self.stdin = Some(bytes);
        self
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait CommandPort: Send + Sync + fmt::Debug {
    /// Runs the program to completion. A non-zero exit is an error; the child
    /// is killed when the timeout elapses.
    async fn run(&self, request: CommandRequest) -> Result<CommandOutput, CommandError>;
}

/// Runs commands as tokio child processes with a cleared environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioCommandPort;

#[async_trait]
impl CommandPort for TokioCommandPort {
    async fn run(&self, request: CommandRequest) -> Result<CommandOutput, CommandError> {
        if request.args.iter().any(|arg| arg.contains('\0')) {
            return Err(CommandError::NulByte);
        }

        let mut cmd = Command::new(request.program.as_path());
        cmd.args(&request.args)
            .env_clear()
            .env("LC_ALL", "C")
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            program = %request.program.as_path().display(),
            args = ?request.args,
            timeout_ms = request.timeout.as_millis() as u64,
            "spawning external command"
        );

        let mut child = cmd.spawn()?;
        let stdin_pipe = child.stdin.take();
        let input = request.stdin.unwrap_or_default();

        let writer = async move {
            if let Some(mut pipe) = stdin_pipe {
                pipe.write_all(&input).await?;
                pipe.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };

        let run = async {
            let (written, output) = tokio::join!(writer, child.wait_with_output());
            let output = output?;
            if let Err(err) = written
                && err.kind() != std::io::ErrorKind::BrokenPipe
            {
                return Err(CommandError::Spawn(err));
            }
            Ok(output)
        };

        let output = match tokio::time::timeout(request.timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    program = %request.program.as_path().display(),
                    "external command timed out; child killed"
                );
                return Err(CommandError::TimedOut(request.timeout));
            }
        };

        let status = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(CommandError::ExitStatus {
                status,
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(CommandOutput {
            status,
            stdout,
            stderr,
        })
    }
}
