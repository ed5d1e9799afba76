//! External command execution with line-by-line output streaming.
//!
//! stdout and stderr are read concurrently and merged into one stream that
//! is handed to a [`LineSink`] as lines arrive. The sink may stop the read
//! loop early (sentinel lines); the pipes are still drained so the child
//! never blocks on a full buffer. Exit codes are reported, never judged.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};

/// A command to run, with an optional working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// Run `script` through `sh -c`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    /// Split a whitespace-separated template such as `"sudo -n supervisorctl restart all"`
    pub fn from_template(template: &str) -> Option<Self> {
        let mut parts = template.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).args(parts))
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

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Quote a value for inclusion in an `sh -c` script
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// What the runner should do after a line was consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineControl {
    Continue,
    Stop,
}

/// Receives every output line of a running command
pub trait LineSink: Send {
    fn on_line(&mut self, line: &str) -> LineControl;
}

impl<F> LineSink for F
where
    F: FnMut(&str) -> LineControl + Send,
{
    fn on_line(&mut self, line: &str) -> LineControl {
        self(line)
    }
}

/// Result of a finished command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    /// The sink asked to stop before the output ended
    pub stopped_early: bool,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run a command to completion, streaming merged output into `sink`
    pub async fn run<S: LineSink>(
        &self,
        command: &CommandLine,
        sink: &mut S,
    ) -> Result<ProcessOutcome> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(ref dir) = command.cwd {
            cmd.current_dir(dir);
        }

        tracing::debug!(command = %command, "Spawning process");

        let mut child = cmd.spawn().map_err(|e| {
            AppError::Process(format!("Failed to spawn '{}': {}", command.program, e))
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader(stderr, tx.clone()));
        }
        drop(tx);

        // Ends on a Stop from the sink or once both pipes are closed
        let mut stopped_early = false;
        while let Some(line) = rx.recv().await {
            if sink.on_line(&line) == LineControl::Stop {
                stopped_early = true;
                break;
            }
        }
        drop(rx);

        let status = child.wait().await.map_err(|e| {
            AppError::Process(format!("Failed to wait for '{}': {}", command.program, e))
        })?;

        for reader in readers {
            let _ = reader.await;
        }

        let outcome = ProcessOutcome {
            exit_code: status.code(),
            stopped_early,
        };
        tracing::debug!(command = %command, exit_code = ?outcome.exit_code, "Process finished");

        Ok(outcome)
    }

    /// Run a command and collect its output lines
    pub async fn capture(&self, command: &CommandLine) -> Result<(ProcessOutcome, Vec<String>)> {
        let mut lines = Vec::new();
        let outcome = self
            .run(command, &mut |line: &str| {
                lines.push(line.to_string());
                LineControl::Continue
            })
            .await?;
        Ok((outcome, lines))
    }
}

/// Forward every line of `pipe` until EOF, even after the receiver is gone
fn spawn_line_reader<R>(pipe: R, tx: mpsc::UnboundedSender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let _ = tx.send(line.trim_end_matches(['\r', '\n']).to_string());
                }
                Err(e) => {
                    tracing::debug!("Failed to read process output: {}", e);
                    break;
                }
            }
        }
    })
}
