use std::ffi::OsStr;
use std::fmt::Display;
use std::path::Path;
use std::process::{ExitStatus, Output, Stdio};

use thiserror::Error;
use tokio::process::Command as BaseCommand;
use tracing::debug;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to spawn command: {command}")]
    Spawn {
        command: String,
        #[source]
        error: tokio::io::Error,
    },

    #[error("command failed: {command}\n{stderr}")]
    Failure { command: String, stderr: String },

    #[error("command exited with {status}: {command}")]
    Status { command: String, status: ExitStatus },
}

/// Thin wrapper over [`tokio::process::Command`] which turns non-zero exits
/// into [`CommandError`]s carrying the rendered command line.
#[derive(Debug)]
pub struct Command {
    cmd: BaseCommand,
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cmd = self.cmd.as_std();
        let program = cmd.get_program().to_string_lossy();
        let args = cmd
            .get_args()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        if args.is_empty() {
            write!(f, "{program}",)
        } else {
            write!(f, "{program} {args}",)
        }
    }
}

impl Command {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            cmd: BaseCommand::new(program),
        }
    }

    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.cmd.arg(arg);
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.cmd.args(args);
        self
    }

    pub fn current_dir<P: AsRef<Path>>(&mut self, dir: P) -> &mut Command {
        self.cmd.current_dir(dir);
        self
    }

    pub async fn output(&mut self) -> Result<Output, CommandError> {
        debug!(command = %self, "running");
        self.cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|error| CommandError::Spawn {
                command: self.to_string(),
                error,
            })
    }

    /// Run to completion, failing on a non-zero exit with the captured stderr.
    pub async fn run(&mut self) -> Result<Output, CommandError> {
        self.output().await.and_then(|out| {
            if out.status.success() {
                Ok(out)
            } else {
                Err(CommandError::Failure {
                    command: self.to_string(),
                    stderr: String::from_utf8_lossy(&out.stderr).trim_end().to_string(),
                })
            }
        })
    }

    /// Run attached to the caller's terminal. Used for interactive helpers,
    /// so nothing is captured.
    pub async fn run_interactive(&mut self) -> Result<(), CommandError> {
        debug!(command = %self, "running interactively");
        let status = self
            .cmd
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|error| CommandError::Spawn {
                command: self.to_string(),
                error,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(CommandError::Status {
                command: self.to_string(),
                status,
            })
        }
    }
}
