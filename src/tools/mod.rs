//! External tool invocation.
//!
//! Each tool call runs one configured command line through the shell. The
//! call's function name and raw argument string reach the program through
//! [`TOOL_NAME_ENV`] and [`TOOL_ARGS_ENV`]; the program answers through its
//! combined stdout/stderr and its exit code.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::RunError;

pub const TOOL_NAME_ENV: &str = "TOOL_NAME";
pub const TOOL_ARGS_ENV: &str = "TOOL_ARGS";

/// Exit code reported when the process never produced one.
pub const NO_EXIT_CODE: i32 = -1;

/// Result of one tool invocation.
///
/// `error` is set only when the process could not be started, reaped, or
/// finished in time. A nonzero exit is reported through `exit_code` alone.
/// Errors outside [`RunError::ToolExecution`] abort the run instead of being
/// sent back as output.
#[derive(Debug)]
pub struct ToolExecution {
    pub output: String,
    pub exit_code: i32,
    pub error: Option<RunError>,
}

impl ToolExecution {
    fn failed(tool_name: &str, message: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            exit_code: NO_EXIT_CODE,
            error: Some(RunError::ToolExecution {
                tool_name: tool_name.to_string(),
                message: message.into(),
            }),
        }
    }
}

/// Executes tool calls on behalf of a run.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn execute(&self, name: &str, arguments: &str) -> ToolExecution;
}

/// Runs a shell command line per tool call.
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    command_line: String,
    shell: String,
    timeout: Option<Duration>,
}

impl CommandInvoker {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            shell: default_shell().to_string(),
            timeout: None,
        }
    }

    /// Kill the program and report an error when it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    fn command(&self, name: &str, arguments: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.shell);
        if cfg!(windows) {
            cmd.arg("/C").arg(format!("{} 2>&1", self.command_line));
        } else {
            // Route stderr into stdout so the captured text keeps its ordering.
            cmd.arg("-c").arg(format!("exec 2>&1\n{}", self.command_line));
        }
        cmd.env(TOOL_NAME_ENV, name)
            .env(TOOL_ARGS_ENV, arguments)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ToolInvoker for CommandInvoker {
    async fn execute(&self, name: &str, arguments: &str) -> ToolExecution {
        debug!(name, command = %self.command_line, "executing tool program");

        let pending = self.command(name, arguments).output();
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, pending).await {
                Ok(result) => result,
                Err(_) => {
                    return ToolExecution::failed(
                        name,
                        format!("timed out after {}s", limit.as_secs_f64()),
                    );
                }
            },
            None => pending.await,
        };

        match result {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                ToolExecution {
                    output: format!("{stdout}{stderr}"),
                    exit_code: output.status.code().unwrap_or(NO_EXIT_CODE),
                    error: None,
                }
            }
            Err(e) => ToolExecution::failed(name, e.to_string()),
        }
    }
}

fn default_shell() -> &'static str {
    if cfg!(windows) {
        "cmd"
    } else {
        "sh"
    }
}
