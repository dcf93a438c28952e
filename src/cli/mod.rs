//! CLI entry point for threadrun.

pub mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Stream assistant runs and answer their tool calls with a local program.
#[derive(Parser, Debug)]
#[command(name = "threadrun", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a message to the current assistant and stream the run
    Send(SendArgs),
    /// Select or inspect the current assistant
    Assistant(AssistantArgs),
    /// Select or inspect the current thread
    Thread(ThreadArgs),
    /// Inspect the current run
    Run(RunArgs),
}

/// Arguments for `threadrun send`.
#[derive(Args, Debug)]
pub struct SendArgs {
    /// Inputs: `text:..`, `image:URL`, `file:PATH`, `-` for stdin, a file path,
    /// or literal text. Reads stdin when empty.
    pub inputs: Vec<String>,

    /// Continue the current thread instead of starting a new one
    #[arg(short = 'c', long = "continue")]
    pub continue_thread: bool,

    /// Command line run (via the shell) for each tool call; receives
    /// TOOL_NAME and TOOL_ARGS in its environment
    #[arg(long)]
    pub tools: Option<String>,
}

#[derive(Args, Debug)]
pub struct AssistantArgs {
    #[command(subcommand)]
    pub command: AssistantCommands,
}

#[derive(Subcommand, Debug)]
pub enum AssistantCommands {
    /// List assistants
    Ls,
    /// Create an assistant from a JSON or TOML request file and make it current
    Create { file: PathBuf },
    /// Make an assistant the current one
    Use { assistant_id: String },
    /// Print an assistant (defaults to the current one)
    Show { assistant_id: Option<String> },
    /// Print the current assistant id
    Current,
}

#[derive(Args, Debug)]
pub struct ThreadArgs {
    #[command(subcommand)]
    pub command: ThreadCommands,
}

#[derive(Subcommand, Debug)]
pub enum ThreadCommands {
    /// Make a thread the current one
    Use { thread_id: String },
    /// Print a thread (defaults to the current one)
    Show { thread_id: Option<String> },
    /// List a thread's messages, oldest first
    Messages { thread_id: Option<String> },
    /// Print the current thread id
    Current,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(subcommand)]
    pub command: RunCommands,
}

#[derive(Subcommand, Debug)]
pub enum RunCommands {
    /// Print a run (defaults to the current one)
    Show(RunTarget),
    /// List a run's steps
    Steps(RunTarget),
}

/// Run selector; both ids default to the persisted ones.
#[derive(Args, Debug, Default)]
pub struct RunTarget {
    pub run_id: Option<String>,

    /// Thread owning the run
    #[arg(long = "thread")]
    pub thread_id: Option<String>,
}
