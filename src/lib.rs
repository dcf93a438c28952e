//! threadrun: drive assistant runs over server-sent events.
//!
//! A send posts the user's content as a new thread or a continuation, streams
//! the run's events (assistant text to one channel, tool-call progress and
//! step summaries to another) and answers every tool-output request by
//! running a local program, until the server ends the run.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use threadrun::client::AssistantsClient;
//! use threadrun::config::ThreadrunConfig;
//! use threadrun::run::{RequestTemplates, RunExecutor, SendRequest};
//! use threadrun::state::{AppState, FileStateStore};
//!
//! # async fn example() -> Result<(), threadrun::error::RunError> {
//! let config = ThreadrunConfig::from_env()?;
//! let client = AssistantsClient::from_config(&config)?;
//! let templates = RequestTemplates::new()?;
//! let state = AppState::new(Arc::new(FileStateStore::new(config.state_path())));
//!
//! let executor = RunExecutor::new(&client, &templates, state);
//! let request = SendRequest {
//!     inputs: vec!["text:What is 2 squared?".into()],
//!     continue_thread: false,
//! };
//! executor
//!     .send(&request, &mut std::io::stdout(), &mut std::io::stderr())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod input;
pub mod run;
pub mod state;
pub mod stream;
pub mod template;
pub mod tools;

#[cfg(feature = "cli")]
pub mod cli;
