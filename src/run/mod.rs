//! Run executor.
//!
//! A send starts a run (new thread or continuation), streams its events to
//! the output channels, and answers every `requires_action` round with the
//! configured tool program until the server ends the run.
//!
//! ```text
//! Idle -> Streaming -> (AwaitingToolOutputs -> Streaming)* -> Completed
//!                   \-> Failed
//! ```

pub mod templates;
pub mod tooling;

pub use templates::{
    CreateRunBody, CreateThreadAndRunBody, RequestTemplates, RunParams, SubmitParams,
    SubmitToolOutputsBody, ThreadBody, ToolOutput, UserMessage,
};
pub use tooling::{format_tool_output, RequiredAction, ToolCall};

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use strum::Display;
use tracing::{debug, info, warn};

use crate::client::AssistantsClient;
use crate::error::RunError;
use crate::input::{normalize_inputs, ContentPart};
use crate::state::{AppState, StateKey};
use crate::stream::{EventStream, StreamEvent};
use crate::template::RenderedRequest;
use crate::tools::ToolInvoker;

const NO_TOOLS_MESSAGE: &str = "--tools is required to handle tool calls";

/// Where a send currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Streaming,
    AwaitingToolOutputs,
    Completed,
    Failed,
}

/// What the user asked to send.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    /// Input descriptors; empty means standard input.
    pub inputs: Vec<String>,
    /// Append to the current thread instead of starting a new one.
    pub continue_thread: bool,
}

/// Identifiers and counters collected while a run streamed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub thread_id: Option<String>,
    pub run_id: Option<String>,
    /// Last status reported by a terminal run event.
    pub status: Option<String>,
    /// Number of `submit_tool_outputs` requests sent.
    pub tool_rounds: usize,
    pub tool_calls: usize,
}

#[derive(Debug)]
struct RunTarget {
    assistant_id: String,
    thread_id: Option<String>,
}

enum Step {
    Continue,
    Done,
    ToolCalls(RequiredAction),
}

/// Drives runs against one client and state store.
pub struct RunExecutor<'a> {
    client: &'a AssistantsClient,
    templates: &'a RequestTemplates,
    state: AppState,
    tools: Option<Arc<dyn ToolInvoker>>,
    tee_path: Option<PathBuf>,
}

impl<'a> RunExecutor<'a> {
    pub fn new(
        client: &'a AssistantsClient,
        templates: &'a RequestTemplates,
        state: AppState,
    ) -> Self {
        Self {
            client,
            templates,
            state,
            tools: None,
            tee_path: None,
        }
    }

    /// Program used to answer tool calls. Without one, a run that asks for
    /// tool outputs fails.
    pub fn with_tools(mut self, tools: Option<Arc<dyn ToolInvoker>>) -> Self {
        self.tools = tools;
        self
    }

    /// File receiving the raw bytes of every stream opened by a send.
    pub fn with_tee_path(mut self, path: Option<PathBuf>) -> Self {
        self.tee_path = path;
        self
    }

    /// Normalize the request's inputs and run them to completion.
    ///
    /// The assistant (and thread, for a continuation) is resolved before any
    /// input is read, so a misconfigured send never blocks on standard input.
    pub async fn send<O, D>(
        &self,
        request: &SendRequest,
        out: &mut O,
        diag: &mut D,
    ) -> Result<RunSummary, RunError>
    where
        O: Write + ?Sized,
        D: Write + ?Sized,
    {
        let target = self.resolve_target(request.continue_thread)?;
        let inputs = normalize_inputs(&request.inputs)?;
        self.execute(target, &inputs, out, diag).await
    }

    /// Run already-normalized content.
    pub async fn run<O, D>(
        &self,
        inputs: &[ContentPart],
        continue_thread: bool,
        out: &mut O,
        diag: &mut D,
    ) -> Result<RunSummary, RunError>
    where
        O: Write + ?Sized,
        D: Write + ?Sized,
    {
        let target = self.resolve_target(continue_thread)?;
        self.execute(target, inputs, out, diag).await
    }

    fn resolve_target(&self, continue_thread: bool) -> Result<RunTarget, RunError> {
        let assistant_id = self.state.current_assistant()?;
        let thread_id = if continue_thread {
            Some(self.state.current_thread()?)
        } else {
            None
        };
        Ok(RunTarget {
            assistant_id,
            thread_id,
        })
    }

    async fn execute<O, D>(
        &self,
        target: RunTarget,
        inputs: &[ContentPart],
        out: &mut O,
        diag: &mut D,
    ) -> Result<RunSummary, RunError>
    where
        O: Write + ?Sized,
        D: Write + ?Sized,
    {
        let mut phase = RunPhase::Idle;
        let result = self.drive(&target, inputs, &mut phase, out, diag).await;
        match &result {
            Ok(summary) => {
                transition(&mut phase, RunPhase::Completed);
                info!(
                    thread_id = summary.thread_id.as_deref().unwrap_or_default(),
                    run_id = summary.run_id.as_deref().unwrap_or_default(),
                    tool_rounds = summary.tool_rounds,
                    "run finished"
                );
            }
            Err(err) => {
                warn!(phase = %phase, category = ?err.category(), error = %err, "run failed");
                transition(&mut phase, RunPhase::Failed);
            }
        }
        result
    }

    async fn drive<O, D>(
        &self,
        target: &RunTarget,
        inputs: &[ContentPart],
        phase: &mut RunPhase,
        out: &mut O,
        diag: &mut D,
    ) -> Result<RunSummary, RunError>
    where
        O: Write + ?Sized,
        D: Write + ?Sized,
    {
        let tee = self.open_tee();
        let params = RunParams {
            assistant_id: &target.assistant_id,
            inputs,
        };

        let mut summary = RunSummary::default();
        let mut stream = match &target.thread_id {
            None => {
                let request: RenderedRequest<CreateThreadAndRunBody> =
                    self.templates.create_thread_and_run.render(&[], &params)?;
                self.open(&request, tee.as_ref()).await?
            }
            Some(thread_id) => {
                summary.thread_id = Some(thread_id.clone());
                let request: RenderedRequest<CreateRunBody> = self
                    .templates
                    .create_run
                    .render(&[("thread_id", thread_id.as_str())], &params)?;
                self.open(&request, tee.as_ref()).await?
            }
        };
        transition(phase, RunPhase::Streaming);

        let mut saw_done = false;
        loop {
            if !stream.next().await {
                if let Some(err) = stream.take_err() {
                    return Err(err);
                }
                break;
            }
            let Some(event) = stream.event() else {
                continue;
            };

            match self.dispatch(event, &mut summary, out, diag)? {
                Step::Continue => {}
                Step::Done => saw_done = true,
                Step::ToolCalls(action) => {
                    transition(phase, RunPhase::AwaitingToolOutputs);
                    let outputs = self.call_tools(&action, diag).await?;

                    // The done record that follows requires_action ends this stream.
                    if !stream.next().await {
                        if let Some(err) = stream.take_err() {
                            warn!(error = %err, "stream failed while draining");
                        }
                    }
                    stream.close();

                    let request: RenderedRequest<SubmitToolOutputsBody> =
                        self.templates.submit_tool_outputs.render(
                            &[
                                ("thread_id", action.thread_id.as_str()),
                                ("run_id", action.run_id.as_str()),
                            ],
                            &SubmitParams {
                                tool_outputs: &outputs,
                            },
                        )?;
                    stream = self.open(&request, tee.as_ref()).await?;
                    summary.tool_rounds += 1;
                    summary.tool_calls += outputs.len();
                    saw_done = false;
                    transition(phase, RunPhase::Streaming);
                }
            }
        }

        if !saw_done {
            return Err(RunError::Stream(
                "event stream ended before the done event".to_string(),
            ));
        }
        Ok(summary)
    }

    async fn open<B: Serialize>(
        &self,
        request: &RenderedRequest<B>,
        tee: Option<&File>,
    ) -> Result<EventStream, RunError> {
        let mut stream = self.client.open_stream(request).await?;
        if let Some(file) = tee {
            match file.try_clone() {
                Ok(copy) => stream.tee(Box::new(copy)),
                Err(err) => warn!(error = %err, "cannot share stream tee file"),
            }
        }
        Ok(stream)
    }

    fn open_tee(&self) -> Option<File> {
        let path = self.tee_path.as_ref()?;
        match File::create(path) {
            Ok(file) => Some(file),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot create stream tee file");
                None
            }
        }
    }

    fn dispatch<O, D>(
        &self,
        event: &StreamEvent,
        summary: &mut RunSummary,
        out: &mut O,
        diag: &mut D,
    ) -> Result<Step, RunError>
    where
        O: Write + ?Sized,
        D: Write + ?Sized,
    {
        let payload = &event.payload;
        match event.name.as_str() {
            "thread.created" => {
                let id = event_id(event, "id")?;
                self.state.put(StateKey::CurrentThread, &id)?;
                summary.thread_id = Some(id);
            }
            "thread.run.created" => {
                let id = event_id(event, "id")?;
                self.state.put(StateKey::CurrentRun, &id)?;
                summary.run_id = Some(id);
                if summary.thread_id.is_none() {
                    summary.thread_id = payload.string("thread_id");
                }
            }
            "thread.message.delta" => {
                for text in payload.array("delta.content.#.text.value") {
                    if let Value::String(text) = text {
                        out.write_all(text.as_bytes())?;
                    }
                }
                out.flush()?;
            }
            "thread.run.step.delta" => {
                let path = "delta.step_details.tool_calls.#(type==function)#.function";
                for function in payload.array(path) {
                    let name = function.get("name").and_then(Value::as_str);
                    let arguments = function.get("arguments").and_then(Value::as_str);
                    if let Some(name) = name.filter(|name| !name.is_empty()) {
                        info!(name, "function call");
                        write!(diag, "\n> {name}\n")?;
                    }
                    if let Some(arguments) = arguments.filter(|arguments| !arguments.is_empty()) {
                        diag.write_all(arguments.as_bytes())?;
                    }
                }
                diag.flush()?;
            }
            "thread.run.step.completed" => {
                let line = json!({
                    "thread_id": payload.get("thread_id"),
                    "run_id": payload.get("run_id"),
                    "usage": payload.get("usage"),
                });
                write!(diag, "\n{line}\n")?;
                diag.flush()?;
            }
            "thread.run.requires_action" => {
                writeln!(diag)?;
                let action = RequiredAction::from_payload(payload)?;
                if self.tools.is_none() {
                    return Err(RunError::Configuration(NO_TOOLS_MESSAGE.to_string()));
                }
                return Ok(Step::ToolCalls(action));
            }
            "thread.run.completed" | "thread.run.incomplete" | "thread.run.failed"
            | "thread.run.cancelled" | "thread.run.expired" => {
                summary.status = payload.string("status");
                if let Some(last_error) = payload.get("last_error").filter(|e| !e.is_null()) {
                    warn!(event = %event.name, %last_error, "run ended with an error");
                    writeln!(diag, "{}: {last_error}", event.name)?;
                }
            }
            "error" => {
                return Err(RunError::Stream(format!(
                    "server reported an error: {}",
                    payload.raw()
                )));
            }
            "done" => {
                writeln!(out)?;
                out.flush()?;
                return Ok(Step::Done);
            }
            other => debug!(event = other, "ignoring event"),
        }
        Ok(Step::Continue)
    }

    async fn call_tools<D>(
        &self,
        action: &RequiredAction,
        diag: &mut D,
    ) -> Result<Vec<ToolOutput>, RunError>
    where
        D: Write + ?Sized,
    {
        let tools = self
            .tools
            .as_ref()
            .ok_or_else(|| RunError::Configuration(NO_TOOLS_MESSAGE.to_string()))?;

        let mut outputs = Vec::with_capacity(action.calls.len());
        for call in &action.calls {
            info!(id = %call.id, name = %call.name, "calling tool program");
            let mut execution = tools.execute(&call.name, &call.arguments).await;
            match execution.error.take() {
                Some(err) if err.is_fatal() => return Err(err),
                Some(err) => {
                    warn!(id = %call.id, error = %err, "tool program failed");
                    execution.error = Some(err);
                }
                None => {}
            }
            let output = format_tool_output(&execution);
            diag.write_all(output.as_bytes())?;
            outputs.push(ToolOutput {
                tool_call_id: call.id.clone(),
                output,
            });
        }
        diag.flush()?;
        Ok(outputs)
    }
}

fn event_id(event: &StreamEvent, path: &str) -> Result<String, RunError> {
    event
        .payload
        .string(path)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| RunError::Stream(format!("{} event without {path}", event.name)))
}

fn transition(phase: &mut RunPhase, next: RunPhase) {
    debug!(from = %phase, to = %next, "run phase");
    *phase = next;
}
