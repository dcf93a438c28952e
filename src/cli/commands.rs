//! CLI command handlers.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use super::{AssistantCommands, RunCommands, RunTarget, SendArgs, ThreadCommands};
use crate::client::AssistantsClient;
use crate::config::ThreadrunConfig;
use crate::error::{Result, RunError};
use crate::run::{RequestTemplates, RunExecutor, RunSummary, SendRequest};
use crate::state::{AppState, FileStateStore, StateKey, StateStore};
use crate::template::{RenderedRequest, RequestTemplate};
use crate::tools::{CommandInvoker, ToolInvoker};

const REQUEST_HASH_KEY: &str = "__hash__";

/// Everything a command needs, built once per process.
pub struct CliContext {
    pub config: ThreadrunConfig,
    pub state: AppState,
    pub templates: RequestTemplates,
}

impl CliContext {
    /// State lives in the configured application directory.
    pub fn new(config: ThreadrunConfig) -> Result<Self> {
        let store = FileStateStore::new(config.state_path());
        Self::with_store(config, Arc::new(store))
    }

    pub fn with_store(
        config: ThreadrunConfig,
        store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        Ok(Self {
            config,
            state: AppState::new(store),
            templates: RequestTemplates::new()?,
        })
    }

    fn client(&self) -> Result<AssistantsClient> {
        AssistantsClient::from_config(&self.config)
    }
}

/// Handle `threadrun send`.
pub async fn handle_send<O, D>(
    ctx: &CliContext,
    args: SendArgs,
    out: &mut O,
    diag: &mut D,
) -> Result<RunSummary>
where
    O: Write + ?Sized,
    D: Write + ?Sized,
{
    let client = ctx.client()?;
    let tools = args.tools.map(|command_line| {
        Arc::new(CommandInvoker::new(command_line).with_timeout(ctx.config.tool_timeout))
            as Arc<dyn ToolInvoker>
    });
    let executor = RunExecutor::new(&client, &ctx.templates, ctx.state.clone())
        .with_tools(tools)
        .with_tee_path(ctx.config.tee_path.clone());

    let request = SendRequest {
        inputs: args.inputs,
        continue_thread: args.continue_thread,
    };
    executor.send(&request, out, diag).await
}

/// Handle `threadrun assistant ...`.
pub async fn handle_assistant<O: Write + ?Sized>(
    ctx: &CliContext,
    command: AssistantCommands,
    out: &mut O,
) -> Result<()> {
    match command {
        AssistantCommands::Ls => {
            let request = get(&ctx.templates.list_assistants, &[])?;
            print_json(&ctx.client()?.fetch_json(&request).await?, out)
        }
        AssistantCommands::Create { file } => {
            let assistant = with_request_hash(read_assistant_request(&file)?)?;
            let request: RenderedRequest = ctx
                .templates
                .create_assistant
                .render(&[], &json!({ "assistant": assistant }))?;
            let created = ctx.client()?.fetch_json(&request).await?;
            print_json(&created, out)?;

            let assistant_id = created
                .get("id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| RunError::api(200, format!("{request} returned no assistant id")))?;
            ctx.state.put(StateKey::CurrentAssistant, assistant_id)?;
            Ok(())
        }
        AssistantCommands::Use { assistant_id } => {
            select(ctx, StateKey::CurrentAssistant, &assistant_id, out)
        }
        AssistantCommands::Current => print_current(ctx.state.current_assistant()?, out),
        AssistantCommands::Show { assistant_id } => {
            let assistant_id = or_current(assistant_id, || ctx.state.current_assistant())?;
            let request = get(
                &ctx.templates.retrieve_assistant,
                &[("assistant_id", assistant_id.as_str())],
            )?;
            print_json(&ctx.client()?.fetch_json(&request).await?, out)
        }
    }
}

/// Handle `threadrun thread ...`.
pub async fn handle_thread<O: Write + ?Sized>(
    ctx: &CliContext,
    command: ThreadCommands,
    out: &mut O,
) -> Result<()> {
    let (template, thread_id) = match command {
        ThreadCommands::Use { thread_id } => {
            return select(ctx, StateKey::CurrentThread, &thread_id, out);
        }
        ThreadCommands::Current => return print_current(ctx.state.current_thread()?, out),
        ThreadCommands::Show { thread_id } => (&ctx.templates.retrieve_thread, thread_id),
        ThreadCommands::Messages { thread_id } => (&ctx.templates.list_messages, thread_id),
    };
    let thread_id = or_current(thread_id, || ctx.state.current_thread())?;
    let request = get(template, &[("thread_id", thread_id.as_str())])?;
    print_json(&ctx.client()?.fetch_json(&request).await?, out)
}

/// Handle `threadrun run ...`.
pub async fn handle_run<O: Write + ?Sized>(
    ctx: &CliContext,
    command: RunCommands,
    out: &mut O,
) -> Result<()> {
    let (template, target) = match command {
        RunCommands::Show(target) => (&ctx.templates.retrieve_run, target),
        RunCommands::Steps(target) => (&ctx.templates.list_run_steps, target),
    };
    let RunTarget { run_id, thread_id } = target;
    let thread_id = or_current(thread_id, || ctx.state.current_thread())?;
    let run_id = or_current(run_id, || ctx.state.current_run())?;
    let request = get(
        template,
        &[("thread_id", thread_id.as_str()), ("run_id", run_id.as_str())],
    )?;
    print_json(&ctx.client()?.fetch_json(&request).await?, out)
}

fn select<O: Write + ?Sized>(
    ctx: &CliContext,
    key: StateKey,
    id: &str,
    out: &mut O,
) -> Result<()> {
    if id.is_empty() {
        return Err(RunError::Configuration(format!("{key} must not be empty")));
    }
    ctx.state.put(key, id)?;
    writeln!(out, "{key}: {id}")?;
    Ok(())
}

fn print_current<O: Write + ?Sized>(id: String, out: &mut O) -> Result<()> {
    writeln!(out, "{id}")?;
    Ok(())
}

fn or_current(
    explicit: Option<String>,
    current: impl FnOnce() -> Result<String>,
) -> Result<String> {
    match explicit.filter(|id| !id.is_empty()) {
        Some(id) => Ok(id),
        None => current(),
    }
}

fn get(template: &RequestTemplate, params: &[(&str, &str)]) -> Result<RenderedRequest> {
    template.render(params, &())
}

fn print_json<O: Write + ?Sized>(value: &Value, out: &mut O) -> Result<()> {
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// Read an assistant creation request. `.toml` files are TOML, anything else JSON.
fn read_assistant_request(file: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(file)
        .map_err(|e| RunError::Input(format!("error reading file {}: {e}", file.display())))?;
    let is_toml = file
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let parsed = if is_toml {
        toml::from_str::<Value>(&text).map_err(|e| e.to_string())
    } else {
        serde_json::from_str::<Value>(&text).map_err(|e| e.to_string())
    };
    parsed.map_err(|e| {
        RunError::Input(format!("invalid assistant request {}: {e}", file.display()))
    })
}

/// Stamp `metadata.__hash__` with the SHA-256 of the request as read.
fn with_request_hash(mut request: Value) -> Result<Value> {
    let digest = Sha256::digest(serde_json::to_vec(&request)?);
    let hash = format!("{digest:x}");

    let fields = request
        .as_object_mut()
        .ok_or_else(|| RunError::Input("assistant request must be a JSON object".into()))?;
    let metadata = fields
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if metadata.is_null() {
        *metadata = Value::Object(Map::new());
    }
    metadata
        .as_object_mut()
        .ok_or_else(|| RunError::Input("assistant metadata must be an object".into()))?
        .insert(REQUEST_HASH_KEY.to_string(), Value::String(hash));
    Ok(request)
}
