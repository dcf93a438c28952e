//! Shared test helpers: SSE bodies, a scripted tool invoker, and executor wiring.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::{MockServer, ResponseTemplate};

use threadrun::client::AssistantsClient;
use threadrun::error::RunError;
use threadrun::state::{AppState, MemoryStateStore, StateKey};
use threadrun::tools::{ToolExecution, ToolInvoker};

/// Encode records as a server-sent event body.
pub fn sse(events: &[(&str, Value)]) -> String {
    let mut body = String::new();
    for (name, data) in events {
        body.push_str(&format!("event: {name}\ndata: {data}\n\n"));
    }
    body
}

/// Same as [`sse`], followed by the terminal `done` record.
pub fn sse_with_done(events: &[(&str, Value)]) -> String {
    let mut body = sse(events);
    body.push_str("event: done\ndata: [DONE]\n\n");
    body
}

pub fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

/// One scripted reply of [`socket_sse_server`].
pub enum SocketReply {
    /// A complete event-stream body.
    Complete(String),
    /// Promises more bytes than it sends, then hangs up.
    Truncated(String),
}

/// Answer one connection per reply, in order. Returns the base URL.
pub async fn socket_sse_server(replies: Vec<SocketReply>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        for reply in replies {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let (body, declared) = match reply {
                SocketReply::Complete(body) => {
                    let len = body.len();
                    (body, len)
                }
                SocketReply::Truncated(body) => {
                    let len = body.len() + 1024;
                    (body, len)
                }
            };
            let head = format!(
                "HTTP/1.1 200 OK\r\n\
                 content-type: text/event-stream\r\n\
                 content-length: {declared}\r\n\
                 connection: close\r\n\r\n"
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
        }
    });
    format!("http://{addr}")
}

/// Consume request headers and a `content-length` body.
async fn read_request(socket: &mut TcpStream) {
    let mut received = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        received.extend_from_slice(&chunk[..n]);
        let Some(end) = received.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&received[..end]).to_ascii_lowercase();
        let body_len = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if received.len() >= end + 4 + body_len {
            return;
        }
    }
}

pub fn client(server: &MockServer) -> AssistantsClient {
    AssistantsClient::new("test-key", server.uri()).unwrap()
}

pub fn state_with_assistant(assistant_id: &str) -> AppState {
    let state = AppState::new(Arc::new(MemoryStateStore::new()));
    state.put(StateKey::CurrentAssistant, assistant_id).unwrap();
    state
}

pub fn thread_created(thread_id: &str) -> (&'static str, Value) {
    ("thread.created", json!({"id": thread_id, "object": "thread"}))
}

pub fn run_created(run_id: &str, thread_id: &str) -> (&'static str, Value) {
    (
        "thread.run.created",
        json!({"id": run_id, "object": "thread.run", "thread_id": thread_id, "status": "queued"}),
    )
}

pub fn message_delta(text: &str) -> (&'static str, Value) {
    (
        "thread.message.delta",
        json!({
            "id": "msg_1",
            "object": "thread.message.delta",
            "delta": {"content": [{"index": 0, "type": "text", "text": {"value": text}}]}
        }),
    )
}

pub fn requires_action(
    run_id: &str,
    thread_id: &str,
    calls: &[(&str, &str, &str)],
) -> (&'static str, Value) {
    let tool_calls: Vec<Value> = calls
        .iter()
        .map(|(id, name, arguments)| {
            json!({
                "id": id,
                "type": "function",
                "function": {"name": name, "arguments": arguments}
            })
        })
        .collect();
    (
        "thread.run.requires_action",
        json!({
            "id": run_id,
            "object": "thread.run",
            "thread_id": thread_id,
            "status": "requires_action",
            "required_action": {
                "type": "submit_tool_outputs",
                "submit_tool_outputs": {"tool_calls": tool_calls}
            }
        }),
    )
}

pub fn run_completed(run_id: &str, thread_id: &str) -> (&'static str, Value) {
    (
        "thread.run.completed",
        json!({"id": run_id, "object": "thread.run", "thread_id": thread_id, "status": "completed"}),
    )
}

/// Records every call and answers from a script, falling back to empty success.
#[derive(Default)]
pub struct ScriptedInvoker {
    pub calls: Mutex<Vec<(String, String)>>,
    replies: Mutex<Vec<(String, i32)>>,
}

impl ScriptedInvoker {
    pub fn new(replies: &[(&str, i32)]) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(
                replies
                    .iter()
                    .rev()
                    .map(|(output, code)| (output.to_string(), *code))
                    .collect(),
            ),
        })
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolInvoker for ScriptedInvoker {
    async fn execute(&self, name: &str, arguments: &str) -> ToolExecution {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.to_string()));
        let (output, exit_code) = self
            .replies
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| (String::new(), 0));
        ToolExecution {
            output,
            exit_code,
            error: None,
        }
    }
}

/// An invoker whose program cannot be resolved at all.
pub struct UnresolvableInvoker;

#[async_trait]
impl ToolInvoker for UnresolvableInvoker {
    async fn execute(&self, name: &str, _arguments: &str) -> ToolExecution {
        ToolExecution {
            output: String::new(),
            exit_code: -1,
            error: Some(RunError::Configuration(format!("no program registered for {name}"))),
        }
    }
}
