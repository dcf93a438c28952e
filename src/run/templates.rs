//! Request templates for the assistants API and the typed bodies they decode into.

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::error::RunError;
use crate::input::ContentPart;
use crate::template::RequestTemplate;

const CREATE_THREAD_AND_RUN: &str = r#"{
    "assistant_id": {{assistant_id}},
    "thread": {
        "messages": [
            {"role": "user", "content": [
                {{#inputs}}
                {{.}},
                {{/inputs}}
            ]},
        ],
    },
    "stream": true,
}"#;

const CREATE_RUN: &str = r#"{
    "assistant_id": {{assistant_id}},
    "additional_messages": [
        {"role": "user", "content": [
            {{#inputs}}
            {{.}},
            {{/inputs}}
        ]},
    ],
    "stream": true,
}"#;

const SUBMIT_TOOL_OUTPUTS: &str = r#"{
    "tool_outputs": [
        {{#tool_outputs}}
        {"tool_call_id": {{tool_call_id}}, "output": {{output}}},
        {{/tool_outputs}}
    ],
    "stream": true,
}"#;

/// Every request this crate sends, compiled once at startup.
#[derive(Debug, Clone)]
pub struct RequestTemplates {
    /// `POST /threads/runs`
    pub create_thread_and_run: RequestTemplate,
    /// `POST /threads/{thread_id}/runs`
    pub create_run: RequestTemplate,
    /// `POST /threads/{thread_id}/runs/{run_id}/submit_tool_outputs`
    pub submit_tool_outputs: RequestTemplate,
    pub list_assistants: RequestTemplate,
    /// `POST /assistants` with the request object passed as `assistant`.
    pub create_assistant: RequestTemplate,
    pub retrieve_assistant: RequestTemplate,
    pub retrieve_thread: RequestTemplate,
    pub list_messages: RequestTemplate,
    pub retrieve_run: RequestTemplate,
    pub list_run_steps: RequestTemplate,
}

impl RequestTemplates {
    pub fn new() -> Result<Self, RunError> {
        Ok(Self {
            create_thread_and_run: RequestTemplate::new(Method::POST, "/threads/runs")?
                .with_body(CREATE_THREAD_AND_RUN)?,
            create_run: RequestTemplate::new(Method::POST, "/threads/{thread_id}/runs")?
                .with_body(CREATE_RUN)?,
            submit_tool_outputs: RequestTemplate::new(
                Method::POST,
                "/threads/{thread_id}/runs/{run_id}/submit_tool_outputs",
            )?
            .with_body(SUBMIT_TOOL_OUTPUTS)?,
            list_assistants: RequestTemplate::new(Method::GET, "/assistants")?,
            create_assistant: RequestTemplate::new(Method::POST, "/assistants")?
                .with_body("{{assistant}}")?,
            retrieve_assistant: RequestTemplate::new(Method::GET, "/assistants/{assistant_id}")?,
            retrieve_thread: RequestTemplate::new(Method::GET, "/threads/{thread_id}")?,
            list_messages: RequestTemplate::new(
                Method::GET,
                "/threads/{thread_id}/messages?order=asc",
            )?,
            retrieve_run: RequestTemplate::new(Method::GET, "/threads/{thread_id}/runs/{run_id}")?,
            list_run_steps: RequestTemplate::new(
                Method::GET,
                "/threads/{thread_id}/runs/{run_id}/steps",
            )?,
        })
    }
}

/// Parameters shared by both run-creating templates.
#[derive(Debug, Serialize)]
pub struct RunParams<'a> {
    pub assistant_id: &'a str,
    pub inputs: &'a [ContentPart],
}

#[derive(Debug, Serialize)]
pub struct SubmitParams<'a> {
    pub tool_outputs: &'a [ToolOutput],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub role: String,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadBody {
    pub messages: Vec<UserMessage>,
}

/// Body of `POST /threads/runs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateThreadAndRunBody {
    pub assistant_id: String,
    pub thread: ThreadBody,
    pub stream: bool,
}

/// Body of `POST /threads/{thread_id}/runs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRunBody {
    pub assistant_id: String,
    pub additional_messages: Vec<UserMessage>,
    pub stream: bool,
}

/// The result of one tool call, matched back by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Body of `POST /threads/{thread_id}/runs/{run_id}/submit_tool_outputs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitToolOutputsBody {
    pub tool_outputs: Vec<ToolOutput>,
    pub stream: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::RenderedRequest;
    use pretty_assertions::assert_eq;

    #[test]
    fn create_thread_and_run_wraps_inputs_in_one_user_message() {
        let templates = RequestTemplates::new().unwrap();
        let inputs = vec![
            ContentPart::text("hello"),
            ContentPart::image("https://example.com/a.png", Default::default()),
        ];
        let rendered: RenderedRequest<CreateThreadAndRunBody> = templates
            .create_thread_and_run
            .render(
                &[],
                &RunParams {
                    assistant_id: "asst_1",
                    inputs: &inputs,
                },
            )
            .unwrap();

        assert_eq!(rendered.to_string(), "POST /threads/runs");
        assert_eq!(
            rendered.body.unwrap(),
            CreateThreadAndRunBody {
                assistant_id: "asst_1".into(),
                thread: ThreadBody {
                    messages: vec![UserMessage {
                        role: "user".into(),
                        content: inputs,
                    }],
                },
                stream: true,
            }
        );
    }

    #[test]
    fn create_run_targets_thread() {
        let templates = RequestTemplates::new().unwrap();
        let inputs = vec![ContentPart::text("again")];
        let rendered: RenderedRequest<CreateRunBody> = templates
            .create_run
            .render(
                &[("thread_id", "t1")],
                &RunParams {
                    assistant_id: "asst_1",
                    inputs: &inputs,
                },
            )
            .unwrap();

        assert_eq!(rendered.path, "/threads/t1/runs");
        let body = rendered.body.unwrap();
        assert_eq!(body.additional_messages[0].content, inputs);
        assert!(body.stream);
    }

    #[test]
    fn create_assistant_posts_the_request_object_as_is() {
        let templates = RequestTemplates::new().unwrap();
        let assistant = serde_json::json!({
            "model": "gpt-4o",
            "name": "Math",
            "metadata": {"__hash__": "abc"}
        });
        let rendered: RenderedRequest = templates
            .create_assistant
            .render(&[], &serde_json::json!({ "assistant": assistant }))
            .unwrap();

        assert_eq!(rendered.to_string(), "POST /assistants");
        assert_eq!(rendered.body.unwrap(), assistant);
    }

    #[test]
    fn submit_tool_outputs_preserves_order_and_escapes_output() {
        let templates = RequestTemplates::new().unwrap();
        let outputs = vec![
            ToolOutput {
                tool_call_id: "call_1".into(),
                output: "4\nProgram exit code: 0\n".into(),
            },
            ToolOutput {
                tool_call_id: "call_2".into(),
                output: "\"quoted\", {braces}]".into(),
            },
        ];
        let rendered: RenderedRequest<SubmitToolOutputsBody> = templates
            .submit_tool_outputs
            .render(
                &[("thread_id", "t1"), ("run_id", "r1")],
                &SubmitParams {
                    tool_outputs: &outputs,
                },
            )
            .unwrap();

        assert_eq!(rendered.path, "/threads/t1/runs/r1/submit_tool_outputs");
        assert_eq!(
            rendered.body.unwrap(),
            SubmitToolOutputsBody {
                tool_outputs: outputs,
                stream: true,
            }
        );
    }
}
