//! Tool calls requested by a run and the outputs sent back for them.

use serde_json::Value;

use crate::error::RunError;
use crate::stream::Payload;
use crate::tools::ToolExecution;

const REQUIRED_CALLS_PATH: &str = "required_action.submit_tool_outputs.tool_calls";

/// One function call the run is blocked on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    fn from_value(value: &Value) -> Result<Self, RunError> {
        let field = |pointer: &str| value.pointer(pointer).and_then(Value::as_str);
        let id = field("/id")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RunError::Stream(format!("tool call without id: {value}")))?;
        Ok(Self {
            id: id.to_string(),
            name: field("/function/name").unwrap_or_default().to_string(),
            arguments: field("/function/arguments").unwrap_or_default().to_string(),
        })
    }
}

/// Where a blocked run lives and what it is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredAction {
    pub thread_id: String,
    pub run_id: String,
    pub calls: Vec<ToolCall>,
}

impl RequiredAction {
    /// Read a `thread.run.requires_action` payload.
    pub fn from_payload(payload: &Payload) -> Result<Self, RunError> {
        let thread_id = required_string(payload, "thread_id")?;
        let run_id = required_string(payload, "id")?;
        let calls = payload
            .array(REQUIRED_CALLS_PATH)
            .iter()
            .map(ToolCall::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            thread_id,
            run_id,
            calls,
        })
    }
}

fn required_string(payload: &Payload, path: &str) -> Result<String, RunError> {
    payload
        .string(path)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| RunError::Stream(format!("requires_action event without {path}")))
}

/// Render a tool program's result as the text submitted back to the run.
///
/// An invocation failure comes first as `Execute error: ...`, then the
/// captured output (newline-terminated), then the exit code line.
pub fn format_tool_output(execution: &ToolExecution) -> String {
    let mut text = String::new();
    if let Some(err) = &execution.error {
        let reason = match err {
            RunError::ToolExecution { message, .. } => message.clone(),
            other => other.to_string(),
        };
        text.push_str(&format!("Execute error: {reason}\n"));
    }
    text.push_str(&execution.output);
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(&format!("Program exit code: {}\n", execution.exit_code));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::NO_EXIT_CODE;
    use pretty_assertions::assert_eq;

    fn execution(output: &str, exit_code: i32, error: Option<RunError>) -> ToolExecution {
        ToolExecution {
            output: output.to_string(),
            exit_code,
            error,
        }
    }

    #[test]
    fn successful_output_ends_with_exit_code() {
        assert_eq!(
            format_tool_output(&execution("4\n", 0, None)),
            "4\nProgram exit code: 0\n"
        );
    }

    #[test]
    fn missing_trailing_newline_is_added() {
        assert_eq!(
            format_tool_output(&execution("boom", 2, None)),
            "boom\nProgram exit code: 2\n"
        );
    }

    #[test]
    fn empty_output_is_just_the_exit_code() {
        assert_eq!(format_tool_output(&execution("", 0, None)), "Program exit code: 0\n");
    }

    #[test]
    fn invocation_error_is_reported_first() {
        let err = RunError::ToolExecution {
            tool_name: "square".into(),
            message: "timed out after 1s".into(),
        };
        let text = format_tool_output(&execution("", NO_EXIT_CODE, Some(err)));
        assert_eq!(text, "Execute error: timed out after 1s\nProgram exit code: -1\n");
    }

    #[test]
    fn other_invocation_errors_keep_their_description() {
        let err = RunError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such program",
        ));
        let text = format_tool_output(&execution("", NO_EXIT_CODE, Some(err)));
        assert_eq!(
            text,
            "Execute error: IO error: no such program\nProgram exit code: -1\n"
        );
    }

    #[test]
    fn required_action_lists_calls_in_order() {
        let payload = Payload::new(
            r#"{"id":"r1","thread_id":"t1","status":"requires_action",
                "required_action":{"type":"submit_tool_outputs","submit_tool_outputs":{"tool_calls":[
                    {"id":"call_1","type":"function","function":{"name":"square","arguments":"{\"x\":2}"}},
                    {"id":"call_2","type":"function","function":{"name":"cube","arguments":"{}"}}
                ]}}}"#,
        );
        let action = RequiredAction::from_payload(&payload).unwrap();
        assert_eq!(action.thread_id, "t1");
        assert_eq!(action.run_id, "r1");
        assert_eq!(
            action.calls,
            vec![
                ToolCall {
                    id: "call_1".into(),
                    name: "square".into(),
                    arguments: r#"{"x":2}"#.into(),
                },
                ToolCall {
                    id: "call_2".into(),
                    name: "cube".into(),
                    arguments: "{}".into(),
                },
            ]
        );
    }

    #[test]
    fn required_action_without_run_id_is_rejected() {
        let payload = Payload::new(r#"{"thread_id":"t1"}"#);
        assert!(matches!(
            RequiredAction::from_payload(&payload),
            Err(RunError::Stream(_))
        ));
    }
}
