//! JSON request-body templates.
//!
//! Templates use a small mustache-style syntax that is compiled once and
//! rendered many times:
//!
//! - `{{name}}` inserts the JSON encoding of parameter `name` (dotted paths
//!   like `{{run.id}}` descend into objects, `{{.}}` is the current item).
//! - `{{#name}} ... {{/name}}` repeats the block for every element of an
//!   array parameter, with the element as the current item. A non-array
//!   truthy value renders the block once; `false`, `null`, missing values
//!   and empty arrays render nothing.
//!
//! Trailing commas before `]` or `}` are dropped after rendering, so list
//! blocks can end every element with a comma.
//!
//! ```
//! use threadrun::template::JsonTemplate;
//! use serde_json::{json, Value};
//!
//! let tmpl = JsonTemplate::new(r#"{"ids": [ {{#ids}} {{.}}, {{/ids}} ]}"#)?;
//! let body: Value = tmpl.render(&json!({"ids": ["a", "b"]}))?;
//! assert_eq!(body, json!({"ids": ["a", "b"]}));
//! # Ok::<(), threadrun::error::RunError>(())
//! ```

pub mod request;

pub use request::{RenderedRequest, RequestTemplate};

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::RunError;

static TAG: OnceLock<Regex> = OnceLock::new();

fn tag_regex() -> &'static Regex {
    TAG.get_or_init(|| {
        Regex::new(r"\{\{\s*([#/]?)\s*([A-Za-z0-9_.]+)\s*\}\}").expect("tag pattern is valid")
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Value(String),
    Section { name: String, body: Vec<Segment> },
}

/// A compiled JSON template.
#[derive(Debug, Clone)]
pub struct JsonTemplate {
    segments: Vec<Segment>,
}

impl JsonTemplate {
    /// Compile a template, rejecting unbalanced sections and stray braces.
    pub fn new(source: &str) -> Result<Self, RunError> {
        // Stack of open sections: (name, segments collected so far).
        let mut stack: Vec<(String, Vec<Segment>)> = vec![(String::new(), Vec::new())];
        let mut cursor = 0;

        for caps in tag_regex().captures_iter(source) {
            let whole = caps.get(0).expect("capture 0 always present");
            push_literal(&mut stack, &source[cursor..whole.start()])?;
            cursor = whole.end();

            let name = caps[2].to_string();
            match &caps[1] {
                "#" => stack.push((name, Vec::new())),
                "/" => {
                    if stack.len() == 1 {
                        return Err(RunError::Template(format!(
                            "closing tag {{{{/{name}}}}} without an open section"
                        )));
                    }
                    let (open, body) = stack.pop().expect("checked depth above");
                    if open != name {
                        return Err(RunError::Template(format!(
                            "section {{{{#{open}}}}} closed by {{{{/{name}}}}}"
                        )));
                    }
                    current(&mut stack).push(Segment::Section { name, body });
                }
                _ => current(&mut stack).push(Segment::Value(name)),
            }
        }
        push_literal(&mut stack, &source[cursor..])?;

        if stack.len() > 1 {
            let (open, _) = stack.pop().expect("checked depth above");
            return Err(RunError::Template(format!("section {{{{#{open}}}}} is never closed")));
        }
        let (_, segments) = stack.pop().expect("root frame always present");
        Ok(Self { segments })
    }

    /// Render to JSON text, with trailing commas removed.
    pub fn render_text<P: Serialize + ?Sized>(&self, params: &P) -> Result<String, RunError> {
        let root = serde_json::to_value(params)?;
        let mut out = String::new();
        let mut scopes = vec![&root];
        render_segments(&self.segments, &mut scopes, &mut out)?;
        Ok(strip_trailing_commas(&out))
    }

    /// Render and decode the result into `T`.
    ///
    /// Decoding failures carry the rendered text.
    pub fn render<T, P>(&self, params: &P) -> Result<T, RunError>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let rendered = self.render_text(params)?;
        serde_json::from_str(&rendered)
            .map_err(|source| RunError::RenderedJson { source, rendered })
    }
}

fn current(stack: &mut [(String, Vec<Segment>)]) -> &mut Vec<Segment> {
    &mut stack.last_mut().expect("root frame always present").1
}

fn push_literal(stack: &mut [(String, Vec<Segment>)], text: &str) -> Result<(), RunError> {
    if text.is_empty() {
        return Ok(());
    }
    if text.contains("{{") {
        return Err(RunError::Template(format!("malformed tag near {:?}", text.trim())));
    }
    current(stack).push(Segment::Literal(text.to_string()));
    Ok(())
}

fn lookup<'a>(scopes: &[&'a Value], name: &str) -> Option<&'a Value> {
    let innermost = *scopes.last()?;
    if name == "." {
        return Some(innermost);
    }

    let mut parts = name.split('.');
    let head = parts.next()?;
    let mut value = scopes.iter().rev().find_map(|&scope| scope.get(head))?;
    for part in parts {
        value = match value {
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            other => other.get(part)?,
        };
    }
    Some(value)
}

fn render_segments<'a>(
    segments: &[Segment],
    scopes: &mut Vec<&'a Value>,
    out: &mut String,
) -> Result<(), RunError> {
    for segment in segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Value(name) => {
                let value = lookup(scopes, name)
                    .ok_or_else(|| RunError::Template(format!("missing parameter {name:?}")))?;
                out.push_str(&serde_json::to_string(value)?);
            }
            Segment::Section { name, body } => match lookup(scopes, name) {
                None | Some(Value::Null) | Some(Value::Bool(false)) => {}
                Some(Value::Array(items)) => {
                    for item in items {
                        scopes.push(item);
                        let result = render_segments(body, scopes, out);
                        scopes.pop();
                        result?;
                    }
                }
                Some(value) => {
                    scopes.push(value);
                    let result = render_segments(body, scopes, out);
                    scopes.pop();
                    result?;
                }
            },
        }
    }
    Ok(())
}

/// Drop commas that directly precede `]` or `}` outside string literals.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            out.push(ch);
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some(']') | Some('}')) {
                    out.push(ch);
                }
            }
            _ => out.push(ch),
        }
    }
    out
}
