//! Method + path + body templates for API requests.

use std::fmt;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::JsonTemplate;
use crate::error::RunError;

#[derive(Debug, Clone, PartialEq)]
enum PathSegment {
    Literal(String),
    Param(String),
}

/// A request whose path and body are filled in at render time.
///
/// Paths name their parameters in braces, e.g.
/// `/threads/{thread_id}/runs/{run_id}`.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    method: Method,
    path: Vec<PathSegment>,
    body: Option<JsonTemplate>,
}

/// Output of [`RequestTemplate::render`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedRequest<B = Value> {
    pub method: Method,
    pub path: String,
    pub body: Option<B>,
}

impl<B> fmt::Display for RenderedRequest<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

impl RequestTemplate {
    /// Compile a request without a body.
    pub fn new(method: Method, path: &str) -> Result<Self, RunError> {
        Ok(Self {
            method,
            path: compile_path(path)?,
            body: None,
        })
    }

    /// Attach a JSON body template.
    pub fn with_body(mut self, body: &str) -> Result<Self, RunError> {
        self.body = Some(JsonTemplate::new(body)?);
        Ok(self)
    }

    /// Substitute path parameters. Values are percent-encoded.
    pub fn render_path(&self, path_params: &[(&str, &str)]) -> Result<String, RunError> {
        let mut out = String::new();
        for segment in &self.path {
            match segment {
                PathSegment::Literal(text) => out.push_str(text),
                PathSegment::Param(name) => {
                    let value = path_params
                        .iter()
                        .find(|(key, _)| *key == name.as_str())
                        .map(|(_, value)| *value)
                        .ok_or_else(|| {
                            RunError::Template(format!("missing path parameter {name:?}"))
                        })?;
                    if value.is_empty() {
                        return Err(RunError::Template(format!("empty path parameter {name:?}")));
                    }
                    out.push_str(&encode_path_value(value));
                }
            }
        }
        Ok(out)
    }

    /// Render path and body, decoding the body into `B`.
    pub fn render<B, P>(
        &self,
        path_params: &[(&str, &str)],
        body_params: &P,
    ) -> Result<RenderedRequest<B>, RunError>
    where
        B: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let path = self.render_path(path_params)?;
        let body = match &self.body {
            Some(tmpl) => Some(tmpl.render(body_params)?),
            None => None,
        };
        Ok(RenderedRequest {
            method: self.method.clone(),
            path,
            body,
        })
    }
}

fn compile_path(path: &str) -> Result<Vec<PathSegment>, RunError> {
    let mut segments = Vec::new();
    let mut rest = path;

    while let Some(open) = rest.find('{') {
        let (literal, tail) = rest.split_at(open);
        if literal.contains('}') {
            return Err(RunError::Template(format!("unbalanced '}}' in path {path:?}")));
        }
        if !literal.is_empty() {
            segments.push(PathSegment::Literal(literal.to_string()));
        }
        let close = tail
            .find('}')
            .ok_or_else(|| RunError::Template(format!("unclosed '{{' in path {path:?}")))?;
        let name = &tail[1..close];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(RunError::Template(format!(
                "invalid path parameter {name:?} in {path:?}"
            )));
        }
        segments.push(PathSegment::Param(name.to_string()));
        rest = &tail[close + 1..];
    }

    if rest.contains('}') {
        return Err(RunError::Template(format!("unbalanced '}}' in path {path:?}")));
    }
    if !rest.is_empty() {
        segments.push(PathSegment::Literal(rest.to_string()));
    }
    Ok(segments)
}

fn encode_path_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
