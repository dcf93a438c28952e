//! Classify raw input descriptors into message content parts.
//!
//! A descriptor is either tagged (`text:`, `image:`, `file:`) or naked. Naked
//! descriptors resolve to the standard input stream (`-`), the contents of an
//! existing file, or the literal string, in that order.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RunError;

/// Descriptor meaning "read standard input".
pub const STDIN_SENTINEL: &str = "-";

/// One part of a user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// `{"type":"text","text":...}`
    Text { text: String },
    /// `{"type":"image_url","image_url":{"url":...,"detail":...}}`
    ImageUrl { image_url: ImageReference },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>, detail: ImageDetail) -> Self {
        Self::ImageUrl {
            image_url: ImageReference {
                url: url.into(),
                detail,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub url: String,
    pub detail: ImageDetail,
}

/// Resolution hint passed along with an image reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Low,
    High,
    #[default]
    Auto,
}

/// Turns descriptors into content parts, reading standard input at most once.
pub struct InputNormalizer<R> {
    stdin: R,
    stdin_text: Option<String>,
}

impl<R: Read> InputNormalizer<R> {
    pub fn new(stdin: R) -> Self {
        Self {
            stdin,
            stdin_text: None,
        }
    }

    /// Normalize every descriptor, defaulting to standard input when empty.
    ///
    /// The first failing descriptor aborts the whole normalization.
    pub fn normalize(&mut self, inputs: &[String]) -> Result<Vec<ContentPart>, RunError> {
        if inputs.is_empty() {
            return Ok(vec![self.read_stdin()?]);
        }
        inputs.iter().map(|input| self.parse(input)).collect()
    }

    /// Parse one descriptor.
    pub fn parse(&mut self, input: &str) -> Result<ContentPart, RunError> {
        let Some((tag, value)) = input.split_once(':') else {
            return self.parse_naked(input);
        };

        match tag {
            "text" => Ok(ContentPart::text(value)),
            "image" => {
                let url = reqwest::Url::parse(value)
                    .map_err(|e| RunError::Input(format!("invalid image URL {value:?}: {e}")))?;
                Ok(ContentPart::image(url.as_str(), ImageDetail::Auto))
            }
            "file" => self.read_file(value),
            _ => self.parse_naked(input),
        }
    }

    fn parse_naked(&mut self, input: &str) -> Result<ContentPart, RunError> {
        if input == STDIN_SENTINEL {
            return self.read_stdin();
        }
        if Path::new(input).is_file() {
            return self.read_file(input);
        }
        Ok(ContentPart::text(input))
    }

    fn read_file(&mut self, path: &str) -> Result<ContentPart, RunError> {
        if path == STDIN_SENTINEL {
            return self.read_stdin();
        }
        let bytes = std::fs::read(path)
            .map_err(|e| RunError::Input(format!("error reading file {path}: {e}")))?;
        Ok(ContentPart::text(String::from_utf8_lossy(&bytes)))
    }

    fn read_stdin(&mut self) -> Result<ContentPart, RunError> {
        if let Some(text) = &self.stdin_text {
            return Ok(ContentPart::text(text.clone()));
        }
        let mut bytes = Vec::new();
        self.stdin
            .read_to_end(&mut bytes)
            .map_err(|e| RunError::Input(format!("error reading from stdin: {e}")))?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        self.stdin_text = Some(text.clone());
        Ok(ContentPart::text(text))
    }
}

/// Normalize descriptors against the process's standard input.
pub fn normalize_inputs(inputs: &[String]) -> Result<Vec<ContentPart>, RunError> {
    InputNormalizer::new(std::io::stdin().lock()).normalize(inputs)
}
