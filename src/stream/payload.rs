//! Lazy path queries over raw event payloads.
//!
//! Payload shapes differ per event name, so events keep their raw data and
//! callers pull out just the fields they need. The JSON is parsed on first
//! query and cached.
//!
//! Path syntax:
//!
//! | Path                 | Meaning                                              |
//! |----------------------|------------------------------------------------------|
//! | `a.b`                | field `b` of field `a`                               |
//! | `items.0`            | first element of array `items`                       |
//! | `items.#`            | length of array `items`                              |
//! | `items.#.name`       | array of `name` across every element                 |
//! | `items.#(k==v)`      | first element whose `k` equals `v`                   |
//! | `items.#(k==v)#`     | every element whose `k` equals `v` (`!=` also works) |

use std::fmt;
use std::sync::OnceLock;

use serde_json::Value;

/// Raw event data with cached lazy parsing.
pub struct Payload {
    raw: String,
    parsed: OnceLock<Option<Value>>,
}

impl Payload {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            parsed: OnceLock::new(),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The parsed document, or `None` when the data is not JSON (e.g. `[DONE]`).
    pub fn json(&self) -> Option<&Value> {
        self.parsed
            .get_or_init(|| serde_json::from_str(&self.raw).ok())
            .as_ref()
    }

    /// Evaluate a path. Missing fields yield `None`.
    pub fn get(&self, path: &str) -> Option<Value> {
        let root = self.json()?;
        let parts = parse_path(path);
        query(root, &parts)
    }

    /// String value at `path`; non-strings yield `None`.
    pub fn string(&self, path: &str) -> Option<String> {
        match self.get(path)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Array at `path`; anything else yields an empty vector.
    pub fn array(&self, path: &str) -> Vec<Value> {
        match self.get(path) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.get(path).is_some()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Payload").field(&self.raw).finish()
    }
}

impl Clone for Payload {
    fn clone(&self) -> Self {
        Self::new(self.raw.clone())
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Key(String),
    Count,
    Each,
    Filter {
        key: String,
        negate: bool,
        value: String,
        all: bool,
    },
}

fn parse_path(path: &str) -> Vec<Part> {
    let components = split_components(path);
    let last = components.len().saturating_sub(1);
    components
        .into_iter()
        .enumerate()
        .map(|(i, component)| {
            if component == "#" {
                // `#` at the end counts; anywhere else it projects.
                return if i == last { Part::Count } else { Part::Each };
            }
            parse_filter(&component).unwrap_or(Part::Key(component))
        })
        .collect()
}

/// Split on `.` outside of `#(...)` filters.
fn split_components(path: &str) -> Vec<String> {
    let mut components = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for ch in path.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            '.' if depth == 0 => components.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    components.push(current);
    components.retain(|c| !c.is_empty());
    components
}

fn parse_filter(component: &str) -> Option<Part> {
    let inner = component.strip_prefix("#(")?;
    let (inner, all) = match inner.strip_suffix(")#") {
        Some(inner) => (inner, true),
        None => (inner.strip_suffix(')')?, false),
    };
    let (key, negate, value) = if let Some((k, v)) = inner.split_once("!=") {
        (k, true, v)
    } else {
        let (k, v) = inner.split_once("==")?;
        (k, false, v)
    };
    Some(Part::Filter {
        key: key.trim().to_string(),
        negate,
        value: value.trim().trim_matches('"').to_string(),
        all,
    })
}

fn query(value: &Value, parts: &[Part]) -> Option<Value> {
    let Some((head, rest)) = parts.split_first() else {
        return Some(value.clone());
    };

    match head {
        Part::Key(key) => {
            let next = match value {
                Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
                Value::Object(map) => map.get(key)?,
                _ => return None,
            };
            query(next, rest)
        }
        Part::Count => match value {
            Value::Array(items) => Some(Value::from(items.len())),
            _ => None,
        },
        Part::Each => {
            let items = value.as_array()?;
            Some(Value::Array(
                items.iter().filter_map(|item| query(item, rest)).collect(),
            ))
        }
        Part::Filter {
            key,
            negate,
            value: expected,
            all,
        } => {
            let items = value.as_array()?;
            let mut matches = items.iter().filter(|item| {
                let hit = item.get(key).map(|v| scalar_text(v) == *expected).unwrap_or(false);
                hit != *negate
            });
            if *all {
                Some(Value::Array(
                    matches.filter_map(|item| query(item, rest)).collect(),
                ))
            } else {
                query(matches.next()?, rest)
            }
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
