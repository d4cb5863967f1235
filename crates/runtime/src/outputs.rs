//! Run outputs carried in stdout.
//!
//! Tasks report outputs by printing specially prefixed lines:
//!
//! - `airplane_output[:<name>] <value>` appends `value` to the array stored
//!   under `name` (default `output`). Values that are not valid JSON are kept
//!   as strings.
//! - `airplane_output_set[:<path>] <json>` replaces the value at `path`, or
//!   the whole output when no path is given.
//! - `airplane_output_append[:<path>] <json>` appends to the array at `path`,
//!   or to the root array.
//!
//! Long lines may be split with `airplane_chunk:<key> <text>` lines and
//! terminated by `airplane_chunk_end:<key>`; the concatenated chunks are then
//! parsed as a single line.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use studio_types::{StudioError, StudioResult};

const OUTPUT_PREFIX: &str = "airplane_output";
const CHUNK_PREFIX: &str = "airplane_chunk";
const DEFAULT_OUTPUT_NAME: &str = "output";
/// Bytes buffered across all open chunks when no line limit is configured.
const MAX_OPEN_CHUNK_BYTES: usize = 16 * 1024 * 1024;

static LEGACY_OUTPUT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^airplane_output(?::(?:("[^"]*")|('[^']*')|([^ ]+))?)? (.*)$"#).expect("valid legacy output regex")
});
static PATH_OUTPUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^airplane_output(_set|_append)(:| )(.*)$").expect("valid output command regex"));
static CHUNK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^airplane_chunk(|_end):([^ ]*)(?: (.+)|)$").expect("valid chunk regex"));

#[derive(Debug, Clone, PartialEq)]
pub enum OutputCommand {
    /// `airplane_output[:name]`
    Legacy { name: String },
    Set { path: Vec<PathComponent> },
    Append { path: Vec<PathComponent> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub command: OutputCommand,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathComponent {
    Key(String),
    Index(usize),
}

/// Parses stdout lines and folds output commands into a single value.
#[derive(Debug, Default)]
pub struct OutputCollector {
    chunks: HashMap<String, String>,
    /// Total length of `chunks`.
    chunk_bytes: usize,
    outputs: Value,
    max_line_bytes: Option<usize>,
}

impl OutputCollector {
    pub fn new(max_line_bytes: Option<usize>) -> Self {
        Self {
            max_line_bytes,
            ..Self::default()
        }
    }

    /// Feed one line of stdout. Returns the parsed command, if the line was
    /// one; malformed output lines are errors but leave the collected value
    /// untouched.
    pub fn feed(&mut self, line: &str) -> StudioResult<Option<ParsedLine>> {
        let Some(text) = self.merge_chunks(line)? else {
            return Ok(None);
        };
        if let Some(limit) = self.max_line_bytes
            && text.len() > limit
        {
            return Err(StudioError::bad_request(format!(
                "output line too long: {} bytes exceeds the {limit} byte limit",
                text.len()
            )));
        }
        let Some(parsed) = parse_line(&text)? else {
            return Ok(None);
        };
        apply(&parsed, &mut self.outputs)?;
        Ok(Some(parsed))
    }

    /// Collected outputs; `null` when the task printed none.
    pub fn outputs(&self) -> &Value {
        &self.outputs
    }

    pub fn into_outputs(self) -> Value {
        self.outputs
    }

    /// Resolve chunk lines. Returns `None` while a chunk is still open.
    fn merge_chunks(&mut self, line: &str) -> StudioResult<Option<String>> {
        if !line.starts_with(CHUNK_PREFIX) {
            return Ok(Some(line.to_string()));
        }
        let Some(captures) = CHUNK.captures(line) else {
            return Err(StudioError::bad_request(format!(
                "line started with {CHUNK_PREFIX} but was not a valid chunk: {line}"
            )));
        };
        let key = captures.get(2).map_or("", |m| m.as_str()).to_string();
        let is_end = captures.get(1).is_some_and(|m| m.as_str() == "_end");
        if is_end {
            let text = self.chunks.remove(&key).unwrap_or_default();
            self.chunk_bytes -= text.len();
            return Ok(Some(text));
        }
        let text = captures.get(3).map_or("", |m| m.as_str());
        let buffered = self.chunks.get(&key).map_or(0, String::len);
        let limit = self.max_line_bytes.unwrap_or(MAX_OPEN_CHUNK_BYTES);
        let total = self.chunk_bytes + text.len();
        if buffered + text.len() > limit || total > MAX_OPEN_CHUNK_BYTES {
            // Drop the whole chunk; its remaining lines start a fresh one.
            self.chunk_bytes -= buffered;
            self.chunks.remove(&key);
            return Err(StudioError::bad_request(format!(
                "chunk {key:?} is too long: open chunks are limited to {limit} bytes"
            )));
        }
        self.chunk_bytes += text.len();
        self.chunks.entry(key).or_default().push_str(text);
        Ok(None)
    }
}

/// Parse a single (already de-chunked) line. Lines without the output
/// prefix yield `None`.
pub fn parse_line(text: &str) -> StudioResult<Option<ParsedLine>> {
    if !text.starts_with(OUTPUT_PREFIX) {
        return Ok(None);
    }
    if let Some(parsed) = parse_legacy(text) {
        return Ok(Some(parsed));
    }
    match parse_path_command(text) {
        Ok(Some(parsed)) => Ok(Some(parsed)),
        Ok(None) => Ok(Some(ParsedLine {
            // A bare prefix with nothing recognisable after it records an
            // empty default output.
            command: OutputCommand::Legacy {
                name: DEFAULT_OUTPUT_NAME.to_string(),
            },
            value: Value::String(String::new()),
        })),
        Err(error) => Err(StudioError::bad_request(format!(
            "line does not match any known {OUTPUT_PREFIX} format: {error}"
        ))),
    }
}

fn parse_legacy(text: &str) -> Option<ParsedLine> {
    let captures = LEGACY_OUTPUT.captures(text)?;
    let name = if let Some(quoted) = captures.get(1) {
        quoted.as_str().trim_matches('"')
    } else if let Some(quoted) = captures.get(2) {
        quoted.as_str().trim_matches('\'')
    } else {
        captures.get(3).map_or("", |m| m.as_str())
    };
    let name = match name.trim() {
        "" => DEFAULT_OUTPUT_NAME,
        name => name,
    };
    let raw_value = captures.get(4).map_or("", |m| m.as_str()).trim();
    let value = serde_json::from_str(raw_value).unwrap_or_else(|_| Value::String(raw_value.to_string()));
    Some(ParsedLine {
        command: OutputCommand::Legacy { name: name.to_string() },
        value,
    })
}

fn parse_path_command(text: &str) -> Result<Option<ParsedLine>, String> {
    let Some(captures) = PATH_OUTPUT.captures(text) else {
        return Ok(None);
    };
    let command = captures.get(1).map_or("", |m| m.as_str());
    let separator = captures.get(2).map_or("", |m| m.as_str());
    let rest = captures.get(3).map_or("", |m| m.as_str());

    let (path, raw_value) = if separator == ":" {
        let (path, consumed) = parse_js_path(rest)?;
        match rest[consumed..].strip_prefix(' ') {
            Some(value) => (path, value.trim()),
            None => return Err("invalid output line".to_string()),
        }
    } else {
        (Vec::new(), rest)
    };
    let value: Value = serde_json::from_str(raw_value).map_err(|error| error.to_string())?;
    let command = if command == "_set" {
        OutputCommand::Set { path }
    } else {
        OutputCommand::Append { path }
    };
    Ok(Some(ParsedLine { command, value }))
}

/// Parse a JavaScript-style path (`a.b[0]["c d"]`) at the start of `input`.
/// Returns the components and the number of bytes consumed; parsing stops at
/// the first space outside brackets.
pub fn parse_js_path(input: &str) -> Result<(Vec<PathComponent>, usize), String> {
    let bytes = input.as_bytes();
    let mut components = Vec::new();
    let mut position = 0;
    let mut expect_identifier = true;

    while position < bytes.len() {
        match bytes[position] {
            b' ' | b'\t' => break,
            b'.' => {
                position += 1;
                expect_identifier = true;
            }
            b'[' => {
                let (component, consumed) = parse_bracket(&input[position..])?;
                components.push(component);
                position += consumed;
                expect_identifier = false;
            }
            _ if expect_identifier => {
                let end = input[position..]
                    .find(['.', '[', ' ', '\t'])
                    .map_or(input.len(), |offset| position + offset);
                components.push(PathComponent::Key(input[position..end].to_string()));
                position = end;
                expect_identifier = false;
            }
            other => return Err(format!("unexpected character {:?} in path", other as char)),
        }
    }
    Ok((components, position))
}

fn parse_bracket(input: &str) -> Result<(PathComponent, usize), String> {
    let inner = &input[1..];
    let Some(quote) = inner.chars().next().filter(|c| *c == '"' || *c == '\'') else {
        let end = inner.find(']').ok_or("unterminated [ in path")?;
        let index = inner[..end]
            .trim()
            .parse::<usize>()
            .map_err(|_| format!("invalid array index {:?}", &inner[..end]))?;
        return Ok((PathComponent::Index(index), end + 2));
    };

    let mut key = String::new();
    let mut escaped = false;
    for (offset, c) in inner.char_indices().skip(1) {
        if escaped {
            key.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            let after = offset + c.len_utf8();
            if !inner[after..].starts_with(']') {
                return Err("expected ] after quoted key".to_string());
            }
            return Ok((PathComponent::Key(key), 1 + after + 1));
        } else {
            key.push(c);
        }
    }
    Err("unterminated quoted key in path".to_string())
}

/// Apply a parsed command to the accumulated outputs.
pub fn apply(line: &ParsedLine, outputs: &mut Value) -> StudioResult<()> {
    let invalid = |message: &str| StudioError::bad_request(format!("applying output: {message}"));
    match &line.command {
        OutputCommand::Legacy { name } => {
            if outputs.is_null() {
                *outputs = Value::Object(Map::new());
            }
            let object = outputs
                .as_object_mut()
                .ok_or_else(|| invalid("expected json object at top level"))?;
            let entry = object.entry(name.clone()).or_insert_with(|| Value::Array(Vec::new()));
            entry
                .as_array_mut()
                .ok_or_else(|| invalid("expected array"))?
                .push(line.value.clone());
        }
        OutputCommand::Set { path } => {
            let Some((last, parents)) = path.split_last() else {
                *outputs = line.value.clone();
                return Ok(());
            };
            let parent = navigate(outputs, parents).map_err(|message| invalid(&message))?;
            *slot(parent, last).map_err(|message| invalid(&message))? = line.value.clone();
        }
        OutputCommand::Append { path } => {
            let target = match path.split_last() {
                None => outputs,
                Some((last, parents)) => {
                    let parent = navigate(outputs, parents).map_err(|message| invalid(&message))?;
                    slot(parent, last).map_err(|message| invalid(&message))?
                }
            };
            if target.is_null() {
                *target = Value::Array(Vec::new());
            }
            target
                .as_array_mut()
                .ok_or_else(|| invalid("expected array at append point"))?
                .push(line.value.clone());
        }
    }
    Ok(())
}

fn navigate<'a>(mut current: &'a mut Value, path: &[PathComponent]) -> Result<&'a mut Value, String> {
    for component in path {
        current = match component {
            PathComponent::Key(key) => current
                .as_object_mut()
                .ok_or("expected object")?
                .get_mut(key)
                .ok_or("could not find value in path")?,
            PathComponent::Index(index) => current
                .as_array_mut()
                .ok_or("expected array")?
                .get_mut(*index)
                .ok_or("array had too few elements")?,
        };
    }
    Ok(current)
}

/// The value addressed by `component` inside `parent`. Object keys are
/// created on demand; array slots must already exist.
fn slot<'a>(parent: &'a mut Value, component: &PathComponent) -> Result<&'a mut Value, String> {
    match component {
        PathComponent::Key(key) => {
            let object = parent.as_object_mut().ok_or("expected object")?;
            Ok(object.entry(key.clone()).or_insert(Value::Null))
        }
        PathComponent::Index(index) => parent
            .as_array_mut()
            .ok_or("expected array")?
            .get_mut(*index)
            .ok_or_else(|| "array had too few elements".to_string()),
    }
}
