//! Shared type definitions for the local studio.
//!
//! Everything in here is plain data: run records and their pauses, the task
//! kind enumeration used by runtime dispatch, config variables, and the error
//! taxonomy shared by every component crate.

use std::{error::Error, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod errors;
pub mod run;

pub use errors::{ErrorClass, StudioError, StudioResult};
pub use run::{Prompt, Run, RunStatus, Sleep, StdApiRequest};

/// A loosely typed resource record as it appears in the dev config file or in
/// a remote API payload. Decoding into a concrete resource kind happens in one
/// place (the resources crate factory).
pub type RawResource = Map<String, Value>;

/// Parameter values supplied to a run, keyed by parameter slug.
pub type ParamValues = Map<String, Value>;

/// Closed set of task kinds the studio knows how to dispatch.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Python,
    Node,
    Shell,
    Image,
    Sql,
    Rest,
    Builtin,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Node => "node",
            Self::Shell => "shell",
            Self::Image => "image",
            Self::Sql => "sql",
            Self::Rest => "rest",
            Self::Builtin => "builtin",
        }
    }

    /// Whether the kind is executed through the builtins binary.
    pub fn is_builtin_backed(&self) -> bool {
        matches!(self, Self::Sql | Self::Rest | Self::Builtin)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = ParseTaskKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" => Ok(Self::Python),
            "node" => Ok(Self::Node),
            "shell" => Ok(Self::Shell),
            "image" => Ok(Self::Image),
            "sql" => Ok(Self::Sql),
            "rest" => Ok(Self::Rest),
            "builtin" => Ok(Self::Builtin),
            other => Err(ParseTaskKindError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTaskKindError(pub String);

impl fmt::Display for ParseTaskKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown task kind '{}'; expected one of python, node, shell, image, sql, rest, builtin",
            self.0
        )
    }
}

impl Error for ParseTaskKindError {}

/// A config variable, either declared locally or fetched from an environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigVar {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub is_secret: bool,
}

/// Splits a `name:tag` config reference. A reference without a tag yields an
/// empty tag.
pub fn parse_config_name(reference: &str) -> Result<(String, String), StudioError> {
    let mut parts = reference.splitn(3, ':');
    let name = parts.next().unwrap_or_default();
    let tag = parts.next().unwrap_or_default();
    if name.is_empty() || parts.next().is_some() {
        return Err(StudioError::bad_request(format!(
            "invalid config name {reference:?}: expected a name optionally followed by :tag"
        )));
    }
    Ok((name.to_string(), tag.to_string()))
}

/// A value tagged with where it came from: the local dev config or a remote
/// environment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithEnv<T> {
    #[serde(flatten)]
    pub value: T,
    pub remote: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_slug: Option<String>,
}

impl<T> WithEnv<T> {
    pub fn local(value: T) -> Self {
        Self {
            value,
            remote: false,
            env_slug: None,
        }
    }

    pub fn remote(value: T, env_slug: Option<String>) -> Self {
        Self {
            value,
            remote: true,
            env_slug,
        }
    }
}

pub type ConfigWithEnv = WithEnv<ConfigVar>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_kind_parses_case_insensitively() {
        assert_eq!("SQL".parse::<TaskKind>().unwrap(), TaskKind::Sql);
        assert_eq!(" node ".parse::<TaskKind>().unwrap(), TaskKind::Node);
        let err = "deno".parse::<TaskKind>().unwrap_err();
        assert!(err.to_string().contains("deno"));
    }

    #[test]
    fn config_name_splits_optional_tag() {
        assert_eq!(parse_config_name("db_url").unwrap(), ("db_url".into(), String::new()));
        assert_eq!(parse_config_name("db_url:prod").unwrap(), ("db_url".into(), "prod".into()));
        assert!(parse_config_name(":prod").is_err());
        assert!(parse_config_name("a:b:c").is_err());
    }
}
