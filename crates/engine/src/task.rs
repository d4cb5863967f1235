use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use studio_types::TaskKind;

/// Value of an environment variable declared by a task: either a literal or
/// a reference to a config variable (`name` or `name:tag`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskEnvValue {
    Value(String),
    Config(String),
}

/// The parts of a discovered task definition local execution needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    pub kind: TaskKind,
    /// Entrypoint file; empty for REST and builtin tasks.
    #[serde(default)]
    pub entrypoint: PathBuf,
    #[serde(default)]
    pub working_dir: PathBuf,
    #[serde(default)]
    pub kind_options: Map<String, Value>,
    /// Resource alias to the slug or name of the attached resource.
    #[serde(default)]
    pub resources: IndexMap<String, String>,
    #[serde(default)]
    pub env_vars: IndexMap<String, TaskEnvValue>,
}

impl TaskDefinition {
    pub fn new(slug: impl Into<String>, kind: TaskKind) -> Self {
        let slug = slug.into();
        Self {
            name: slug.clone(),
            slug,
            kind,
            entrypoint: PathBuf::new(),
            working_dir: PathBuf::new(),
            kind_options: Map::new(),
            resources: IndexMap::new(),
            env_vars: IndexMap::new(),
        }
    }

    pub fn with_entrypoint(mut self, entrypoint: impl Into<PathBuf>) -> Self {
        self.entrypoint = entrypoint.into();
        self
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = working_dir.into();
        self
    }

    pub fn with_resource(mut self, alias: impl Into<String>, reference: impl Into<String>) -> Self {
        self.resources.insert(alias.into(), reference.into());
        self
    }

    pub fn with_kind_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kind_options.insert(key.into(), value);
        self
    }
}
