use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use studio_types::{StudioError, StudioResult, TaskKind};

use crate::{BuiltinRuntime, ImageRuntime, NodeRuntime, PythonRuntime, RestRuntime, Runtime, SqlRuntime};

static REGISTRY: Lazy<RuntimeRegistry> = Lazy::new(RuntimeRegistry::with_defaults);

/// The process-wide registry of built-in runtimes.
pub fn registry() -> &'static RuntimeRegistry {
    &REGISTRY
}

/// Maps task kinds and entrypoint extensions to runtimes.
#[derive(Debug, Default)]
pub struct RuntimeRegistry {
    runtimes: Vec<Arc<dyn Runtime>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PythonRuntime));
        registry.register(Arc::new(NodeRuntime));
        registry.register(Arc::new(SqlRuntime));
        registry.register(Arc::new(RestRuntime));
        registry.register(Arc::new(BuiltinRuntime));
        registry.register(Arc::new(ImageRuntime));
        registry
    }

    pub fn register(&mut self, runtime: Arc<dyn Runtime>) {
        self.runtimes.push(runtime);
    }

    /// Runtime for a task. The entrypoint's extension decides when a runtime
    /// of the task's kind claims it; otherwise the kind must map to exactly
    /// one runtime.
    pub fn lookup(&self, path: Option<&Path>, kind: TaskKind) -> StudioResult<Arc<dyn Runtime>> {
        let of_kind: Vec<&Arc<dyn Runtime>> = self.runtimes.iter().filter(|runtime| runtime.kind() == kind).collect();

        if let Some(extension) = path.and_then(|path| path.extension()).and_then(|ext| ext.to_str()) {
            let dotted = format!(".{extension}");
            if let Some(runtime) = of_kind
                .iter()
                .find(|runtime| runtime.extensions().iter().any(|ext| *ext == dotted))
            {
                return Ok(Arc::clone(*runtime));
            }
        }

        match of_kind.as_slice() {
            [runtime] => Ok(Arc::clone(*runtime)),
            [] => Err(StudioError::bad_request(format!("{kind} tasks cannot be run locally: no runtime is registered for them"))),
            _ => Err(StudioError::bad_request(format!(
                "multiple runtimes are registered for {kind} tasks; specify an entrypoint to choose one"
            ))),
        }
    }
}
