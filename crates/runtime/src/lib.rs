//! Runtime dispatch for local task execution.
//!
//! A [`Runtime`] turns "run this task with these parameters" into a concrete
//! argv. Interpreted kinds (Python, Node) write a small shim into a scratch
//! directory that imports the task's entrypoint; builtin-backed kinds (SQL,
//! REST, generic builtins) invoke the builtins binary with a JSON request.
//! The [`RuntimeRegistry`] picks the runtime for a task, and the
//! [`executor`] spawns the resulting command and collects its outputs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use studio_builtins::BuiltinsClient;
use studio_types::{ParamValues, StdApiRequest, StudioError, StudioResult, TaskKind};
use tracing::{debug, warn};

mod builtin;
pub mod executor;
mod image;
mod interpreted;
pub mod outputs;
mod registry;

pub use builtin::{BuiltinRuntime, RestRuntime, SqlRuntime};
pub use executor::{ExecuteOptions, ExecutionOutcome, execute};
pub use image::ImageRuntime;
pub use interpreted::{NodeRuntime, PythonRuntime, find_on_path};
pub use outputs::OutputCollector;
pub use registry::{RuntimeRegistry, registry};

/// Directory, relative to a task root, that holds per-run scratch files.
pub const SCRATCH_DIR_NAME: &str = ".airplane";

/// Everything a runtime needs to build the command for one run.
#[derive(Debug, Clone, Default)]
pub struct PrepareRunOptions {
    /// Entrypoint file. Empty for kinds without one (REST, builtins).
    pub path: PathBuf,
    pub working_dir: PathBuf,
    pub task_slug: String,
    pub run_id: String,
    pub param_values: ParamValues,
    pub kind_options: Map<String, Value>,
    /// Absent when builtins cannot run on this machine.
    pub builtins: Option<Arc<BuiltinsClient>>,
}

impl PrepareRunOptions {
    pub fn kind_option_str(&self, key: &str) -> Option<&str> {
        self.kind_options.get(key).and_then(Value::as_str).filter(|value| !value.is_empty())
    }
}

/// Command for a run plus whatever must be torn down afterwards.
#[derive(Debug, Default)]
pub struct PreparedRun {
    pub argv: Vec<String>,
    pub cleanup: Option<Cleanup>,
    /// Request handed to the builtins binary, for builtin-backed kinds.
    pub std_api_request: Option<StdApiRequest>,
}

/// Removes a run's scratch directory once the run is over.
#[derive(Debug)]
pub struct Cleanup {
    dir: PathBuf,
}

impl Cleanup {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Remove the scratch directory, and its parent when that leaves it
    /// empty.
    pub async fn run(self) -> StudioResult<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                warn!(path = %self.dir.display(), error = %error, "failed to remove run scratch directory");
                return Err(StudioError::internal(
                    format!("removing {}", self.dir.display()),
                    error,
                ));
            }
        }
        if let Some(parent) = self.dir.parent() {
            // Fails while other runs of the same task still hold their directories.
            if tokio::fs::remove_dir(parent).await.is_ok() {
                debug!(path = %parent.display(), "removed empty task scratch directory");
            }
        }
        Ok(())
    }
}

/// One task kind's strategy for running locally.
#[async_trait]
pub trait Runtime: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> TaskKind;

    /// Entrypoint file extensions (with leading dot) this runtime claims.
    fn extensions(&self) -> &'static [&'static str] {
        &[]
    }

    fn supports_local_execution(&self) -> bool {
        true
    }

    /// Build the argv for a run. On error, anything written to disk has
    /// already been removed.
    async fn prepare_run(&self, opts: &PrepareRunOptions) -> StudioResult<PreparedRun>;
}

/// Create `<root>/.airplane/<task-slug>/<run-id>` and return it.
pub(crate) async fn create_scratch_dir(root: &Path, opts: &PrepareRunOptions) -> StudioResult<PathBuf> {
    let task_dir_name = if opts.task_slug.is_empty() { "task" } else { opts.task_slug.as_str() };
    let dir = root.join(SCRATCH_DIR_NAME).join(task_dir_name).join(&opts.run_id);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|error| StudioError::internal(format!("creating {}", dir.display()), error))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cleanup_removes_run_dir_and_empty_task_dir() {
        let root = tempfile::tempdir().unwrap();
        let opts = PrepareRunOptions {
            task_slug: "hello".into(),
            run_id: "run1".into(),
            ..PrepareRunOptions::default()
        };
        let first = create_scratch_dir(root.path(), &opts).await.unwrap();
        let second = create_scratch_dir(
            root.path(),
            &PrepareRunOptions {
                run_id: "run2".into(),
                ..opts.clone()
            },
        )
        .await
        .unwrap();
        assert_eq!(first, root.path().join(".airplane/hello/run1"));

        Cleanup::new(&first).run().await.unwrap();
        assert!(!first.exists());
        assert!(second.exists());

        Cleanup::new(&second).run().await.unwrap();
        assert!(!root.path().join(".airplane/hello").exists());
    }

    #[tokio::test]
    async fn cleanup_tolerates_missing_dir() {
        let root = tempfile::tempdir().unwrap();
        Cleanup::new(root.path().join("task").join("gone")).run().await.unwrap();
    }
}
