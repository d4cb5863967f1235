//! # Studio Engine
//!
//! Keeps track of the runs started from a local studio session and drives
//! local runs from task definition to terminal status.
//!
//! - **`store`**: the in-memory [`RunStore`] with prompts, sleeps and
//!   cancellation.
//! - **`runner`**: [`LocalRunner`], which resolves resources, builds the task
//!   environment, prepares the command through the runtime registry and
//!   executes it.
//! - **`env`**: the environment a local task process sees.
//! - **`task`**: the task definition consumed by the runner.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use studio_api::OfflineClient;
//! use studio_engine::{LocalRunner, RunRequest, RunStore, RunnerSettings, TaskDefinition};
//! use studio_resources::DevConfig;
//! use studio_types::{ParamValues, TaskKind};
//!
//! # async fn demo() -> studio_types::StudioResult<()> {
//! let dev_config = Arc::new(DevConfig::empty("airplane.dev.yaml"));
//! let runner = LocalRunner::new(RunStore::new(), dev_config, Arc::new(OfflineClient), None, RunnerSettings::default());
//! let task = TaskDefinition::new("hello", TaskKind::Python).with_entrypoint("hello.py");
//! let run = runner.run(RunRequest::new(task, ParamValues::new())).await?;
//! println!("{} finished as {}", run.run_id, run.status);
//! # Ok(())
//! # }
//! ```

pub mod env;
pub mod runner;
pub mod store;
pub mod task;

pub use env::{RunEnvContext, build_task_env};
pub use runner::{LocalRunner, RunHandle, RunRequest, RunnerSettings, SHUTDOWN_ACTOR};
pub use store::RunStore;
pub use task::{TaskDefinition, TaskEnvValue};
