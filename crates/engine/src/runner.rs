//! Local run orchestration.
//!
//! A run goes through resource resolution, runtime selection, command
//! preparation (which installs the builtins binary for builtin-backed
//! kinds) and execution. Every step after registration reports into the
//! [`RunStore`]; failures fail the run rather than the caller.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use studio_api::{RemoteClient, RunTaskRequest};
use studio_builtins::BuiltinsClient;
use studio_resources::{DevConfig, alias_to_resource_id, generate_alias_to_resource_map, merge_remote_resources};
use studio_runtime::{ExecuteOptions, ExecutionOutcome, PrepareRunOptions, RuntimeRegistry, execute, registry};
use studio_types::{ParamValues, Run, RunStatus, StudioError, StudioResult};
use studio_util::generate_run_id;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::env::{RunEnvContext, build_task_env};
use crate::store::RunStore;
use crate::task::TaskDefinition;

/// Actor recorded when a run is cancelled because the studio is shutting down.
pub const SHUTDOWN_ACTOR: &str = "studio-shutdown";

/// Settings shared by every run started by a [`LocalRunner`].
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Remote environment consulted for resources and configs the dev config
    /// does not declare. Tasks that cannot run locally run there instead.
    pub fallback_env: Option<String>,
    /// Exposed to tasks as `AIRPLANE_API_HOST`.
    pub api_host: String,
    pub max_output_line_bytes: Option<usize>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            fallback_env: None,
            api_host: studio_api::DEFAULT_API_HOST.to_string(),
            max_output_line_bytes: None,
        }
    }
}

/// Request to run a task once.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub task: TaskDefinition,
    pub param_values: ParamValues,
    pub parent_id: Option<String>,
    pub creator_id: String,
}

impl RunRequest {
    pub fn new(task: TaskDefinition, param_values: ParamValues) -> Self {
        Self {
            task,
            param_values,
            parent_id: None,
            creator_id: String::new(),
        }
    }
}

/// A started run. Local runs complete in the background.
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: String,
    store: RunStore,
    task: Option<JoinHandle<()>>,
}

impl RunHandle {
    /// Wait for a local run to finish and return its final state. Remote
    /// runs return immediately with the state recorded at submission.
    pub async fn wait(self) -> StudioResult<Run> {
        if let Some(task) = self.task {
            task.await
                .map_err(|error| StudioError::internal(format!("waiting for run {}", self.run_id), error))?;
        }
        self.store
            .get(&self.run_id)
            .ok_or_else(|| StudioError::not_found(format!("run with id {:?} not found", self.run_id)))
    }
}

/// Runs tasks locally against the dev config, the remote platform and the
/// builtins binary, recording everything in a [`RunStore`].
#[derive(Clone)]
pub struct LocalRunner {
    store: RunStore,
    dev_config: Arc<DevConfig>,
    remote: Arc<dyn RemoteClient>,
    builtins: Option<Arc<BuiltinsClient>>,
    runtimes: &'static RuntimeRegistry,
    settings: RunnerSettings,
}

impl std::fmt::Debug for LocalRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRunner")
            .field("store", &self.store)
            .field("dev_config", &self.dev_config.path())
            .field("builtins", &self.builtins)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl LocalRunner {
    pub fn new(
        store: RunStore,
        dev_config: Arc<DevConfig>,
        remote: Arc<dyn RemoteClient>,
        builtins: Option<Arc<BuiltinsClient>>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            store,
            dev_config,
            remote,
            builtins,
            runtimes: registry(),
            settings,
        }
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    /// Register a run and start executing it.
    ///
    /// Tasks whose runtime cannot execute locally are submitted to the
    /// fallback environment when one is configured.
    pub async fn start_local_run(&self, request: RunRequest) -> StudioResult<RunHandle> {
        let RunRequest {
            task,
            param_values,
            parent_id,
            creator_id,
        } = request;
        let entrypoint = (!task.entrypoint.as_os_str().is_empty()).then_some(task.entrypoint.as_path());
        let runtime = self.runtimes.lookup(entrypoint, task.kind)?;

        let mut run = Run::new("", task.slug.clone());
        run.task_name = task.name.clone();
        run.param_values = param_values.clone();
        run.parent_id = parent_id;
        run.creator_id = creator_id;

        if !runtime.supports_local_execution() {
            return self.start_remote_run(&task, run).await;
        }

        let run_id = generate_run_id();
        let cancel = CancellationToken::new();
        self.store
            .add_with_cancellation(&task.slug, &run_id, run, Some(cancel.clone()))?;
        info!(run_id = %run_id, task = %task.slug, kind = %task.kind, "starting run");

        let runner = self.clone();
        let task_run_id = run_id.clone();
        let join = tokio::spawn(async move {
            let result = runner.drive(&task_run_id, &task, param_values, cancel).await;
            runner.record_result(&task_run_id, result);
        });

        Ok(RunHandle {
            run_id,
            store: self.store.clone(),
            task: Some(join),
        })
    }

    /// Run a task and wait for it to finish.
    pub async fn run(&self, request: RunRequest) -> StudioResult<Run> {
        self.start_local_run(request).await?.wait().await
    }

    async fn start_remote_run(&self, task: &TaskDefinition, mut run: Run) -> StudioResult<RunHandle> {
        let Some(env_slug) = self.settings.fallback_env.clone() else {
            return Err(StudioError::unsupported(format!(
                "{} tasks cannot be run locally; configure a fallback environment to run {:?} remotely",
                task.kind, task.slug
            )));
        };
        let remote_id = self
            .remote
            .run_task(&RunTaskRequest {
                task_slug: task.slug.clone(),
                param_values: run.param_values.clone(),
                env_slug: Some(env_slug.clone()),
            })
            .await
            .map_err(|error| StudioError::upstream(format!("running {:?} in environment {env_slug:?}", task.slug), error))?;
        info!(run_id = %remote_id, task = %task.slug, env = %env_slug, "submitted run to remote environment");

        run.remote = true;
        self.store.add(&task.slug, &remote_id, run)?;
        Ok(RunHandle {
            run_id: remote_id,
            store: self.store.clone(),
            task: None,
        })
    }

    /// Pull the latest status of a remote run into the store.
    pub async fn sync_remote_run(&self, run_id: &str) -> StudioResult<Run> {
        let remote_run = self.remote.get_run(run_id).await?;
        self.store.update(run_id, |run| {
            if !run.remote {
                return Err(StudioError::bad_request(format!("run {run_id:?} was not executed remotely")));
            }
            if run.status.is_terminal() {
                return Ok(());
            }
            match remote_run.local_status() {
                RunStatus::Running => {}
                RunStatus::Succeeded => run.mark_succeeded(Value::Null),
                RunStatus::Failed => run.mark_failed(format!("remote run {} failed", remote_run.id)),
                RunStatus::Cancelled => run.mark_cancelled("remote"),
            }
            Ok(())
        })
    }

    async fn drive(
        &self,
        run_id: &str,
        task: &TaskDefinition,
        param_values: ParamValues,
        cancel: CancellationToken,
    ) -> StudioResult<ExecutionOutcome> {
        let env_slug = self.settings.fallback_env.as_deref();
        let remote = self.remote.as_ref();

        let merged = merge_remote_resources(&self.dev_config, remote, env_slug).await?;
        let resources = generate_alias_to_resource_map(&task.resources, &merged, env_slug, remote).await?;
        let parent_id = self.store.update(run_id, |run| {
            run.resources = alias_to_resource_id(&resources);
            Ok(())
        })?
        .parent_id;

        let env = build_task_env(
            task,
            &self.dev_config,
            remote,
            RunEnvContext {
                run_id,
                parent_run_id: parent_id.as_deref(),
                api_host: &self.settings.api_host,
                env_slug,
                resources: &resources,
            },
        )
        .await?;

        let entrypoint = resolve_entrypoint(&task.working_dir, &task.entrypoint);
        let runtime = self.runtimes.lookup(
            (!entrypoint.as_os_str().is_empty()).then_some(entrypoint.as_path()),
            task.kind,
        )?;
        let prepared = runtime
            .prepare_run(&PrepareRunOptions {
                path: entrypoint,
                working_dir: task.working_dir.clone(),
                task_slug: task.slug.clone(),
                run_id: run_id.to_string(),
                param_values,
                kind_options: task.kind_options.clone(),
                builtins: self.builtins.clone(),
            })
            .await?;
        if let Some(request) = &prepared.std_api_request {
            self.store.update(run_id, |run| {
                run.std_api_request = Some(request.clone());
                Ok(())
            })?;
        }

        let outcome = execute(ExecuteOptions {
            argv: prepared.argv,
            working_dir: (!task.working_dir.as_os_str().is_empty()).then(|| task.working_dir.clone()),
            env,
            run_id: run_id.to_string(),
            max_output_line_bytes: self.settings.max_output_line_bytes,
            cancel,
            cleanup: prepared.cleanup,
        })
        .await?;

        if outcome.was_killed() && task.kind.is_builtin_backed() {
            if let Some(builtins) = &self.builtins {
                // A killed builtin usually means a corrupt binary; fetch a fresh one for the next run.
                if let Err(error) = builtins.refresh().await {
                    warn!(run_id = %run_id, error = %error, "failed to refresh builtins binary");
                }
            }
        }
        Ok(outcome)
    }

    /// Move the run to its terminal state. Runs already finished (for
    /// example cancelled through the store) are left alone.
    fn record_result(&self, run_id: &str, result: StudioResult<ExecutionOutcome>) {
        let recorded = self.store.update(run_id, |run| {
            if run.status.is_terminal() {
                return Ok(());
            }
            match &result {
                Ok(outcome) if outcome.succeeded() => run.mark_succeeded(outcome.outputs.clone()),
                Ok(outcome) if outcome.cancelled => run.mark_cancelled(SHUTDOWN_ACTOR),
                Ok(outcome) => run.mark_failed(outcome.error_message()),
                Err(error) => run.mark_failed(error.to_string()),
            }
            Ok(())
        });
        match recorded {
            Ok(run) => info!(run_id = %run_id, status = %run.status, "run finished"),
            Err(error) => warn!(run_id = %run_id, error = %error, "failed to record run result"),
        }
    }
}

fn resolve_entrypoint(working_dir: &Path, entrypoint: &Path) -> std::path::PathBuf {
    if entrypoint.as_os_str().is_empty() || entrypoint.is_absolute() {
        entrypoint.to_path_buf()
    } else {
        working_dir.join(entrypoint)
    }
}
