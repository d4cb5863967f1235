//! In-memory registry of local runs.
//!
//! Every mutation goes through [`RunStore::update`], which applies the
//! mutator to a copy of the run under the store-wide lock and commits it only
//! when the mutator succeeds. Runs are never persisted.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{Map, Value};
use studio_types::{Prompt, Run, RunStatus, Sleep, StudioError, StudioResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct RunRecord {
    run: Run,
    cancel: Option<CancellationToken>,
}

#[derive(Default)]
struct StoreState {
    runs: HashMap<String, RunRecord>,
    /// Run ids in insertion order.
    order: Vec<String>,
    /// Task key to run ids, in insertion order.
    by_task: HashMap<String, Vec<String>>,
    /// Parent run id to child run ids, in insertion order.
    children: HashMap<String, Vec<String>>,
}

impl StoreState {
    fn record_mut(&mut self, run_id: &str) -> StudioResult<&mut RunRecord> {
        self.runs.get_mut(run_id).ok_or_else(|| not_found(run_id))
    }

    fn collect(&self, ids: impl Iterator<Item = impl AsRef<str>>) -> Vec<Run> {
        ids.filter_map(|id| self.runs.get(id.as_ref()).map(|record| record.run.clone()))
            .collect()
    }
}

fn not_found(run_id: &str) -> StudioError {
    StudioError::not_found(format!("run with id {run_id:?} not found"))
}

/// Shared handle to the run registry. Clones refer to the same store.
#[derive(Clone, Default)]
pub struct RunStore {
    state: Arc<Mutex<StoreState>>,
}

impl std::fmt::Debug for RunStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let runs = self.state.lock().map(|state| state.runs.len()).unwrap_or_default();
        f.debug_struct("RunStore").field("runs", &runs).finish()
    }
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().expect("run store lock poisoned")
    }

    /// Register a run under `task_key`. Runs with a parent are also recorded
    /// as that parent's children.
    pub fn add(&self, task_key: &str, run_id: &str, run: Run) -> StudioResult<()> {
        self.add_with_cancellation(task_key, run_id, run, None)
    }

    /// [`RunStore::add`], attaching the token [`RunStore::cancel_run`] fires.
    pub fn add_with_cancellation(
        &self,
        task_key: &str,
        run_id: &str,
        mut run: Run,
        cancel: Option<CancellationToken>,
    ) -> StudioResult<()> {
        let mut state = self.lock();
        if state.runs.contains_key(run_id) {
            return Err(StudioError::bad_request(format!("run with id {run_id:?} already exists")));
        }
        run.run_id = run_id.to_string();
        if let Some(parent_id) = &run.parent_id {
            state
                .children
                .entry(parent_id.clone())
                .or_default()
                .push(run_id.to_string());
        }
        state.by_task.entry(task_key.to_string()).or_default().push(run_id.to_string());
        state.order.push(run_id.to_string());
        state.runs.insert(run_id.to_string(), RunRecord { run, cancel });
        debug!(run_id = %run_id, task = %task_key, "registered run");
        Ok(())
    }

    pub fn get(&self, run_id: &str) -> Option<Run> {
        self.lock().runs.get(run_id).map(|record| record.run.clone())
    }

    /// Apply `mutate` atomically. Nothing is committed when it fails, and a
    /// run that is already terminal cannot change status.
    pub fn update<F>(&self, run_id: &str, mutate: F) -> StudioResult<Run>
    where
        F: FnOnce(&mut Run) -> StudioResult<()>,
    {
        let mut state = self.lock();
        let record = state.record_mut(run_id)?;
        let mut working = record.run.clone();
        mutate(&mut working)?;
        let previous = record.run.status;
        if previous.is_terminal() && working.status != previous {
            return Err(StudioError::bad_request(format!(
                "run {run_id:?} is already {previous} and cannot become {}",
                working.status
            )));
        }
        record.run = working;
        Ok(record.run.clone())
    }

    /// All runs descended from `run_id`, breadth first in insertion order.
    pub fn get_descendants(&self, run_id: &str) -> Vec<Run> {
        let state = self.lock();
        let mut descendants = Vec::new();
        let mut seen = HashSet::from([run_id]);
        let mut queue: VecDeque<&str> = VecDeque::from([run_id]);
        while let Some(current) = queue.pop_front() {
            for child in state.children.get(current).into_iter().flatten() {
                if !seen.insert(child.as_str()) {
                    continue;
                }
                if let Some(record) = state.runs.get(child) {
                    descendants.push(record.run.clone());
                }
                queue.push_back(child.as_str());
            }
        }
        descendants
    }

    /// Runs of `task_key`, newest first.
    pub fn get_run_history(&self, task_key: &str) -> Vec<Run> {
        let state = self.lock();
        match state.by_task.get(task_key) {
            Some(ids) => state.collect(ids.iter().rev()),
            None => Vec::new(),
        }
    }

    /// Every run, newest first.
    pub fn list_runs(&self) -> Vec<Run> {
        let state = self.lock();
        state.collect(state.order.iter().rev())
    }

    /// Cancel a running run on behalf of `actor`.
    pub fn cancel_run(&self, run_id: &str, actor: &str) -> StudioResult<Run> {
        let mut state = self.lock();
        let record = state.record_mut(run_id)?;
        if record.run.status != RunStatus::Running {
            return Err(StudioError::bad_request(format!(
                "run {run_id:?} cannot be cancelled because it is {}",
                record.run.status
            )));
        }
        record.run.mark_cancelled(actor);
        if let Some(cancel) = &record.cancel {
            cancel.cancel();
        }
        info!(run_id = %run_id, actor = %actor, "cancelled run");
        Ok(record.run.clone())
    }

    /// Cancel every run still in progress, returning how many were
    /// cancelled.
    pub fn cancel_all(&self, actor: &str) -> usize {
        let running: Vec<String> = {
            let state = self.lock();
            state
                .order
                .iter()
                .filter(|id| state.runs.get(*id).is_some_and(|record| record.run.status == RunStatus::Running))
                .cloned()
                .collect()
        };
        running
            .iter()
            .filter(|run_id| self.cancel_run(run_id, actor).is_ok())
            .count()
    }

    pub fn create_prompt(&self, run_id: &str, prompt: Prompt) -> StudioResult<Prompt> {
        let created = prompt.clone();
        self.update(run_id, |run| {
            ensure_running(run)?;
            if run.prompts.iter().any(|existing| existing.id == prompt.id) {
                return Err(StudioError::bad_request(format!("prompt with id {:?} already exists", prompt.id)));
            }
            run.prompts.push(prompt);
            run.refresh_waiting_for_user();
            Ok(())
        })?;
        Ok(created)
    }

    /// Record the values submitted for a prompt. Prompts accept exactly one
    /// submission.
    pub fn submit_prompt(
        &self,
        run_id: &str,
        prompt_id: &str,
        values: Map<String, Value>,
        actor: &str,
    ) -> StudioResult<Prompt> {
        let run = self.update(run_id, |run| {
            let prompt = run
                .prompts
                .iter_mut()
                .find(|prompt| prompt.id == prompt_id)
                .ok_or_else(|| StudioError::not_found(format!("prompt with id {prompt_id:?} not found")))?;
            if prompt.is_submitted() {
                return Err(StudioError::bad_request(format!("prompt {prompt_id:?} was already submitted")));
            }
            prompt.values = Some(values);
            prompt.submitted_by = Some(actor.to_string());
            prompt.submitted_at = Some(Utc::now());
            run.refresh_waiting_for_user();
            Ok(())
        })?;
        find_prompt(&run, prompt_id)
    }

    pub fn create_sleep(&self, run_id: &str, sleep: Sleep) -> StudioResult<Sleep> {
        let created = sleep.clone();
        self.update(run_id, |run| {
            ensure_running(run)?;
            if run.sleeps.iter().any(|existing| existing.id == sleep.id) {
                return Err(StudioError::bad_request(format!("sleep with id {:?} already exists", sleep.id)));
            }
            run.sleeps.push(sleep);
            Ok(())
        })?;
        Ok(created)
    }

    /// Skip a sleep. Sleeps can be skipped at most once.
    pub fn skip_sleep(&self, run_id: &str, sleep_id: &str, actor: &str) -> StudioResult<Sleep> {
        let run = self.update(run_id, |run| {
            let sleep = run
                .sleeps
                .iter_mut()
                .find(|sleep| sleep.id == sleep_id)
                .ok_or_else(|| StudioError::not_found(format!("sleep with id {sleep_id:?} not found")))?;
            if sleep.is_skipped() {
                return Err(StudioError::bad_request(format!("sleep {sleep_id:?} was already skipped")));
            }
            sleep.skipped_at = Some(Utc::now());
            sleep.skipped_by = Some(actor.to_string());
            Ok(())
        })?;
        run.sleeps
            .into_iter()
            .find(|sleep| sleep.id == sleep_id)
            .ok_or_else(|| StudioError::not_found(format!("sleep with id {sleep_id:?} not found")))
    }

    pub fn list_prompts(&self, run_id: &str) -> StudioResult<Vec<Prompt>> {
        self.get(run_id).map(|run| run.prompts).ok_or_else(|| not_found(run_id))
    }

    pub fn list_sleeps(&self, run_id: &str) -> StudioResult<Vec<Sleep>> {
        self.get(run_id).map(|run| run.sleeps).ok_or_else(|| not_found(run_id))
    }
}

fn ensure_running(run: &Run) -> StudioResult<()> {
    if run.status.is_terminal() {
        return Err(StudioError::bad_request(format!(
            "run {:?} is already {}",
            run.run_id, run.status
        )));
    }
    Ok(())
}

fn find_prompt(run: &Run, prompt_id: &str) -> StudioResult<Prompt> {
    run.prompts
        .iter()
        .find(|prompt| prompt.id == prompt_id)
        .cloned()
        .ok_or_else(|| StudioError::not_found(format!("prompt with id {prompt_id:?} not found")))
}
