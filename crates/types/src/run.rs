//! Run records and the pauses (prompts and sleeps) a run can block on.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ParamValues;

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(label)
    }
}

/// Request payload understood by the builtins binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StdApiRequest {
    pub namespace: String,
    pub name: String,
    pub request: Map<String, Value>,
}

/// A point where a run waits for structured human input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id: String,
    pub run_id: String,
    /// Parameter schema the submitted values must satisfy.
    pub schema: Value,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub values: Option<Map<String, Value>>,
    #[serde(default)]
    pub submitted_by: Option<String>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Prompt {
    pub fn new(id: impl Into<String>, run_id: impl Into<String>, schema: Value) -> Self {
        Self {
            id: id.into(),
            run_id: run_id.into(),
            schema,
            description: None,
            created_at: Utc::now(),
            values: None,
            submitted_by: None,
            submitted_at: None,
        }
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted_at.is_some()
    }
}

/// A timed pause inside a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sleep {
    pub id: String,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub until: DateTime<Utc>,
    #[serde(default)]
    pub skipped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub skipped_by: Option<String>,
}

impl Sleep {
    pub fn new(id: impl Into<String>, run_id: impl Into<String>, duration_secs: u64) -> Self {
        let created_at = Utc::now();
        // Durations past the representable range sleep until the end of time.
        let until = i64::try_from(duration_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|duration| created_at.checked_add_signed(duration))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id: id.into(),
            run_id: run_id.into(),
            created_at,
            duration_secs,
            until,
            skipped_at: None,
            skipped_by: None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped_at.is_some()
    }
}

/// One local execution attempt of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub run_id: String,
    pub task_id: String,
    pub task_slug: String,
    #[serde(default)]
    pub task_name: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub creator_id: String,
    #[serde(default)]
    pub param_values: ParamValues,
    #[serde(default)]
    pub outputs: Value,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub remote: bool,
    #[serde(default)]
    pub prompts: Vec<Prompt>,
    #[serde(default)]
    pub sleeps: Vec<Sleep>,
    #[serde(default)]
    pub is_waiting_for_user: bool,
    /// Alias to resource id for every resource attached to the run.
    #[serde(default)]
    pub resources: IndexMap<String, String>,
    #[serde(default)]
    pub std_api_request: Option<StdApiRequest>,
    #[serde(default)]
    pub succeeded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_by: Option<String>,
}

impl Run {
    /// A freshly started run in the `Running` state.
    pub fn new(run_id: impl Into<String>, task_slug: impl Into<String>) -> Self {
        let task_slug = task_slug.into();
        Self {
            run_id: run_id.into(),
            task_id: task_slug.clone(),
            task_name: task_slug.clone(),
            task_slug,
            status: RunStatus::Running,
            created_at: Utc::now(),
            creator_id: String::new(),
            param_values: ParamValues::new(),
            outputs: Value::Null,
            parent_id: None,
            remote: false,
            prompts: Vec::new(),
            sleeps: Vec::new(),
            is_waiting_for_user: false,
            resources: IndexMap::new(),
            std_api_request: None,
            succeeded_at: None,
            failed_at: None,
            cancelled_at: None,
            cancelled_by: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Recompute whether any prompt is still waiting for a submission.
    pub fn refresh_waiting_for_user(&mut self) {
        self.is_waiting_for_user = self.prompts.iter().any(|prompt| !prompt.is_submitted());
    }

    /// Record a successful completion with the produced outputs.
    pub fn mark_succeeded(&mut self, outputs: Value) {
        self.status = RunStatus::Succeeded;
        self.outputs = outputs;
        self.succeeded_at = Some(Utc::now());
        self.is_waiting_for_user = false;
    }

    /// Record a cancellation by `actor`.
    pub fn mark_cancelled(&mut self, actor: impl Into<String>) {
        self.status = RunStatus::Cancelled;
        self.cancelled_at = Some(Utc::now());
        self.cancelled_by = Some(actor.into());
        self.is_waiting_for_user = false;
    }

    /// Record a failure; the message becomes the run's `error` output.
    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.status = RunStatus::Failed;
        let mut outputs = Map::new();
        outputs.insert("error".into(), Value::String(message.into()));
        self.outputs = Value::Object(outputs);
        self.failed_at = Some(Utc::now());
        self.is_waiting_for_user = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_deadlines_saturate() {
        let sleep = Sleep::new("slp1", "run1", 90);
        assert_eq!(sleep.until - sleep.created_at, TimeDelta::seconds(90));

        for duration_secs in [10_000_000_000_000, i64::MAX as u64, u64::MAX] {
            let sleep = Sleep::new("slp2", "run1", duration_secs);
            assert_eq!(sleep.until, DateTime::<Utc>::MAX_UTC);
            assert_eq!(sleep.duration_secs, duration_secs);
        }
    }

    #[test]
    fn only_running_is_non_terminal() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn waiting_for_user_tracks_unsubmitted_prompts() {
        let mut run = Run::new("run1", "hello");
        run.prompts.push(Prompt::new("pmt1", "run1", Value::Null));
        run.refresh_waiting_for_user();
        assert!(run.is_waiting_for_user);

        run.prompts[0].submitted_at = Some(Utc::now());
        run.refresh_waiting_for_user();
        assert!(!run.is_waiting_for_user);
    }

    #[test]
    fn failure_records_error_output() {
        let mut run = Run::new("run1", "hello");
        run.mark_failed("boom");
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.outputs["error"], "boom");
        assert!(run.failed_at.is_some());
    }
}
