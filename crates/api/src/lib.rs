//! Remote platform API client.
//!
//! The studio consumes the cloud platform through the [`RemoteClient`] trait:
//! resource and config listing for a fallback environment, single resource
//! lookups (optionally including credentials), environment listing and remote
//! task execution. [`HttpRemoteClient`] is the reqwest-backed implementation;
//! tests and offline sessions substitute their own.
//!
//! Resources are returned as [`RawResource`] records. Turning them into typed
//! resources is the job of the resources crate, which decodes wire payloads
//! and dev config entries through the same factory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use studio_types::{ConfigVar, ParamValues, RawResource, RunStatus, StudioResult};

mod client;

pub use client::{API_HOST_ENV, API_KEY_ENV, DEFAULT_API_HOST, HttpRemoteClient};

/// Lookup key for [`RemoteClient::get_resource`]. Exactly one of `id` or
/// `slug` is expected to be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetResourceRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_slug: Option<String>,
    /// Credentials are only returned when this is set.
    pub include_sensitive_data: bool,
}

impl GetResourceRequest {
    pub fn by_slug(slug: impl Into<String>, env_slug: Option<&str>) -> Self {
        Self {
            slug: Some(slug.into()),
            env_slug: env_slug.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn by_id(id: impl Into<String>, env_slug: Option<&str>) -> Self {
        Self {
            id: Some(id.into()),
            env_slug: env_slug.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn with_sensitive_data(mut self) -> Self {
        self.include_sensitive_data = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Env {
    pub id: String,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTaskRequest {
    pub task_slug: String,
    pub param_values: ParamValues,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_slug: Option<String>,
}

/// Minimal view of a run executed by the platform.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRun {
    pub id: String,
    #[serde(default)]
    pub task_id: String,
    /// Platform status label (for example `Queued`, `Active`, `Succeeded`).
    pub status: String,
}

impl RemoteRun {
    /// Map the platform label onto the local lifecycle, treating queued and
    /// active runs as running.
    pub fn local_status(&self) -> RunStatus {
        match self.status.as_str() {
            "Succeeded" => RunStatus::Succeeded,
            "Failed" => RunStatus::Failed,
            "Cancelled" => RunStatus::Cancelled,
            _ => RunStatus::Running,
        }
    }
}

#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// All resources visible in `env_slug` (credentials excluded).
    async fn list_resources(&self, env_slug: &str) -> StudioResult<Vec<RawResource>>;

    /// A single resource. Returns a `NotFound` error when it does not exist.
    async fn get_resource(&self, request: &GetResourceRequest) -> StudioResult<RawResource>;

    async fn list_configs(&self, env_slug: &str) -> StudioResult<Vec<ConfigVar>>;

    async fn get_config(&self, name: &str, tag: &str, env_slug: Option<&str>) -> StudioResult<ConfigVar>;

    async fn list_envs(&self) -> StudioResult<Vec<Env>>;

    async fn run_task(&self, request: &RunTaskRequest) -> StudioResult<String>;

    async fn get_run(&self, run_id: &str) -> StudioResult<RemoteRun>;
}

/// Remote client used when no API key is configured: every lookup misses and
/// listings are empty, so resolution falls back to local declarations only.
#[derive(Debug, Clone, Default)]
pub struct OfflineClient;

#[async_trait]
impl RemoteClient for OfflineClient {
    async fn list_resources(&self, _env_slug: &str) -> StudioResult<Vec<RawResource>> {
        Ok(Vec::new())
    }

    async fn get_resource(&self, request: &GetResourceRequest) -> StudioResult<RawResource> {
        let key = request.slug.as_deref().or(request.id.as_deref()).unwrap_or_default();
        Err(studio_types::StudioError::not_found(format!("resource {key:?} not found (offline)")))
    }

    async fn list_configs(&self, _env_slug: &str) -> StudioResult<Vec<ConfigVar>> {
        Ok(Vec::new())
    }

    async fn get_config(&self, name: &str, _tag: &str, _env_slug: Option<&str>) -> StudioResult<ConfigVar> {
        Err(studio_types::StudioError::not_found(format!("config {name:?} not found (offline)")))
    }

    async fn list_envs(&self) -> StudioResult<Vec<Env>> {
        Ok(Vec::new())
    }

    async fn run_task(&self, request: &RunTaskRequest) -> StudioResult<String> {
        Err(studio_types::StudioError::unsupported(format!(
            "cannot run task {:?} remotely without an API key; set {API_KEY_ENV}",
            request.task_slug
        )))
    }

    async fn get_run(&self, run_id: &str) -> StudioResult<RemoteRun> {
        Err(studio_types::StudioError::not_found(format!("run {run_id:?} not found (offline)")))
    }
}
