use std::env;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use studio_types::{ConfigVar, RawResource, StudioError, StudioResult};
use tracing::debug;

use crate::{Env, GetResourceRequest, RemoteClient, RemoteRun, RunTaskRequest};

/// Environment variable overriding the API host.
pub const API_HOST_ENV: &str = "AIRPLANE_API_HOST";
/// Environment variable carrying the API key.
pub const API_KEY_ENV: &str = "AIRPLANE_API_KEY";
pub const DEFAULT_API_HOST: &str = "https://api.airplane.dev";

const API_KEY_HEADER: &str = "X-Airplane-API-Key";
/// Hostnames allowed for local development regardless of scheme.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

/// Thin wrapper around a configured `reqwest::Client` for platform API access.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    pub base_url: String,
    pub http: Client,
    pub user_agent: String,
}

impl HttpRemoteClient {
    /// Construct a client from `AIRPLANE_API_HOST` and `AIRPLANE_API_KEY`.
    ///
    /// Returns `Ok(None)` when no API key is configured; callers fall back to
    /// an offline client in that case.
    pub fn from_env() -> Result<Option<Self>> {
        let Some(api_key) = env::var(API_KEY_ENV).ok().filter(|key| !key.trim().is_empty()) else {
            return Ok(None);
        };
        let base_url = env::var(API_HOST_ENV).unwrap_or_else(|_| DEFAULT_API_HOST.to_string());
        Self::new(&base_url, &api_key).map(Some)
    }

    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        validate_base_url(base_url)?;

        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(
            API_KEY_HEADER,
            header::HeaderValue::from_str(api_key.trim()).context("API key is not a valid header value")?,
        );
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(30))
            .build()
            .context("build http client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            user_agent: format!("studio/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS),
        })
    }

    /// Build a request for a method and API-relative path.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "building request");

        self.http.request(method, url).header(header::USER_AGENT, &self.user_agent)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> StudioResult<T> {
        let response = request.send().await.map_err(|error| StudioError::upstream(what, error))?;
        decode_response(response, what).await
    }
}

async fn decode_response<T: DeserializeOwned>(response: Response, what: &str) -> StudioResult<T> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(StudioError::not_found(format!("{what}: not found")));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StudioError::upstream(what, format!("HTTP {status}: {}", body.trim())));
    }
    response
        .json::<T>()
        .await
        .map_err(|error| StudioError::internal(format!("{what}: decoding response"), error))
}

#[derive(Deserialize)]
struct ListResourcesResponse {
    #[serde(default)]
    resources: Vec<RawResource>,
}

#[derive(Deserialize)]
struct GetResourceResponse {
    resource: RawResource,
}

#[derive(Deserialize)]
struct ListConfigsResponse {
    #[serde(default)]
    configs: Vec<ConfigVar>,
}

#[derive(Deserialize)]
struct GetConfigResponse {
    config: ConfigVar,
}

#[derive(Deserialize)]
struct ListEnvsResponse {
    #[serde(default)]
    envs: Vec<Env>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunTaskResponse {
    #[serde(alias = "runID")]
    run_id: String,
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn list_resources(&self, env_slug: &str) -> StudioResult<Vec<RawResource>> {
        let request = self
            .request(Method::GET, "/v0/resources/list")
            .query(&[("envSlug", env_slug)]);
        let response: ListResourcesResponse = self.send(request, "listing resources").await?;
        Ok(response.resources)
    }

    async fn get_resource(&self, lookup: &GetResourceRequest) -> StudioResult<RawResource> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(id) = &lookup.id {
            query.push(("id", id.clone()));
        }
        if let Some(slug) = &lookup.slug {
            query.push(("slug", slug.clone()));
        }
        if let Some(env_slug) = &lookup.env_slug {
            query.push(("envSlug", env_slug.clone()));
        }
        query.push(("includeSensitiveData", lookup.include_sensitive_data.to_string()));

        let request = self.request(Method::GET, "/v0/resources/get").query(&query);
        let response: GetResourceResponse = self.send(request, "getting resource").await?;
        Ok(response.resource)
    }

    async fn list_configs(&self, env_slug: &str) -> StudioResult<Vec<ConfigVar>> {
        let request = self.request(Method::GET, "/v0/configs/list").query(&[("envSlug", env_slug)]);
        let response: ListConfigsResponse = self.send(request, "listing configs").await?;
        Ok(response.configs)
    }

    async fn get_config(&self, name: &str, tag: &str, env_slug: Option<&str>) -> StudioResult<ConfigVar> {
        let mut query = vec![("name", name), ("tag", tag)];
        if let Some(env_slug) = env_slug {
            query.push(("envSlug", env_slug));
        }
        let request = self.request(Method::GET, "/v0/configs/get").query(&query);
        let response: GetConfigResponse = self.send(request, "getting config").await?;
        Ok(response.config)
    }

    async fn list_envs(&self) -> StudioResult<Vec<Env>> {
        let request = self.request(Method::GET, "/v0/envs/list");
        let response: ListEnvsResponse = self.send(request, "listing environments").await?;
        Ok(response.envs)
    }

    async fn run_task(&self, run: &RunTaskRequest) -> StudioResult<String> {
        let request = self.request(Method::POST, "/v0/tasks/execute").json(&json!({
            "slug": run.task_slug,
            "paramValues": run.param_values,
            "envSlug": run.env_slug,
        }));
        let response: RunTaskResponse = self.send(request, "executing task remotely").await?;
        Ok(response.run_id)
    }

    async fn get_run(&self, run_id: &str) -> StudioResult<RemoteRun> {
        let request = self.request(Method::GET, "/v0/runs/get").query(&[("id", run_id)]);
        self.send(request, "getting run").await
    }
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules:
/// - `localhost` or `127.0.0.1`: any scheme is allowed
/// - otherwise: scheme must be HTTPS
fn validate_base_url(base: &str) -> Result<()> {
    let parsed_base_url = Url::parse(base).map_err(|e| anyhow!("Invalid {API_HOST_ENV} URL '{}': {}", base, e))?;

    let host_name = parsed_base_url
        .host_str()
        .ok_or_else(|| anyhow!("{API_HOST_ENV} must include a host"))?;

    if LOCALHOST_DOMAINS
        .iter()
        .any(|&allowed| host_name.eq_ignore_ascii_case(allowed))
    {
        return Ok(());
    }

    if parsed_base_url.scheme() != "https" {
        return Err(anyhow!(
            "{API_HOST_ENV} must use https for non-localhost hosts; got '{}://'",
            parsed_base_url.scheme()
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_may_use_plain_http() {
        assert!(validate_base_url("http://127.0.0.1:4000").is_ok());
        assert!(validate_base_url("http://localhost").is_ok());
    }

    #[test]
    fn remote_hosts_require_https() {
        let error = validate_base_url("http://api.example.com").unwrap_err();
        assert!(error.to_string().contains("https"));
        assert!(validate_base_url("https://api.example.com").is_ok());
        assert!(validate_base_url("not a url").is_err());
    }

    #[test]
    fn missing_api_key_means_offline() {
        temp_env::with_var(API_KEY_ENV, None::<&str>, || {
            assert!(HttpRemoteClient::from_env().unwrap().is_none());
        });
    }

    #[test]
    fn client_strips_trailing_slash() {
        let client = HttpRemoteClient::new("https://api.example.com/", "key").unwrap();
        assert_eq!(client.base_url, "https://api.example.com");
    }
}
