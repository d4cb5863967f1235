//! Environment injected into local task processes.

use indexmap::IndexMap;
use studio_api::RemoteClient;
use studio_resources::{DevConfig, Resource, lookup_config, merge_remote_configs};
use studio_types::{StudioError, StudioResult};
use tracing::debug;

use crate::task::{TaskDefinition, TaskEnvValue};

/// Run-specific inputs to [`build_task_env`].
#[derive(Debug, Clone, Copy)]
pub struct RunEnvContext<'a> {
    pub run_id: &'a str,
    pub parent_run_id: Option<&'a str>,
    pub api_host: &'a str,
    pub env_slug: Option<&'a str>,
    pub resources: &'a IndexMap<String, Resource>,
}

/// Task-declared variables (with config references materialized), then dev
/// config variables, then the `AIRPLANE_*` runtime variables. Later entries
/// win.
pub async fn build_task_env(
    task: &TaskDefinition,
    dev_config: &DevConfig,
    remote: &dyn RemoteClient,
    ctx: RunEnvContext<'_>,
) -> StudioResult<IndexMap<String, String>> {
    let mut env = materialize_task_env(task, dev_config, remote, ctx.env_slug).await?;
    env.extend(dev_config.env_vars());

    let mut resources = serde_json::Map::new();
    for (alias, resource) in ctx.resources {
        resources.insert(alias.clone(), serde_json::Value::Object(resource.to_raw()?));
    }

    let builtin = [
        ("AIRPLANE_API_HOST", ctx.api_host.to_string()),
        ("AIRPLANE_RESOURCES", serde_json::to_string(&resources)?),
        ("AIRPLANE_RESOURCES_VERSION", "2".to_string()),
        ("AIRPLANE_RUN_ID", ctx.run_id.to_string()),
        ("AIRPLANE_PARENT_RUN_ID", ctx.parent_run_id.unwrap_or_default().to_string()),
        ("AIRPLANE_RUNTIME", "dev".to_string()),
        // Local tasks are identified by slug.
        ("AIRPLANE_TASK_ID", task.slug.clone()),
        ("AIRPLANE_TASK_SLUG", task.slug.clone()),
        ("AIRPLANE_TASK_NAME", task.name.clone()),
        ("AIRPLANE_ENV_SLUG", ctx.env_slug.unwrap_or_default().to_string()),
    ];
    env.extend(builtin.into_iter().map(|(key, value)| (key.to_string(), value)));
    Ok(env)
}

async fn materialize_task_env(
    task: &TaskDefinition,
    dev_config: &DevConfig,
    remote: &dyn RemoteClient,
    env_slug: Option<&str>,
) -> StudioResult<IndexMap<String, String>> {
    let references_configs = task.env_vars.values().any(|value| matches!(value, TaskEnvValue::Config(_)));
    let configs = if references_configs {
        merge_remote_configs(dev_config, remote, env_slug).await?
    } else {
        IndexMap::new()
    };

    let mut env = IndexMap::with_capacity(task.env_vars.len());
    for (key, value) in &task.env_vars {
        let resolved = match value {
            TaskEnvValue::Value(value) => value.clone(),
            TaskEnvValue::Config(reference) => {
                let config = lookup_config(&configs, reference).map_err(|_| {
                    let mut message = format!("Config var {reference} not defined in the dev config file");
                    if let Some(env_slug) = env_slug {
                        message.push_str(&format!(" or remotely in env {env_slug}"));
                    }
                    message.push_str(&format!(" (referenced by env var {key})."));
                    StudioError::not_found(message)
                })?;
                if config.remote && config.value.is_secret && config.value.value.is_empty() {
                    debug!(config = %reference, "fetching secret config value");
                    let fetched = remote
                        .get_config(&config.value.name, &config.value.tag, config.env_slug.as_deref())
                        .await
                        .map_err(|error| StudioError::upstream(format!("getting config {reference:?}"), error))?;
                    fetched.value
                } else {
                    config.value.value.clone()
                }
            }
        };
        env.insert(key.clone(), resolved);
    }
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use studio_api::OfflineClient;
    use studio_types::TaskKind;

    fn context<'a>(resources: &'a IndexMap<String, Resource>) -> RunEnvContext<'a> {
        RunEnvContext {
            run_id: "run123",
            parent_run_id: None,
            api_host: "http://127.0.0.1:4000",
            env_slug: None,
            resources,
        }
    }

    #[tokio::test]
    async fn dev_config_overrides_task_values_and_runtime_vars_win() {
        let dir = tempfile::tempdir().unwrap();
        let dev_config = DevConfig::empty(dir.path().join("airplane.dev.yaml"));
        dev_config.set_env_var("SHARED", "from-dev-config").unwrap();
        dev_config.set_env_var("AIRPLANE_RUNTIME", "ignored").unwrap();
        dev_config.set_config_var("API_TOKEN", "secret-token").unwrap();

        let mut task = TaskDefinition::new("hello", TaskKind::Python);
        task.env_vars.insert("SHARED".into(), TaskEnvValue::Value("from-task".into()));
        task.env_vars.insert("ONLY_TASK".into(), TaskEnvValue::Value("task".into()));
        task.env_vars.insert("TOKEN".into(), TaskEnvValue::Config("API_TOKEN".into()));

        let resources = IndexMap::new();
        let env = build_task_env(&task, &dev_config, &OfflineClient, context(&resources))
            .await
            .unwrap();
        assert_eq!(env["SHARED"], "from-dev-config");
        assert_eq!(env["ONLY_TASK"], "task");
        assert_eq!(env["TOKEN"], "secret-token");
        assert_eq!(env["AIRPLANE_RUNTIME"], "dev");
        assert_eq!(env["AIRPLANE_RUN_ID"], "run123");
        assert_eq!(env["AIRPLANE_TASK_SLUG"], "hello");
        assert_eq!(env["AIRPLANE_RESOURCES"], "{}");
    }

    #[tokio::test]
    async fn missing_config_references_name_the_env_var() {
        let dir = tempfile::tempdir().unwrap();
        let dev_config = DevConfig::empty(dir.path().join("airplane.dev.yaml"));
        let mut task = TaskDefinition::new("hello", TaskKind::Node);
        task.env_vars.insert("TOKEN".into(), TaskEnvValue::Config("missing".into()));

        let resources = IndexMap::new();
        let error = build_task_env(&task, &dev_config, &OfflineClient, context(&resources))
            .await
            .unwrap_err();
        assert!(error.is_not_found());
        assert!(error.to_string().contains("missing"));
        assert!(error.to_string().contains("TOKEN"));
    }

    #[tokio::test]
    async fn resources_are_serialized_by_alias() {
        let dir = tempfile::tempdir().unwrap();
        let dev_config = DevConfig::empty(dir.path().join("airplane.dev.yaml"));
        let raw = serde_json::json!({
            "kind": "postgres",
            "slug": "db",
            "name": "DB",
            "host": "localhost",
            "port": "5432",
            "database": "app",
            "username": "postgres",
            "password": "pw",
            "ssl": "disable",
        });
        let resource = dev_config
            .create_resource("db", Resource::from_raw(raw.as_object().unwrap()).unwrap())
            .unwrap();
        let resources = IndexMap::from([("primary".to_string(), resource)]);

        let task = TaskDefinition::new("hello", TaskKind::Python);
        let env = build_task_env(&task, &dev_config, &OfflineClient, context(&resources))
            .await
            .unwrap();
        let decoded: serde_json::Value = serde_json::from_str(&env["AIRPLANE_RESOURCES"]).unwrap();
        assert_eq!(decoded["primary"]["slug"], "db");
        assert_eq!(decoded["primary"]["kind"], "postgres");
    }
}
