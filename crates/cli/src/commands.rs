use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use serde_json::Value;
use studio_api::{HttpRemoteClient, OfflineClient, RemoteClient};
use studio_builtins::{BuiltinsClient, BuiltinsConfig};
use studio_engine::{LocalRunner, RunRequest, RunStore, RunnerSettings, SHUTDOWN_ACTOR, TaskDefinition, TaskEnvValue};
use studio_resources::{DevConfig, merge_remote_resources};
use studio_types::{ParamValues, RunStatus};
use tracing::{debug, info, warn};

use crate::{ConfigCommand, RunArgs};

/// Time runs get to stop after an interrupt before the studio exits anyway.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Fallback for `--env`.
const ENV_SLUG_ENV: &str = "AIRPLANE_ENV";

/// Prefix marking a task env var as a config var reference.
const CONFIG_REF_PREFIX: &str = "config:";

pub struct Context {
    pub dev_config: Arc<DevConfig>,
    pub remote: Arc<dyn RemoteClient>,
    pub env: Option<String>,
}

impl Context {
    pub fn new(dev_config: Option<PathBuf>, env: Option<String>) -> Result<Self> {
        let dev_config = match dev_config {
            Some(path) => DevConfig::load(path),
            None => DevConfig::load_default(),
        }
        .context("loading dev config")?;
        let remote: Arc<dyn RemoteClient> = match HttpRemoteClient::from_env()? {
            Some(client) => Arc::new(client),
            None => {
                debug!("no API key configured, running offline");
                Arc::new(OfflineClient)
            }
        };
        let env = env.or_else(|| std::env::var(ENV_SLUG_ENV).ok().filter(|slug| !slug.trim().is_empty()));
        Ok(Self {
            dev_config: Arc::new(dev_config),
            remote,
            env,
        })
    }
}

/// Split `key=value`, keeping any further `=` in the value.
pub fn parse_key_value(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {input:?}")),
    }
}

fn json_or_string(value: &str) -> Value {
    serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

fn task_from_args(args: &RunArgs) -> TaskDefinition {
    let mut task = TaskDefinition::new(&args.slug, args.kind);
    if let Some(entrypoint) = &args.entrypoint {
        task = task.with_entrypoint(entrypoint);
    }
    if let Some(working_dir) = &args.working_dir {
        task = task.with_working_dir(working_dir);
    }
    for (alias, reference) in &args.resources {
        task = task.with_resource(alias, reference);
    }
    for (key, value) in &args.kind_options {
        task = task.with_kind_option(key, json_or_string(value));
    }
    for (name, value) in &args.env_vars {
        let value = match value.strip_prefix(CONFIG_REF_PREFIX) {
            Some(reference) => TaskEnvValue::Config(reference.to_string()),
            None => TaskEnvValue::Value(value.clone()),
        };
        task.env_vars.insert(name.clone(), value);
    }
    task
}

fn param_values(args: &RunArgs) -> ParamValues {
    args.params
        .iter()
        .map(|(name, value)| (name.clone(), json_or_string(value)))
        .collect()
}

fn builtins_client(root: &Path) -> Result<BuiltinsClient> {
    Ok(BuiltinsClient::with_default_store(BuiltinsConfig::for_root(root))?)
}

pub async fn run_task(ctx: &Context, args: RunArgs) -> Result<()> {
    let builtins = match builtins_client(&args.root) {
        Ok(client) => Some(Arc::new(client)),
        Err(error) => {
            debug!(error = %error, "builtins unavailable");
            None
        }
    };
    let settings = RunnerSettings {
        fallback_env: ctx.env.clone(),
        ..RunnerSettings::default()
    };
    let runner = LocalRunner::new(RunStore::new(), ctx.dev_config.clone(), ctx.remote.clone(), builtins, settings);
    let request = RunRequest::new(task_from_args(&args), param_values(&args));

    let handle = runner.start_local_run(request).await?;
    let store = runner.store().clone();
    let wait = handle.wait();
    tokio::pin!(wait);

    let run = tokio::select! {
        run = &mut wait => run?,
        _ = tokio::signal::ctrl_c() => {
            let cancelled = store.cancel_all(SHUTDOWN_ACTOR);
            info!(cancelled, "interrupted, cancelling active runs");
            tokio::time::timeout(SHUTDOWN_GRACE, &mut wait)
                .await
                .context("runs did not stop within the shutdown grace period")??
        }
    };

    println!("{}", serde_json::to_string_pretty(&run)?);
    match run.status {
        RunStatus::Succeeded => Ok(()),
        RunStatus::Running if run.remote => {
            info!(run_id = %run.run_id, "run submitted to the remote environment");
            Ok(())
        }
        status => bail!("run {} finished as {status}", run.run_id),
    }
}

pub fn edit_config(ctx: &Context, command: ConfigCommand) -> Result<()> {
    let dev_config = &ctx.dev_config;
    match command {
        ConfigCommand::Set { name, value } => dev_config.set_config_var(&name, value)?,
        ConfigCommand::Delete { name } => dev_config.delete_config_var(&name)?,
        ConfigCommand::SetEnv { name, value } => dev_config.set_env_var(&name, value)?,
        ConfigCommand::DeleteEnv { name } => dev_config.delete_env_var(&name)?,
    }
    Ok(())
}

pub async fn list_resources(ctx: &Context) -> Result<()> {
    let resources = merge_remote_resources(&ctx.dev_config, ctx.remote.as_ref(), ctx.env.as_deref())
        .await
        .context("listing resources")?;
    if resources.is_empty() {
        println!("No resources found");
        return Ok(());
    }
    for (slug, resource) in &resources {
        let origin = match (&resource.env_slug, resource.remote) {
            (Some(env), true) => format!("remote:{env}"),
            (None, true) => "remote".to_string(),
            _ => "local".to_string(),
        };
        println!("{slug} ({}, {origin})", resource.value.kind().as_str());
        match resource.value.display_fields() {
            Ok(fields) => {
                for (name, value) in fields {
                    println!("  {name}: {value}");
                }
            }
            Err(error) => warn!(resource = %slug, error = %error, "cannot display resource"),
        }
    }
    Ok(())
}

pub async fn install_builtins(root: &Path, force: bool) -> Result<()> {
    let client = builtins_client(root)?;
    let installed = if force { client.refresh().await } else { client.install().await };
    let path = installed.context("installing builtins")?;
    println!("{}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use studio_types::TaskKind;

    fn args() -> RunArgs {
        RunArgs {
            slug: "ping".into(),
            kind: TaskKind::Rest,
            entrypoint: None,
            working_dir: Some(PathBuf::from("/work")),
            params: vec![("count".into(), "3".into()), ("name".into(), "world".into())],
            resources: vec![("api".into(), "my_api".into())],
            env_vars: vec![
                ("TOKEN".into(), "config:api_token".into()),
                ("MODE".into(), "fast".into()),
            ],
            kind_options: vec![("method".into(), "GET".into()), ("headers".into(), r#"{"a":"b"}"#.into())],
            root: PathBuf::from("."),
        }
    }

    #[test]
    fn parses_key_value_pairs() {
        assert_eq!(parse_key_value("a=b=c").unwrap(), ("a".to_string(), "b=c".to_string()));
        assert_eq!(parse_key_value("a=").unwrap(), ("a".to_string(), String::new()));
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn builds_task_definition_from_flags() {
        let task = task_from_args(&args());
        assert_eq!(task.working_dir, PathBuf::from("/work"));
        assert_eq!(task.resources["api"], "my_api");
        assert_eq!(task.kind_options["method"], json!("GET"));
        assert_eq!(task.kind_options["headers"], json!({"a": "b"}));
        assert_eq!(task.env_vars["TOKEN"], TaskEnvValue::Config("api_token".into()));
        assert_eq!(task.env_vars["MODE"], TaskEnvValue::Value("fast".into()));
    }

    #[test]
    fn params_prefer_json() {
        let params = param_values(&args());
        assert_eq!(params["count"], json!(3));
        assert_eq!(params["name"], json!("world"));
    }
}
