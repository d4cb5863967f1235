//! Runtimes served by the builtins binary.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use studio_builtins::{
    BuiltinsClient, FunctionSpecification, is_builtin_task_slug, marshal_request, parse_builtin_slug, request_for_slug,
};
use studio_types::{StdApiRequest, StudioError, StudioResult, TaskKind};
use tracing::debug;

use crate::{PrepareRunOptions, PreparedRun, Runtime};

fn require_builtins(opts: &PrepareRunOptions) -> StudioResult<&Arc<BuiltinsClient>> {
    opts.builtins.as_ref().ok_or_else(|| {
        StudioError::unsupported(
            "builtins are not supported on this machine. Please reach out to support for assistance, or run the task remotely.",
        )
    })
}

/// Make sure the binary is installed and build the argv for `request`.
async fn builtin_command(opts: &PrepareRunOptions, request: StdApiRequest) -> StudioResult<PreparedRun> {
    let builtins = require_builtins(opts)?;
    builtins.install().await?;
    let encoded = marshal_request(&request)?;
    debug!(namespace = %request.namespace, name = %request.name, "prepared builtin request");
    Ok(PreparedRun {
        argv: builtins.cmd(&encoded),
        cleanup: None,
        std_api_request: Some(request),
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SqlRuntime;

#[async_trait]
impl Runtime for SqlRuntime {
    fn kind(&self) -> TaskKind {
        TaskKind::Sql
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".sql"]
    }

    async fn prepare_run(&self, opts: &PrepareRunOptions) -> StudioResult<PreparedRun> {
        let query_path = match opts.kind_option_str("entrypoint") {
            Some(entrypoint) => opts.working_dir.join(entrypoint),
            None => opts.path.clone(),
        };
        if query_path.as_os_str().is_empty() {
            return Err(StudioError::bad_request("sql tasks need an entrypoint query file"));
        }
        let query = tokio::fs::read_to_string(&query_path).await.map_err(|error| {
            StudioError::bad_request(format!("unable to read sql file {}: {error}", query_path.display()))
        })?;

        let mut request = opts.kind_options.clone();
        request.insert("query".to_string(), Value::String(query));
        builtin_command(
            opts,
            StdApiRequest {
                namespace: "sql".to_string(),
                name: "query".to_string(),
                request,
            },
        )
        .await
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RestRuntime;

#[async_trait]
impl Runtime for RestRuntime {
    fn kind(&self) -> TaskKind {
        TaskKind::Rest
    }

    async fn prepare_run(&self, opts: &PrepareRunOptions) -> StudioResult<PreparedRun> {
        builtin_command(
            opts,
            StdApiRequest {
                namespace: "rest".to_string(),
                name: "request".to_string(),
                request: opts.kind_options.clone(),
            },
        )
        .await
    }
}

/// Generic builtin: the function and its request come from kind options.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinRuntime;

impl BuiltinRuntime {
    /// The request comes from `functionSpecification` and `request` kind
    /// options. Tasks slugged `airplane:<namespace>_<name>` without a
    /// specification send their parameters instead.
    fn request(opts: &PrepareRunOptions) -> StudioResult<StdApiRequest> {
        let Some(specification) = opts.kind_options.get("functionSpecification").cloned() else {
            if is_builtin_task_slug(&opts.task_slug) {
                return request_for_slug(&opts.task_slug, &opts.param_values);
            }
            return Err(StudioError::bad_request("builtin tasks need a functionSpecification"));
        };
        let FunctionSpecification { namespace, name } = serde_json::from_value(specification)
            .map_err(|error| StudioError::bad_request(format!("invalid functionSpecification: {error}")))?;
        // Malformed namespace/name pairs would only fail inside the binary.
        let function = parse_builtin_slug(&format!("airplane:{namespace}_{name}"))?;
        let request = match opts.kind_options.get("request") {
            Some(Value::Object(request)) => request.clone(),
            None | Some(Value::Null) => {
                return Err(StudioError::bad_request("builtin tasks need a request"));
            }
            Some(other) => {
                return Err(StudioError::bad_request(format!(
                    "expected builtin request to be an object, got {other}"
                )));
            }
        };
        Ok(StdApiRequest {
            namespace: function.namespace,
            name: function.name,
            request,
        })
    }
}

#[async_trait]
impl Runtime for BuiltinRuntime {
    fn kind(&self) -> TaskKind {
        TaskKind::Builtin
    }

    async fn prepare_run(&self, opts: &PrepareRunOptions) -> StudioResult<PreparedRun> {
        let request = Self::request(opts)?;
        builtin_command(opts, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use studio_types::ErrorClass;

    fn options(kind_options: Value) -> PrepareRunOptions {
        PrepareRunOptions {
            kind_options: kind_options.as_object().cloned().unwrap(),
            ..PrepareRunOptions::default()
        }
    }

    #[test]
    fn builtin_request_comes_from_kind_options() {
        let request = BuiltinRuntime::request(&options(json!({
            "functionSpecification": {"namespace": "email", "name": "message"},
            "request": {"to": ["a@example.com"]},
        })))
        .unwrap();
        assert_eq!(request.namespace, "email");
        assert_eq!(request.name, "message");
        assert_eq!(Value::Object(request.request), json!({"to": ["a@example.com"]}));
    }

    #[test]
    fn builtin_request_must_be_an_object() {
        let error = BuiltinRuntime::request(&options(json!({
            "functionSpecification": {"namespace": "email", "name": "message"},
            "request": "nope",
        })))
        .unwrap_err();
        assert_eq!(error.class(), ErrorClass::BadRequest);

        let error = BuiltinRuntime::request(&options(json!({}))).unwrap_err();
        assert_eq!(error.to_string(), "builtin tasks need a functionSpecification");

        let error = BuiltinRuntime::request(&options(json!({
            "functionSpecification": {"namespace": "email", "name": "message"},
        })))
        .unwrap_err();
        assert_eq!(error.to_string(), "builtin tasks need a request");
    }

    #[test]
    fn malformed_function_specifications_are_rejected() {
        for specification in [
            json!({"namespace": "a_b:c", "name": ""}),
            json!({"namespace": "", "name": "query"}),
            json!({"namespace": "sql", "name": "my_query"}),
        ] {
            let error = BuiltinRuntime::request(&options(json!({
                "functionSpecification": specification,
                "request": {},
            })))
            .unwrap_err();
            assert_eq!(error.class(), ErrorClass::BadRequest);
            assert!(error.to_string().starts_with("unknown builtin task slug"), "{error}");
        }
    }

    #[test]
    fn builtin_slugs_send_parameters() {
        let mut opts = options(json!({}));
        opts.task_slug = "airplane:sql_query".into();
        opts.param_values.insert("query".into(), json!("select 1"));
        let request = BuiltinRuntime::request(&opts).unwrap();
        assert_eq!((request.namespace.as_str(), request.name.as_str()), ("sql", "query"));
        assert_eq!(request.request["query"], "select 1");
    }

    #[tokio::test]
    async fn builtin_kinds_need_a_builtins_client() {
        let error = RestRuntime
            .prepare_run(&options(json!({"method": "GET", "path": "/"})))
            .await
            .unwrap_err();
        assert_eq!(error.class(), ErrorClass::Unsupported);
        assert!(error.to_string().contains("run the task remotely"));
    }

    #[tokio::test]
    async fn sql_reads_query_relative_to_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("query.sql"), "select 1").unwrap();
        let mut opts = options(json!({"entrypoint": "query.sql"}));
        opts.working_dir = dir.path().to_path_buf();

        // Reading succeeds; the missing builtins client is the next failure.
        let error = SqlRuntime.prepare_run(&opts).await.unwrap_err();
        assert_eq!(error.class(), ErrorClass::Unsupported);

        opts.kind_options.insert("entrypoint".into(), json!("missing.sql"));
        let error = SqlRuntime.prepare_run(&opts).await.unwrap_err();
        assert!(error.to_string().starts_with("unable to read sql file"));
    }

    struct StaticStore;

    #[async_trait]
    impl studio_builtins::BinaryStore for StaticStore {
        async fn checksum(&self, _object: &str) -> StudioResult<String> {
            Ok("abc".to_string())
        }

        async fn fetch(&self, _object: &str) -> StudioResult<studio_builtins::StoredObject> {
            Ok(studio_builtins::StoredObject {
                bytes: b"#!/bin/sh\n".to_vec(),
                checksum: "abc".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn rest_runs_through_installed_binary() {
        let cache = tempfile::tempdir().unwrap();
        let config = studio_builtins::BuiltinsConfig::for_root(cache.path())
            .with_platform("linux", "amd64")
            .with_cache_dir(cache.path());
        let client = Arc::new(BuiltinsClient::new(config, Arc::new(StaticStore)).unwrap());
        let mut opts = options(json!({"method": "GET", "path": "/health"}));
        opts.builtins = Some(client.clone());

        let prepared = RestRuntime.prepare_run(&opts).await.unwrap();
        assert_eq!(prepared.argv[0], client.binary_path().display().to_string());
        assert!(client.binary_path().exists());
        let request = prepared.std_api_request.unwrap();
        assert_eq!((request.namespace.as_str(), request.name.as_str()), ("rest", "request"));
        let encoded: Value = serde_json::from_str(&prepared.argv[1]).unwrap();
        assert_eq!(encoded["request"]["path"], json!("/health"));
    }
}
