//! Dev config file persistence.
//!
//! The dev config (`airplane.dev.yaml` by default) declares the resources,
//! config variables and environment variables a developer wants available
//! when running tasks locally. It is loaded once, kept in memory behind a
//! mutex and rewritten wholesale after every mutation. Mutations are applied
//! to a copy of the state which only replaces the in-memory state once the
//! file write succeeded.
//!
//! On disk, resources carry neither ids nor computed fields (DSNs, encoded
//! credentials): ids are derived from the slug and computed fields are
//! recalculated on load. The file's resource records are kept as read and
//! written back verbatim; only the record of a resource that is set or
//! deleted is regenerated, so fields this version does not know survive.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use studio_types::{ConfigVar, ConfigWithEnv, RawResource, StudioError, StudioResult};
use studio_util::{dev_config_id, dev_resource_id, path_from_env_or};
use tracing::{debug, info};

use crate::{Resource, ResourceWithEnv};

/// Environment variable allowing callers to override the dev config path.
pub const DEV_CONFIG_PATH_ENV: &str = "STUDIO_DEV_CONFIG_PATH";

/// Default file name, resolved against the current directory.
pub const DEV_CONFIG_FILE_NAME: &str = "airplane.dev.yaml";

/// Layout of the file on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DevConfigFile {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    config_vars: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    resources: Vec<RawResource>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    env_vars: IndexMap<String, String>,
}

#[derive(Debug, Clone, Default)]
struct DevConfigState {
    resources: IndexMap<String, Resource>,
    /// Resource records as they appear in the file.
    raw_resources: Vec<RawResource>,
    config_vars: IndexMap<String, String>,
    env_vars: IndexMap<String, String>,
}

impl DevConfigState {
    fn from_file(file: DevConfigFile) -> StudioResult<Self> {
        let mut resources = IndexMap::with_capacity(file.resources.len());
        for raw in &file.resources {
            let slug = match raw.get("slug") {
                Some(Value::String(slug)) if !slug.is_empty() => slug.clone(),
                Some(Value::String(_)) | None => {
                    return Err(StudioError::bad_request("missing slug property in resource"));
                }
                Some(other) => {
                    return Err(StudioError::bad_request(format!(
                        "expected resource slug to be a string, got {other}"
                    )));
                }
            };
            let mut resource = Resource::from_raw(raw)?;
            resource.set_id(dev_resource_id(&slug));
            resource.calculate()?;
            if resources.insert(slug.clone(), resource).is_some() {
                return Err(StudioError::bad_request(format!(
                    "resource {slug:?} is declared more than once in the dev config file"
                )));
            }
        }
        Ok(Self {
            resources,
            raw_resources: file.resources,
            config_vars: file.config_vars,
            env_vars: file.env_vars,
        })
    }

    fn to_file(&self) -> DevConfigFile {
        DevConfigFile {
            config_vars: self.config_vars.clone(),
            resources: self.raw_resources.clone(),
            env_vars: self.env_vars.clone(),
        }
    }

    /// Replace the file record of `slug`, appending when it has none.
    fn put_raw_resource(&mut self, slug: &str, record: RawResource) {
        match self.raw_resources.iter_mut().find(|raw| raw_slug(raw) == Some(slug)) {
            Some(existing) => *existing = record,
            None => self.raw_resources.push(record),
        }
    }

    fn remove_raw_resource(&mut self, slug: &str) {
        self.raw_resources.retain(|raw| raw_slug(raw) != Some(slug));
    }
}

fn raw_slug(raw: &RawResource) -> Option<&str> {
    raw.get("slug").and_then(Value::as_str)
}

/// Thread-safe handle to the dev config file.
#[derive(Debug)]
pub struct DevConfig {
    path: PathBuf,
    state: Mutex<DevConfigState>,
}

impl DevConfig {
    /// Path used when no explicit one is given: [`DEV_CONFIG_PATH_ENV`] when
    /// set, otherwise [`DEV_CONFIG_FILE_NAME`] in the current directory.
    pub fn default_path() -> PathBuf {
        path_from_env_or(DEV_CONFIG_PATH_ENV, || PathBuf::from(DEV_CONFIG_FILE_NAME))
    }

    /// Load the dev config at `path`. A missing file yields an empty config
    /// that will be created on the first mutation; a malformed one is an error.
    pub fn load(path: impl Into<PathBuf>) -> StudioResult<Self> {
        let path = path.into();
        let state = read_state(&path)?;
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn load_default() -> StudioResult<Self> {
        Self::load(Self::default_path())
    }

    /// Empty config bound to `path` without touching the filesystem.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(DevConfigState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file, replacing the in-memory state.
    pub fn reload(&self) -> StudioResult<()> {
        let state = read_state(&self.path)?;
        *self.state.lock().expect("dev config lock poisoned") = state;
        Ok(())
    }

    /// Write the current state back to disk.
    pub fn save(&self) -> StudioResult<()> {
        let state = self.state.lock().expect("dev config lock poisoned");
        write_state(&self.path, &state)
    }

    /// Locally declared resources keyed by slug.
    pub fn resources(&self) -> IndexMap<String, ResourceWithEnv> {
        let state = self.state.lock().expect("dev config lock poisoned");
        state
            .resources
            .iter()
            .map(|(slug, resource)| (slug.clone(), ResourceWithEnv::local(resource.clone())))
            .collect()
    }

    pub fn resource(&self, slug: &str) -> Option<Resource> {
        self.state.lock().expect("dev config lock poisoned").resources.get(slug).cloned()
    }

    /// Locally declared config variables keyed by name.
    pub fn config_vars(&self) -> IndexMap<String, ConfigWithEnv> {
        let state = self.state.lock().expect("dev config lock poisoned");
        state
            .config_vars
            .iter()
            .map(|(name, value)| {
                let config = ConfigVar {
                    id: dev_config_id(name),
                    name: name.clone(),
                    tag: String::new(),
                    value: value.clone(),
                    is_secret: false,
                };
                (name.clone(), ConfigWithEnv::local(config))
            })
            .collect()
    }

    pub fn env_vars(&self) -> IndexMap<String, String> {
        self.state.lock().expect("dev config lock poisoned").env_vars.clone()
    }

    /// Create or update the resource stored under `slug`.
    ///
    /// An existing resource of the same kind is updated in place, so empty
    /// secrets in `resource` keep the stored values. The result must pass
    /// validation before it is written.
    pub fn set_resource(&self, slug: &str, resource: Resource) -> StudioResult<Resource> {
        if resource.kind().is_read_only() {
            return Err(StudioError::unsupported(format!(
                "{} resources are managed by the platform and cannot be declared locally",
                resource.kind()
            )));
        }
        let stored = self.mutate(|state| {
            let mut merged = match state.resources.get(slug) {
                Some(existing) if existing.kind() == resource.kind() => {
                    let mut merged = existing.clone();
                    merged.update(&resource)?;
                    merged
                }
                _ => {
                    let mut created = resource;
                    created.calculate()?;
                    created
                }
            };
            merged.set_id(dev_resource_id(slug));
            merged.validate()?;
            let mut record = merged.to_file_record()?;
            record.insert("slug".to_string(), Value::String(slug.to_string()));
            state.put_raw_resource(slug, record);
            state.resources.insert(slug.to_string(), merged.clone());
            Ok(merged)
        })?;
        info!(slug, path = %self.path.display(), "wrote resource to dev config file");
        Ok(stored)
    }

    /// Add a resource, failing when the slug is already taken.
    pub fn create_resource(&self, slug: &str, resource: Resource) -> StudioResult<Resource> {
        if self.resource(slug).is_some() {
            return Err(StudioError::bad_request(format!("resource with slug {slug:?} already exists")));
        }
        self.set_resource(slug, resource)
    }

    pub fn delete_resource(&self, slug: &str) -> StudioResult<()> {
        self.mutate(|state| match state.resources.shift_remove(slug) {
            Some(_) => {
                state.remove_raw_resource(slug);
                Ok(())
            }
            None => Err(StudioError::not_found(format!("Resource {slug:?} not found in dev config file"))),
        })?;
        info!(slug, path = %self.path.display(), "deleted resource from dev config file");
        Ok(())
    }

    pub fn set_config_var(&self, name: &str, value: impl Into<String>) -> StudioResult<()> {
        let value = value.into();
        self.mutate(|state| {
            state.config_vars.insert(name.to_string(), value);
            Ok(())
        })?;
        info!(name, path = %self.path.display(), "wrote config variable to dev config file");
        Ok(())
    }

    pub fn delete_config_var(&self, name: &str) -> StudioResult<()> {
        self.mutate(|state| match state.config_vars.shift_remove(name) {
            Some(_) => Ok(()),
            None => Err(StudioError::not_found(format!(
                "Config variable {name:?} not found in dev config file"
            ))),
        })?;
        info!(name, path = %self.path.display(), "deleted config variable from dev config file");
        Ok(())
    }

    pub fn set_env_var(&self, name: &str, value: impl Into<String>) -> StudioResult<()> {
        let value = value.into();
        self.mutate(|state| {
            state.env_vars.insert(name.to_string(), value);
            Ok(())
        })?;
        info!(name, path = %self.path.display(), "wrote environment variable to dev config file");
        Ok(())
    }

    pub fn delete_env_var(&self, name: &str) -> StudioResult<()> {
        self.mutate(|state| match state.env_vars.shift_remove(name) {
            Some(_) => Ok(()),
            None => Err(StudioError::not_found(format!(
                "Environment variable {name:?} not found in dev config file"
            ))),
        })?;
        info!(name, path = %self.path.display(), "deleted environment variable from dev config file");
        Ok(())
    }

    fn mutate<T>(&self, apply: impl FnOnce(&mut DevConfigState) -> StudioResult<T>) -> StudioResult<T> {
        let mut state = self.state.lock().expect("dev config lock poisoned");
        let mut working = state.clone();
        let outcome = apply(&mut working)?;
        write_state(&self.path, &working)?;
        *state = working;
        Ok(outcome)
    }
}

fn read_state(path: &Path) -> StudioResult<DevConfigState> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "dev config file not found; using an empty config");
            return Ok(DevConfigState::default());
        }
        Err(error) => {
            return Err(StudioError::internal(format!("reading dev config {}", path.display()), error));
        }
    };
    if contents.trim().is_empty() {
        return Ok(DevConfigState::default());
    }
    let file: DevConfigFile = serde_yaml::from_str(&contents)
        .map_err(|error| StudioError::internal(format!("parsing dev config {}", path.display()), error))?;
    let state = DevConfigState::from_file(file)?;
    info!(path = %path.display(), resources = state.resources.len(), "loaded dev config");
    Ok(state)
}

fn write_state(path: &Path, state: &DevConfigState) -> StudioResult<()> {
    let file = state.to_file();
    let contents = serde_yaml::to_string(&file)
        .map_err(|error| StudioError::internal("serializing dev config", error))?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| StudioError::internal(format!("creating {}", parent.display()), error))?;
    }
    fs::write(path, contents)
        .map_err(|error| StudioError::internal(format!("writing dev config {}", path.display()), error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use studio_types::ErrorClass;

    fn raw(value: Value) -> RawResource {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn missing_file_is_an_empty_config() {
        let directory = tempfile::tempdir().unwrap();
        let config = DevConfig::load(directory.path().join("airplane.dev.yaml")).unwrap();
        assert!(config.resources().is_empty());
        assert!(config.env_vars().is_empty());
    }

    #[test]
    fn postgres_resource_gets_id_and_dsn_on_load() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("airplane.dev.yaml");
        fs::write(
            &path,
            "resources:\n  - kind: postgres\n    slug: db\n    username: postgres\n    password: secret\n    host: localhost\n    port: 5432\n    database: app\n    ssl: disable\n",
        )
        .unwrap();

        let config = DevConfig::load(&path).unwrap();
        let resource = config.resource("db").unwrap();
        assert_eq!(resource.id(), "res-db");
        let raw = resource.to_raw().unwrap();
        assert!(raw["dsn"].as_str().unwrap().contains("sslmode=disable"));
    }

    #[test]
    fn mutations_round_trip_through_the_file() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("nested").join("airplane.dev.yaml");
        let config = DevConfig::load(&path).unwrap();

        config.set_config_var("API_BASE", "https://example.com").unwrap();
        config.set_env_var("LOG_LEVEL", "debug").unwrap();
        let resource = Resource::from_raw(&raw(json!({
            "kind": "sendgrid", "slug": "mail", "apiKey": "sg-key"
        })))
        .unwrap();
        config.set_resource("mail", resource).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(!written.contains("res-mail"), "ids are not persisted");

        let reloaded = DevConfig::load(&path).unwrap();
        assert_eq!(reloaded.config_vars()["API_BASE"].value.value, "https://example.com");
        assert_eq!(reloaded.config_vars()["API_BASE"].value.id, "cfg-API_BASE");
        assert_eq!(reloaded.env_vars()["LOG_LEVEL"], "debug");
        assert_eq!(reloaded.resource("mail").unwrap().id(), "res-mail");
    }

    fn written_resources(path: &Path) -> Value {
        let file: DevConfigFile = serde_yaml::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        serde_json::to_value(file.resources).unwrap()
    }

    #[test]
    fn unrelated_mutations_keep_resource_records_verbatim() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("airplane.dev.yaml");
        fs::write(
            &path,
            "resources:\n  - kind: postgres\n    slug: db\n    description: kept for newer tooling\n    username: postgres\n    password: secret\n    host: localhost\n    port: 5432\n    database: app\n    ssl: disable\n",
        )
        .unwrap();
        let before = written_resources(&path);

        let config = DevConfig::load(&path).unwrap();
        config.set_config_var("A", "1").unwrap();
        config.set_env_var("B", "2").unwrap();
        assert_eq!(written_resources(&path), before);

        let mail = Resource::from_raw(&raw(json!({"kind": "sendgrid", "slug": "mail", "apiKey": "k"}))).unwrap();
        config.set_resource("mail", mail).unwrap();
        config.delete_resource("mail").unwrap();
        assert_eq!(written_resources(&path), before);
        assert_eq!(before[0]["description"], "kept for newer tooling");
    }

    #[test]
    fn set_resource_regenerates_only_its_record() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("airplane.dev.yaml");
        fs::write(
            &path,
            "resources:\n  - kind: sendgrid\n    slug: mail\n    apiKey: old\n    extra: 1\n  - kind: mailgun\n    slug: mg\n    apiKey: key\n    domain: a.example.com\n    extra: 2\n",
        )
        .unwrap();
        let config = DevConfig::load(&path).unwrap();
        let mail = Resource::from_raw(&raw(json!({"kind": "sendgrid", "slug": "mail", "apiKey": "new"}))).unwrap();
        config.set_resource("mail", mail).unwrap();

        let written = written_resources(&path);
        assert_eq!(written[0]["slug"], "mail");
        assert_eq!(written[0]["apiKey"], "new");
        assert_eq!(written[1], json!({"kind": "mailgun", "slug": "mg", "apiKey": "key", "domain": "a.example.com", "extra": 2}));
    }

    #[test]
    fn calculated_fields_are_not_written() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("airplane.dev.yaml");
        let config = DevConfig::load(&path).unwrap();
        let resource = Resource::from_raw(&raw(json!({
            "kind": "postgres", "slug": "db", "username": "u", "password": "pw", "host": "h",
            "port": "5432", "database": "d", "ssl": "require"
        })))
        .unwrap();
        config.set_resource("db", resource).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(!written.contains("dsn"));
        assert!(config.resource("db").unwrap().to_raw().unwrap().contains_key("dsn"));
    }

    #[test]
    fn set_resource_keeps_existing_secrets() {
        let directory = tempfile::tempdir().unwrap();
        let config = DevConfig::load(directory.path().join("airplane.dev.yaml")).unwrap();
        let original = Resource::from_raw(&raw(json!({
            "kind": "mailgun", "slug": "mg", "apiKey": "key", "domain": "a.example.com"
        })))
        .unwrap();
        config.set_resource("mg", original).unwrap();
        let partial = Resource::from_raw(&raw(json!({
            "kind": "mailgun", "slug": "mg", "apiKey": "", "domain": "b.example.com"
        })))
        .unwrap();
        let stored = config.set_resource("mg", partial).unwrap();
        let raw = stored.to_raw().unwrap();
        assert_eq!(raw["apiKey"], "key");
        assert_eq!(raw["domain"], "b.example.com");
    }

    #[test]
    fn invalid_resources_are_not_persisted() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("airplane.dev.yaml");
        let config = DevConfig::load(&path).unwrap();
        let resource = Resource::from_raw(&raw(json!({"kind": "sendgrid", "slug": "sg"}))).unwrap();
        let error = config.set_resource("sg", resource).unwrap_err();
        assert_eq!(error.class(), ErrorClass::BadRequest);
        assert!(config.resource("sg").is_none());
        assert!(!path.exists());
    }

    #[test]
    fn slack_cannot_be_declared_locally() {
        let directory = tempfile::tempdir().unwrap();
        let config = DevConfig::load(directory.path().join("airplane.dev.yaml")).unwrap();
        let slack = Resource::from_raw(&raw(json!({"kind": "slack", "slug": "team_slack"}))).unwrap();
        let error = config.set_resource("team_slack", slack).unwrap_err();
        assert_eq!(error.class(), ErrorClass::Unsupported);
    }

    #[test]
    fn create_resource_rejects_duplicates() {
        let directory = tempfile::tempdir().unwrap();
        let config = DevConfig::load(directory.path().join("airplane.dev.yaml")).unwrap();
        let resource = Resource::from_raw(&raw(json!({"kind": "sendgrid", "slug": "sg", "apiKey": "k"}))).unwrap();
        config.create_resource("sg", resource.clone()).unwrap();
        assert!(config.create_resource("sg", resource).is_err());
    }

    #[test]
    fn deleting_missing_entries_is_not_found() {
        let directory = tempfile::tempdir().unwrap();
        let config = DevConfig::load(directory.path().join("airplane.dev.yaml")).unwrap();

        let error = config.delete_config_var("MISSING").unwrap_err();
        assert_eq!(error.to_string(), "Config variable \"MISSING\" not found in dev config file");
        let error = config.delete_env_var("MISSING").unwrap_err();
        assert_eq!(error.to_string(), "Environment variable \"MISSING\" not found in dev config file");
        let error = config.delete_resource("missing").unwrap_err();
        assert!(error.is_not_found());
    }

    #[test]
    fn delete_removes_entries() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("airplane.dev.yaml");
        let config = DevConfig::load(&path).unwrap();
        config.set_env_var("A", "1").unwrap();
        config.delete_env_var("A").unwrap();
        assert!(DevConfig::load(&path).unwrap().env_vars().is_empty());
    }

    #[test]
    fn malformed_files_are_errors() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("airplane.dev.yaml");
        fs::write(&path, "resources: [not, a, mapping\n").unwrap();
        assert!(DevConfig::load(&path).is_err());

        fs::write(&path, "resources:\n  - kind: postgres\n").unwrap();
        let error = DevConfig::load(&path).unwrap_err();
        assert!(error.to_string().contains("slug"));

        fs::write(&path, "resources:\n  - slug: db\n").unwrap();
        let error = DevConfig::load(&path).unwrap_err();
        assert!(error.to_string().contains("kind"));
    }

    #[test]
    fn duplicate_slugs_are_rejected() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("airplane.dev.yaml");
        fs::write(
            &path,
            "resources:\n  - kind: sendgrid\n    slug: sg\n  - kind: sendgrid\n    slug: sg\n",
        )
        .unwrap();
        assert!(DevConfig::load(&path).is_err());
    }

    #[test]
    fn default_path_honors_environment_override() {
        temp_env::with_var(DEV_CONFIG_PATH_ENV, Some("/tmp/studio/dev.yaml"), || {
            assert_eq!(DevConfig::default_path(), PathBuf::from("/tmp/studio/dev.yaml"));
        });
        temp_env::with_var_unset(DEV_CONFIG_PATH_ENV, || {
            assert_eq!(DevConfig::default_path(), PathBuf::from(DEV_CONFIG_FILE_NAME));
        });
    }
}
