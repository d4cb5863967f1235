//! Local and remote resolution.
//!
//! Local declarations always win. Remote entries only fill slugs (or config
//! names) the dev config leaves empty. A couple of well-known remote
//! resources are fetched individually on a best-effort basis: the demo
//! database when no fallback environment is configured, and the team's Slack
//! integration, which the list endpoint never returns.

use indexmap::IndexMap;
use studio_api::{GetResourceRequest, RemoteClient};
use studio_types::{ConfigWithEnv, StudioError, StudioResult, parse_config_name};
use tracing::debug;

use crate::{DevConfig, Resource, ResourceWithEnv};

/// Slug of the demo database most teams are provisioned with.
pub const DEMO_DB_SLUG: &str = "demo_db";

/// Slug of the virtual Slack resource.
pub const SLACK_SLUG: &str = "team_slack";

/// Fixed id of the virtual Slack resource.
pub const SLACK_RESOURCE_ID: &str = "res00000000zteamslack";

const DEFAULT_REMOTE_RESOURCE_SLUGS: &[&str] = &[DEMO_DB_SLUG];
const VIRTUAL_RESOURCE_SLUGS: &[&str] = &[SLACK_SLUG];

/// Combine the dev config resources with those of `env_slug`.
pub async fn merge_remote_resources(
    dev_config: &DevConfig,
    remote: &dyn RemoteClient,
    env_slug: Option<&str>,
) -> StudioResult<IndexMap<String, ResourceWithEnv>> {
    let mut merged = dev_config.resources();

    for resource in list_remote_resources(remote, env_slug).await? {
        let slug = resource.slug().to_string();
        if !merged.contains_key(&slug) {
            merged.insert(slug, ResourceWithEnv::remote(resource, env_slug.map(str::to_string)));
        }
    }

    for slug in VIRTUAL_RESOURCE_SLUGS {
        if merged.contains_key(*slug) {
            continue;
        }
        if let Some(mut resource) = fetch_default_resource(remote, slug).await {
            if resource.id().is_empty() && *slug == SLACK_SLUG {
                resource.set_id(SLACK_RESOURCE_ID);
            }
            merged.insert(slug.to_string(), ResourceWithEnv::remote(resource, None));
        }
    }

    Ok(merged)
}

/// Resources the developer can run against remotely. Without a fallback
/// environment only the default convenience resources are looked up.
async fn list_remote_resources(remote: &dyn RemoteClient, env_slug: Option<&str>) -> StudioResult<Vec<Resource>> {
    let Some(env_slug) = env_slug else {
        let mut resources = Vec::new();
        for slug in DEFAULT_REMOTE_RESOURCE_SLUGS {
            if let Some(resource) = fetch_default_resource(remote, slug).await {
                resources.push(resource);
            }
        }
        return Ok(resources);
    };

    let records = remote
        .list_resources(env_slug)
        .await
        .map_err(|error| StudioError::upstream(format!("listing resources in environment {env_slug:?}"), error))?;
    let mut resources = Vec::with_capacity(records.len());
    for record in &records {
        match Resource::from_raw(record) {
            Ok(resource) => resources.push(resource),
            Err(error) => debug!(env = env_slug, error = %error, "skipping undecodable remote resource"),
        }
    }
    Ok(resources)
}

async fn fetch_default_resource(remote: &dyn RemoteClient, slug: &str) -> Option<Resource> {
    let record = match remote.get_resource(&GetResourceRequest::by_slug(slug, None)).await {
        Ok(record) => record,
        Err(error) => {
            debug!(slug, error = %error, "default remote resource unavailable");
            return None;
        }
    };
    match Resource::from_raw(&record) {
        Ok(resource) => Some(resource),
        Err(error) => {
            debug!(slug, error = %error, "skipping undecodable default remote resource");
            None
        }
    }
}

/// Combine the dev config variables with those of `env_slug`. Unlike
/// resources there are no virtual defaults.
pub async fn merge_remote_configs(
    dev_config: &DevConfig,
    remote: &dyn RemoteClient,
    env_slug: Option<&str>,
) -> StudioResult<IndexMap<String, ConfigWithEnv>> {
    let mut merged = dev_config.config_vars();
    let Some(env_slug) = env_slug else {
        return Ok(merged);
    };

    let configs = remote
        .list_configs(env_slug)
        .await
        .map_err(|error| StudioError::upstream(format!("listing configs in environment {env_slug:?}"), error))?;
    for config in configs {
        let key = if config.tag.is_empty() {
            config.name.clone()
        } else {
            format!("{}:{}", config.name, config.tag)
        };
        if !merged.contains_key(&key) {
            merged.insert(key, ConfigWithEnv::remote(config, Some(env_slug.to_string())));
        }
    }
    Ok(merged)
}

/// Find a resource by slug, falling back to its display name.
pub fn lookup_resource<'a>(
    resources: &'a IndexMap<String, ResourceWithEnv>,
    reference: &str,
) -> Option<&'a ResourceWithEnv> {
    resources
        .get(reference)
        .or_else(|| resources.values().find(|resource| resource.value.name() == reference))
}

/// Find a config variable by `name` or `name:tag`.
pub fn lookup_config<'a>(
    configs: &'a IndexMap<String, ConfigWithEnv>,
    reference: &str,
) -> StudioResult<&'a ConfigWithEnv> {
    if let Some(config) = configs.get(reference) {
        return Ok(config);
    }
    let (name, tag) = parse_config_name(reference)?;
    configs
        .values()
        .find(|config| config.value.name == name && config.value.tag == tag)
        .ok_or_else(|| StudioError::not_found(format!("cannot find config variable {reference:?}")))
}

/// Resolve a task's resource attachments (alias to slug or name) against the
/// merged resources.
///
/// Remote resources are listed without credentials, so each attached remote
/// resource is fetched again with its sensitive data.
pub async fn generate_alias_to_resource_map(
    attachments: &IndexMap<String, String>,
    resources: &IndexMap<String, ResourceWithEnv>,
    env_slug: Option<&str>,
    remote: &dyn RemoteClient,
) -> StudioResult<IndexMap<String, Resource>> {
    let mut by_alias = IndexMap::with_capacity(attachments.len());
    for (alias, reference) in attachments {
        let Some(found) = lookup_resource(resources, reference) else {
            let mut message = format!("cannot find resource {reference:?}. Is it defined in your dev config file");
            if let Some(env_slug) = env_slug {
                message.push_str(&format!(" or in your {env_slug} environment"));
            }
            message.push_str("? You can declare it under `resources` in the dev config file.");
            return Err(StudioError::not_found(message));
        };

        let resource = if found.remote {
            let request = GetResourceRequest::by_id(found.value.id(), env_slug).with_sensitive_data();
            let record = remote.get_resource(&request).await.map_err(|error| {
                StudioError::upstream(format!("getting credentials for resource {reference:?}"), error)
            })?;
            let mut resource = Resource::from_raw(&record)?;
            resource.calculate()?;
            resource
        } else {
            found.value.clone()
        };
        by_alias.insert(alias.clone(), resource);
    }
    Ok(by_alias)
}

/// Alias to resource id, as recorded on a run.
pub fn alias_to_resource_id(resources: &IndexMap<String, Resource>) -> IndexMap<String, String> {
    resources
        .iter()
        .map(|(alias, resource)| (alias.clone(), resource.id().to_string()))
        .collect()
}
