//! Resources and config variables available to locally executed tasks.
//!
//! Three layers live here:
//!
//! - [`kinds`]: the typed resource model and its single factory,
//!   [`Resource::from_raw`].
//! - [`DevConfig`]: the developer's `airplane.dev.yaml`, holding locally
//!   declared resources, config variables and environment variables.
//! - [`merge`]: combining the dev config with what a remote environment
//!   provides, and resolving a task's resource aliases.

pub mod dev_config;
pub mod kinds;
pub mod merge;

pub use dev_config::{DEV_CONFIG_FILE_NAME, DEV_CONFIG_PATH_ENV, DevConfig};
pub use kinds::{FieldDescriptor, Resource, ResourceKind, ResourceSpec, fields_for};
pub use merge::{
    DEMO_DB_SLUG, SLACK_RESOURCE_ID, SLACK_SLUG, alias_to_resource_id, generate_alias_to_resource_map, lookup_config,
    lookup_resource, merge_remote_configs, merge_remote_resources,
};

/// A resource tagged with its origin.
pub type ResourceWithEnv = studio_types::WithEnv<Resource>;
