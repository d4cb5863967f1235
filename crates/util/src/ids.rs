//! Identifier generation.
//!
//! Run, prompt and sleep ids are random and prefixed by their entity type.
//! Dev resource and config ids are deterministic so a dev config file read
//! twice yields the same ids.

use uuid::Uuid;

const DEV_RESOURCE_PREFIX: &str = "res-";
const DEV_CONFIG_PREFIX: &str = "cfg-";

/// Generate a random id with the given entity prefix, e.g. `run01h...`.
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}{}", Uuid::new_v4().simple())
}

pub fn generate_run_id() -> String {
    generate_id("run")
}

pub fn generate_prompt_id() -> String {
    generate_id("pmt")
}

pub fn generate_sleep_id() -> String {
    generate_id("slp")
}

/// Deterministic id for a resource declared in the dev config file.
pub fn dev_resource_id(slug: &str) -> String {
    format!("{DEV_RESOURCE_PREFIX}{slug}")
}

/// Slug encoded in a dev resource id, if the id came from [`dev_resource_id`].
pub fn slug_from_dev_resource_id(id: &str) -> Option<&str> {
    id.strip_prefix(DEV_RESOURCE_PREFIX).filter(|slug| !slug.is_empty())
}

/// Deterministic id for a config variable declared in the dev config file.
pub fn dev_config_id(name: &str) -> String {
    format!("{DEV_CONFIG_PREFIX}{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_resource_ids_are_derived_from_slug() {
        assert_eq!(dev_resource_id("db"), "res-db");
        assert_eq!(slug_from_dev_resource_id("res-db"), Some("db"));
        assert_eq!(slug_from_dev_resource_id("res00000000zteamslack"), None);
    }

    #[test]
    fn random_ids_carry_prefix_and_differ() {
        let first = generate_run_id();
        let second = generate_run_id();
        assert!(first.starts_with("run"));
        assert_ne!(first, second);
    }
}
