use serde::{Deserialize, Serialize};
use studio_types::{StudioError, StudioResult};

use super::{BaseResource, FieldDescriptor, ResourceSpec, impl_base, require, update_secret};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MongoDbResource {
    #[serde(flatten)]
    pub base: BaseResource,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub connection_string: String,
}

impl ResourceSpec for MongoDbResource {
    const FIELDS: &'static [FieldDescriptor] = &[FieldDescriptor::secret(
        "connectionString",
        "Connection string (mongodb:// or mongodb+srv://)",
    )];

    impl_base!();

    fn validate(&self) -> StudioResult<()> {
        require("connectionString", &self.connection_string)?;
        let Some((scheme, rest)) = self.connection_string.split_once("://") else {
            return Err(StudioError::bad_request("invalid MongoDB connection string: missing scheme"));
        };
        if scheme != "mongodb" && scheme != "mongodb+srv" {
            return Err(StudioError::bad_request(format!(
                "invalid MongoDB connection string: unsupported scheme {scheme:?}"
            )));
        }
        let hosts = rest.rsplit_once('@').map_or(rest, |(_, hosts)| hosts);
        if hosts.split(['/', '?']).next().unwrap_or_default().is_empty() {
            return Err(StudioError::bad_request("invalid MongoDB connection string: missing host"));
        }
        Ok(())
    }

    fn scrub_sensitive_data(&mut self) {
        self.connection_string.clear();
    }

    fn update(&mut self, other: &Self) -> StudioResult<()> {
        update_secret(&mut self.connection_string, &other.connection_string);
        Ok(())
    }

    fn summary(&self) -> String {
        "MongoDB".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mongo(connection_string: &str) -> MongoDbResource {
        serde_json::from_value(json!({"kind": "mongodb", "slug": "m", "connectionString": connection_string})).unwrap()
    }

    #[test]
    fn accepts_standard_and_srv_strings() {
        mongo("mongodb://user:pw@localhost:27017/app").validate().unwrap();
        mongo("mongodb+srv://cluster0.example.net/?retryWrites=true").validate().unwrap();
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(mongo("postgres://localhost").validate().is_err());
        assert!(mongo("mongodb://user:pw@/app").validate().is_err());
        assert!(mongo("localhost:27017").validate().is_err());
    }
}
