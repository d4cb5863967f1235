use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use studio_types::StudioResult;

use super::sql::encode;
use super::{BaseResource, FieldDescriptor, ResourceSpec, impl_base, missing_field, require, update_secret};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnowflakeResource {
    #[serde(flatten)]
    pub base: BaseResource,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub warehouse: String,
    #[serde(default)]
    pub database: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub schema: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dsn: String,
}

impl ResourceSpec for SnowflakeResource {
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::required("account", "Account identifier"),
        FieldDescriptor::required("warehouse", "Warehouse"),
        FieldDescriptor::required("database", "Database"),
        FieldDescriptor::optional("schema", "Schema"),
        FieldDescriptor::optional("role", "Role"),
        FieldDescriptor::required("username", "Username"),
        FieldDescriptor::secret("password", "Password"),
    ];

    impl_base!();

    fn validate(&self) -> StudioResult<()> {
        require("account", &self.account)?;
        require("warehouse", &self.warehouse)?;
        require("database", &self.database)?;
        require("username", &self.username)?;
        require("password", &self.password)?;
        require("dsn", &self.dsn)
    }

    fn calculate(&mut self) -> StudioResult<()> {
        let query = [
            ("application", "Studio"),
            ("database", self.database.as_str()),
            ("role", self.role.as_str()),
            ("schema", self.schema.as_str()),
            ("warehouse", self.warehouse.as_str()),
        ]
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| format!("{key}={}", encode(value)))
        .collect::<Vec<_>>()
        .join("&");
        self.dsn = format!(
            "{}:{}@{}.snowflakecomputing.com:443?{query}",
            encode(&self.username),
            encode(&self.password),
            self.account
        );
        Ok(())
    }

    fn scrub_calculated_fields(&mut self) {
        self.dsn.clear();
    }

    fn scrub_sensitive_data(&mut self) {
        self.password.clear();
        self.dsn.clear();
    }

    fn update(&mut self, other: &Self) -> StudioResult<()> {
        self.account = other.account.clone();
        self.warehouse = other.warehouse.clone();
        self.database = other.database.clone();
        self.schema = other.schema.clone();
        self.role = other.role.clone();
        self.username = other.username.clone();
        update_secret(&mut self.password, &other.password);
        Ok(())
    }

    fn summary(&self) -> String {
        format!("{}/{}/{}", self.account, self.database, self.schema)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BigQueryResource {
    #[serde(flatten)]
    pub base: BaseResource,
    /// Base64 of `raw_credentials`; computed.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credentials: String,
    /// Service account key JSON.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_credentials: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub data_set: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dsn: String,
}

impl ResourceSpec for BigQueryResource {
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::secret("rawCredentials", "Service account key (JSON)"),
        FieldDescriptor::required("projectId", "Project ID"),
        FieldDescriptor::required("location", "Location"),
        FieldDescriptor::required("dataSet", "Dataset"),
    ];

    impl_base!();

    fn validate(&self) -> StudioResult<()> {
        if self.raw_credentials.is_empty() || self.credentials.is_empty() {
            return Err(missing_field("rawCredentials"));
        }
        require("location", &self.location)?;
        require("dataSet", &self.data_set)?;
        require("projectId", &self.project_id)?;
        require("dsn", &self.dsn)
    }

    fn calculate(&mut self) -> StudioResult<()> {
        // Older records carried the raw key under `credentials`.
        if self.raw_credentials.is_empty() {
            self.raw_credentials = std::mem::take(&mut self.credentials);
        }
        self.credentials = STANDARD.encode(self.raw_credentials.as_bytes());
        self.dsn = format!(
            "bigquery://{}/{}/{}?credentials={}",
            self.project_id,
            self.location,
            self.data_set,
            encode(&self.credentials)
        );
        Ok(())
    }

    fn scrub_calculated_fields(&mut self) {
        self.credentials.clear();
        self.dsn.clear();
    }

    fn scrub_sensitive_data(&mut self) {
        self.credentials.clear();
        self.raw_credentials.clear();
        self.dsn.clear();
    }

    fn update(&mut self, other: &Self) -> StudioResult<()> {
        self.project_id = other.project_id.clone();
        self.location = other.location.clone();
        self.data_set = other.data_set.clone();
        if !other.raw_credentials.is_empty() {
            self.raw_credentials = other.raw_credentials.clone();
        } else if !other.credentials.is_empty() {
            self.raw_credentials = other.credentials.clone();
        }
        Ok(())
    }

    fn summary(&self) -> String {
        format!("{}/{}/{}", self.project_id, self.location, self.data_set)
    }
}
