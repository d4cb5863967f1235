//! Resource kinds.
//!
//! Every kind is a plain struct implementing [`ResourceSpec`]; [`Resource`]
//! is the closed set of them. [`Resource::from_raw`] is the single factory
//! used for both dev config entries and remote API payloads, so the two can
//! never drift apart.

use std::fmt;
use std::str::FromStr;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use studio_types::{RawResource, StudioError, StudioResult};

mod http;
mod messaging;
mod mongodb;
mod sql;
mod warehouse;

pub use http::{GraphQlResource, RestAuth, RestResource};
pub use messaging::{MailgunResource, SendGridResource, SlackResource, SmtpAuth, SmtpResource};
pub use mongodb::MongoDbResource;
pub use sql::{MysqlResource, PostgresResource, SqlServerResource, SshTunnel};
pub use warehouse::{BigQueryResource, SnowflakeResource};

/// Discriminator stored under the `kind` key of every resource record.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Postgres,
    Mysql,
    Redshift,
    SqlServer,
    Snowflake,
    BigQuery,
    Rest,
    GraphQl,
    Smtp,
    MongoDb,
    SendGrid,
    Mailgun,
    Slack,
}

impl ResourceKind {
    pub const ALL: &'static [ResourceKind] = &[
        Self::Postgres,
        Self::Mysql,
        Self::Redshift,
        Self::SqlServer,
        Self::Snowflake,
        Self::BigQuery,
        Self::Rest,
        Self::GraphQl,
        Self::Smtp,
        Self::MongoDb,
        Self::SendGrid,
        Self::Mailgun,
        Self::Slack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Redshift => "redshift",
            Self::SqlServer => "sqlserver",
            Self::Snowflake => "snowflake",
            Self::BigQuery => "bigquery",
            Self::Rest => "rest",
            Self::GraphQl => "graphql",
            Self::Smtp => "smtp",
            Self::MongoDb => "mongodb",
            Self::SendGrid => "sendgrid",
            Self::Mailgun => "mailgun",
            Self::Slack => "slack",
        }
    }

    /// Kinds that are managed by the platform and cannot be edited locally.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Slack)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = StudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| StudioError::bad_request(format!("unknown resource kind {s:?}")))
    }
}

/// Attributes shared by every kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseResource {
    pub kind: ResourceKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl BaseResource {
    /// Copy over the non-empty fields of `other`.
    pub fn update(&mut self, other: &BaseResource) {
        if !other.id.is_empty() {
            self.id = other.id.clone();
        }
        if !other.slug.is_empty() {
            self.slug = other.slug.clone();
        }
        if !other.name.is_empty() {
            self.name = other.name.clone();
        }
    }
}

/// Static description of a resource field used for interactive prompting and
/// for masking secrets in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Key in the serialized record.
    pub name: &'static str,
    pub prompt: &'static str,
    pub secret: bool,
    pub optional: bool,
}

impl FieldDescriptor {
    pub const fn required(name: &'static str, prompt: &'static str) -> Self {
        Self {
            name,
            prompt,
            secret: false,
            optional: false,
        }
    }

    pub const fn secret(name: &'static str, prompt: &'static str) -> Self {
        Self {
            name,
            prompt,
            secret: true,
            optional: false,
        }
    }

    pub const fn optional(name: &'static str, prompt: &'static str) -> Self {
        Self {
            name,
            prompt,
            secret: false,
            optional: true,
        }
    }

    pub const fn optional_secret(name: &'static str, prompt: &'static str) -> Self {
        Self {
            name,
            prompt,
            secret: true,
            optional: true,
        }
    }
}

/// Behaviour every resource kind provides.
pub trait ResourceSpec: Clone + Serialize + DeserializeOwned {
    const FIELDS: &'static [FieldDescriptor];

    fn base(&self) -> &BaseResource;

    fn base_mut(&mut self) -> &mut BaseResource;

    /// Field completeness and format checks.
    fn validate(&self) -> StudioResult<()>;

    /// Derive computed fields such as connection strings.
    fn calculate(&mut self) -> StudioResult<()> {
        Ok(())
    }

    /// Remove computed fields before the resource is written to disk.
    fn scrub_calculated_fields(&mut self) {}

    fn scrub_sensitive_data(&mut self);

    /// Apply a partial update. Secrets are only overwritten by non-empty values.
    fn update(&mut self, other: &Self) -> StudioResult<()>;

    /// Short human-readable target, e.g. `host:port`.
    fn summary(&self) -> String;
}

macro_rules! impl_base {
    () => {
        fn base(&self) -> &crate::kinds::BaseResource {
            &self.base
        }

        fn base_mut(&mut self) -> &mut crate::kinds::BaseResource {
            &mut self.base
        }
    };
}
pub(crate) use impl_base;

/// Error for a required field that is empty.
pub fn missing_field(field: impl fmt::Display) -> StudioError {
    StudioError::bad_request(format!("missing required field: {field}"))
}

/// Overwrite `target` only when `incoming` is non-empty.
pub(crate) fn update_secret(target: &mut String, incoming: &str) {
    if !incoming.is_empty() {
        *target = incoming.to_string();
    }
}

pub(crate) fn require(field: &'static str, value: &str) -> StudioResult<()> {
    if value.is_empty() {
        return Err(missing_field(field));
    }
    Ok(())
}

/// Accept strings, numbers and booleans for fields people tend to write
/// unquoted in YAML (ports, flags).
pub(crate) fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(value)) => Ok(value),
        Some(Value::Number(value)) => Ok(value.to_string()),
        Some(Value::Bool(value)) => Ok(value.to_string()),
        Some(other) => Err(D::Error::custom(format!("expected a string, got {other}"))),
    }
}

/// A typed resource.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Postgres(PostgresResource),
    Mysql(MysqlResource),
    /// Redshift speaks the Postgres wire protocol and shares its fields.
    Redshift(PostgresResource),
    SqlServer(SqlServerResource),
    Snowflake(SnowflakeResource),
    BigQuery(BigQueryResource),
    Rest(RestResource),
    GraphQl(GraphQlResource),
    Smtp(SmtpResource),
    MongoDb(MongoDbResource),
    SendGrid(SendGridResource),
    Mailgun(MailgunResource),
    Slack(SlackResource),
}

macro_rules! dispatch {
    ($value:expr, $inner:ident => $body:expr) => {
        match $value {
            Resource::Postgres($inner) => $body,
            Resource::Mysql($inner) => $body,
            Resource::Redshift($inner) => $body,
            Resource::SqlServer($inner) => $body,
            Resource::Snowflake($inner) => $body,
            Resource::BigQuery($inner) => $body,
            Resource::Rest($inner) => $body,
            Resource::GraphQl($inner) => $body,
            Resource::Smtp($inner) => $body,
            Resource::MongoDb($inner) => $body,
            Resource::SendGrid($inner) => $body,
            Resource::Mailgun($inner) => $body,
            Resource::Slack($inner) => $body,
        }
    };
}

fn decode<T: ResourceSpec>(kind: ResourceKind, raw: &RawResource) -> StudioResult<T> {
    serde_json::from_value(Value::Object(raw.clone()))
        .map_err(|error| StudioError::bad_request(format!("invalid {kind} resource: {error}")))
}

impl Resource {
    /// Build a typed resource from a loosely typed record.
    pub fn from_raw(raw: &RawResource) -> StudioResult<Self> {
        let kind = match raw.get("kind") {
            Some(Value::String(kind)) => kind.parse::<ResourceKind>()?,
            Some(other) => return Err(StudioError::bad_request(format!("expected kind to be a string, got {other}"))),
            None => return Err(missing_field("kind")),
        };
        Ok(match kind {
            ResourceKind::Postgres => Self::Postgres(decode(kind, raw)?),
            ResourceKind::Mysql => Self::Mysql(decode(kind, raw)?),
            ResourceKind::Redshift => Self::Redshift(decode(kind, raw)?),
            ResourceKind::SqlServer => Self::SqlServer(decode(kind, raw)?),
            ResourceKind::Snowflake => Self::Snowflake(decode(kind, raw)?),
            ResourceKind::BigQuery => Self::BigQuery(decode(kind, raw)?),
            ResourceKind::Rest => Self::Rest(decode(kind, raw)?),
            ResourceKind::GraphQl => Self::GraphQl(decode(kind, raw)?),
            ResourceKind::Smtp => Self::Smtp(decode(kind, raw)?),
            ResourceKind::MongoDb => Self::MongoDb(decode(kind, raw)?),
            ResourceKind::SendGrid => Self::SendGrid(decode(kind, raw)?),
            ResourceKind::Mailgun => Self::Mailgun(decode(kind, raw)?),
            ResourceKind::Slack => Self::Slack(decode(kind, raw)?),
        })
    }

    /// Serialize back into a loosely typed record.
    pub fn to_raw(&self) -> StudioResult<RawResource> {
        let value = dispatch!(self, inner => serde_json::to_value(inner))
            .map_err(|error| StudioError::internal("serializing resource", error))?;
        match value {
            Value::Object(map) => Ok(map),
            other => Err(StudioError::internal("serializing resource", format!("expected an object, got {other}"))),
        }
    }

    /// Record written to the dev config file: no id and no computed fields.
    pub fn to_file_record(&self) -> StudioResult<RawResource> {
        let mut scrubbed = self.clone();
        scrubbed.scrub_calculated_fields();
        let mut raw = scrubbed.to_raw()?;
        raw.remove("id");
        Ok(raw)
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Redshift(_) => ResourceKind::Redshift,
            _ => self.base().kind,
        }
    }

    pub fn base(&self) -> &BaseResource {
        dispatch!(self, inner => inner.base())
    }

    pub fn id(&self) -> &str {
        &self.base().id
    }

    pub fn slug(&self) -> &str {
        &self.base().slug
    }

    pub fn name(&self) -> &str {
        &self.base().name
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        dispatch!(self, inner => inner.base_mut().id = id.into())
    }

    pub fn fields(&self) -> &'static [FieldDescriptor] {
        fields_for(self.kind())
    }

    pub fn validate(&self) -> StudioResult<()> {
        dispatch!(self, inner => inner.validate())
    }

    pub fn calculate(&mut self) -> StudioResult<()> {
        dispatch!(self, inner => inner.calculate())
    }

    pub fn scrub_calculated_fields(&mut self) {
        dispatch!(self, inner => inner.scrub_calculated_fields())
    }

    pub fn scrub_sensitive_data(&mut self) {
        dispatch!(self, inner => inner.scrub_sensitive_data())
    }

    /// Apply `other` as a partial update of the same kind.
    pub fn update(&mut self, other: &Resource) -> StudioResult<()> {
        if self.kind().is_read_only() {
            return Err(StudioError::unsupported(format!(
                "{} resources are managed by the platform and cannot be updated",
                self.kind()
            )));
        }
        match (self, other) {
            (Self::Postgres(current), Self::Postgres(incoming)) | (Self::Redshift(current), Self::Redshift(incoming)) => {
                apply(current, incoming)
            }
            (Self::Mysql(current), Self::Mysql(incoming)) => apply(current, incoming),
            (Self::SqlServer(current), Self::SqlServer(incoming)) => apply(current, incoming),
            (Self::Snowflake(current), Self::Snowflake(incoming)) => apply(current, incoming),
            (Self::BigQuery(current), Self::BigQuery(incoming)) => apply(current, incoming),
            (Self::Rest(current), Self::Rest(incoming)) => apply(current, incoming),
            (Self::GraphQl(current), Self::GraphQl(incoming)) => apply(current, incoming),
            (Self::Smtp(current), Self::Smtp(incoming)) => apply(current, incoming),
            (Self::MongoDb(current), Self::MongoDb(incoming)) => apply(current, incoming),
            (Self::SendGrid(current), Self::SendGrid(incoming)) => apply(current, incoming),
            (Self::Mailgun(current), Self::Mailgun(incoming)) => apply(current, incoming),
            (current, incoming) => Err(StudioError::bad_request(format!(
                "cannot update {} resource {:?} with a {} payload",
                current.kind(),
                current.slug(),
                incoming.kind()
            ))),
        }
    }

    pub fn summary(&self) -> String {
        dispatch!(self, inner => inner.summary())
    }

    /// Field values for display, with secrets masked.
    pub fn display_fields(&self) -> StudioResult<Vec<(&'static str, String)>> {
        let raw = self.to_raw()?;
        Ok(self
            .fields()
            .iter()
            .filter_map(|field| {
                let value = raw.get(field.name)?;
                let rendered = match value {
                    Value::String(text) => text.clone(),
                    Value::Null => return None,
                    other => other.to_string(),
                };
                if rendered.is_empty() {
                    return None;
                }
                let rendered = if field.secret { "******".to_string() } else { rendered };
                Some((field.name, rendered))
            })
            .collect())
    }
}

fn apply<T: ResourceSpec>(current: &mut T, incoming: &T) -> StudioResult<()> {
    current.update(incoming)?;
    current.base_mut().update(incoming.base());
    current.calculate()
}

/// Static field table for a kind.
pub fn fields_for(kind: ResourceKind) -> &'static [FieldDescriptor] {
    match kind {
        ResourceKind::Postgres | ResourceKind::Redshift => PostgresResource::FIELDS,
        ResourceKind::Mysql => MysqlResource::FIELDS,
        ResourceKind::SqlServer => SqlServerResource::FIELDS,
        ResourceKind::Snowflake => SnowflakeResource::FIELDS,
        ResourceKind::BigQuery => BigQueryResource::FIELDS,
        ResourceKind::Rest => RestResource::FIELDS,
        ResourceKind::GraphQl => GraphQlResource::FIELDS,
        ResourceKind::Smtp => SmtpResource::FIELDS,
        ResourceKind::MongoDb => MongoDbResource::FIELDS,
        ResourceKind::SendGrid => SendGridResource::FIELDS,
        ResourceKind::Mailgun => MailgunResource::FIELDS,
        ResourceKind::Slack => SlackResource::FIELDS,
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}: {})", self.slug(), self.kind(), self.summary())
    }
}
