use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use studio_types::{StudioError, StudioResult};

use super::{BaseResource, FieldDescriptor, ResourceSpec, impl_base, require};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RestAuth {
    Basic {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        /// Computed `Authorization` header.
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        headers: IndexMap<String, String>,
    },
}

impl RestAuth {
    fn update(&mut self, other: &RestAuth) {
        let (
            RestAuth::Basic { username, password, .. },
            RestAuth::Basic {
                username: incoming_username,
                password: incoming_password,
                ..
            },
        ) = (self, other);
        if incoming_username.is_some() {
            username.clone_from(incoming_username);
        }
        if incoming_password.as_deref().is_some_and(|value| !value.is_empty()) {
            password.clone_from(incoming_password);
        }
    }

    fn calculate(&mut self) {
        let RestAuth::Basic {
            username,
            password,
            headers,
        } = self;
        let credentials = format!(
            "{}:{}",
            username.as_deref().unwrap_or_default(),
            password.as_deref().unwrap_or_default()
        );
        headers.clear();
        headers.insert("Authorization".into(), format!("Basic {}", STANDARD.encode(credentials)));
    }

    fn scrub_calculated_fields(&mut self) {
        let RestAuth::Basic { headers, .. } = self;
        headers.clear();
    }

    fn scrub_sensitive_data(&mut self) {
        let RestAuth::Basic {
            username,
            password,
            headers,
        } = self;
        *username = None;
        *password = None;
        headers.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestResource {
    #[serde(flatten)]
    pub base: BaseResource,
    #[serde(default, rename = "baseURL")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub headers: IndexMap<String, String>,
    /// Names of entries in `headers` whose values are secret.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_headers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<RestAuth>,
}

impl RestResource {
    fn is_secret_header(&self, header: &str) -> bool {
        self.secret_headers.iter().any(|secret| secret == header)
    }
}

impl ResourceSpec for RestResource {
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::required("baseURL", "Base URL"),
        FieldDescriptor::optional("headers", "Headers"),
        FieldDescriptor::optional("secretHeaders", "Secret header names"),
    ];

    impl_base!();

    fn validate(&self) -> StudioResult<()> {
        require("baseURL", &self.base_url)?;
        if !self.base_url.starts_with("https://") && !self.base_url.starts_with("http://") {
            return Err(StudioError::bad_request(format!(
                "invalid URL protocol for baseURL {:?}",
                self.base_url
            )));
        }
        for header in &self.secret_headers {
            if !self.headers.contains_key(header) {
                return Err(StudioError::bad_request(format!(
                    "{header} is a secretHeader but not present in headers"
                )));
            }
        }
        Ok(())
    }

    fn calculate(&mut self) -> StudioResult<()> {
        if let Some(auth) = self.auth.as_mut() {
            auth.calculate();
        }
        Ok(())
    }

    fn scrub_calculated_fields(&mut self) {
        if let Some(auth) = self.auth.as_mut() {
            auth.scrub_calculated_fields();
        }
    }

    fn scrub_sensitive_data(&mut self) {
        let secret_headers = self.secret_headers.clone();
        for (name, value) in self.headers.iter_mut() {
            if secret_headers.contains(name) {
                value.clear();
            }
        }
        if let Some(auth) = self.auth.as_mut() {
            auth.scrub_sensitive_data();
        }
    }

    fn update(&mut self, other: &Self) -> StudioResult<()> {
        self.base_url = other.base_url.clone();
        let headers = other
            .headers
            .iter()
            .map(|(name, value)| {
                let value = if other.is_secret_header(name) && value.is_empty() {
                    self.headers.get(name).cloned().unwrap_or_default()
                } else {
                    value.clone()
                };
                (name.clone(), value)
            })
            .collect();
        self.headers = headers;
        self.secret_headers = other.secret_headers.clone();
        match (self.auth.as_mut(), other.auth.as_ref()) {
            (Some(current), Some(incoming)) => current.update(incoming),
            _ => self.auth = other.auth.clone(),
        }
        Ok(())
    }

    fn summary(&self) -> String {
        self.base_url.clone()
    }
}

/// A GraphQL endpoint is configured exactly like a REST one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlResource {
    #[serde(flatten)]
    pub rest: RestResource,
}

impl ResourceSpec for GraphQlResource {
    const FIELDS: &'static [FieldDescriptor] = RestResource::FIELDS;

    fn base(&self) -> &BaseResource {
        &self.rest.base
    }

    fn base_mut(&mut self) -> &mut BaseResource {
        &mut self.rest.base
    }

    fn validate(&self) -> StudioResult<()> {
        self.rest.validate()
    }

    fn calculate(&mut self) -> StudioResult<()> {
        self.rest.calculate()
    }

    fn scrub_calculated_fields(&mut self) {
        self.rest.scrub_calculated_fields()
    }

    fn scrub_sensitive_data(&mut self) {
        self.rest.scrub_sensitive_data()
    }

    fn update(&mut self, other: &Self) -> StudioResult<()> {
        self.rest.update(&other.rest)
    }

    fn summary(&self) -> String {
        self.rest.summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rest(value: serde_json::Value) -> RestResource {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn basic_auth_computes_authorization_header() {
        let mut resource = rest(json!({
            "kind": "rest", "slug": "api", "baseURL": "https://api.example.com",
            "auth": {"kind": "basic", "username": "user", "password": "pass"}
        }));
        resource.calculate().unwrap();
        let Some(RestAuth::Basic { headers, .. }) = &resource.auth else {
            panic!("expected basic auth");
        };
        assert_eq!(headers["Authorization"], "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn secret_headers_must_be_declared() {
        let resource = rest(json!({
            "kind": "rest", "slug": "api", "baseURL": "https://api.example.com",
            "secretHeaders": ["X-Api-Key"]
        }));
        let error = resource.validate().unwrap_err();
        assert!(error.to_string().contains("X-Api-Key"));
    }

    #[test]
    fn base_url_requires_http_scheme() {
        let resource = rest(json!({"kind": "rest", "slug": "api", "baseURL": "ftp://example.com"}));
        assert!(resource.validate().is_err());
    }

    #[test]
    fn scrub_clears_only_secret_headers() {
        let mut resource = rest(json!({
            "kind": "rest", "slug": "api", "baseURL": "https://api.example.com",
            "headers": {"X-Api-Key": "secret", "Accept": "application/json"},
            "secretHeaders": ["X-Api-Key"]
        }));
        resource.scrub_sensitive_data();
        assert_eq!(resource.headers["X-Api-Key"], "");
        assert_eq!(resource.headers["Accept"], "application/json");
    }
}
