use serde::{Deserialize, Serialize};
use studio_types::{StudioError, StudioResult};

use super::{BaseResource, FieldDescriptor, ResourceSpec, impl_base, lenient_string, missing_field, require, update_secret};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SmtpAuth {
    Plain {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        identity: String,
        #[serde(default)]
        username: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        password: String,
    },
    #[serde(rename = "crammd5")]
    CramMd5 {
        #[serde(default)]
        username: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        secret: String,
    },
    Login {
        #[serde(default)]
        username: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        password: String,
    },
}

impl SmtpAuth {
    /// Same-kind update that keeps existing secrets. Returns `false` when the
    /// kinds differ and the caller should replace the whole value.
    fn update(&mut self, other: &SmtpAuth) -> bool {
        match (self, other) {
            (
                SmtpAuth::Plain {
                    identity,
                    username,
                    password,
                },
                SmtpAuth::Plain {
                    identity: incoming_identity,
                    username: incoming_username,
                    password: incoming_password,
                },
            ) => {
                identity.clone_from(incoming_identity);
                username.clone_from(incoming_username);
                update_secret(password, incoming_password);
                true
            }
            (
                SmtpAuth::CramMd5 { username, secret },
                SmtpAuth::CramMd5 {
                    username: incoming_username,
                    secret: incoming_secret,
                },
            ) => {
                username.clone_from(incoming_username);
                update_secret(secret, incoming_secret);
                true
            }
            (
                SmtpAuth::Login { username, password },
                SmtpAuth::Login {
                    username: incoming_username,
                    password: incoming_password,
                },
            ) => {
                username.clone_from(incoming_username);
                update_secret(password, incoming_password);
                true
            }
            _ => false,
        }
    }

    fn validate(&self, path: &str) -> StudioResult<()> {
        let (username, secret, secret_name) = match self {
            SmtpAuth::Plain { username, password, .. } | SmtpAuth::Login { username, password } => {
                (username, password, "password")
            }
            SmtpAuth::CramMd5 { username, secret } => (username, secret, "secret"),
        };
        if username.is_empty() {
            return Err(missing_field(format!("{path}.username")));
        }
        if secret.is_empty() {
            return Err(missing_field(format!("{path}.{secret_name}")));
        }
        Ok(())
    }

    fn scrub_sensitive_data(&mut self) {
        match self {
            SmtpAuth::Plain { password, .. } | SmtpAuth::Login { password, .. } => password.clear(),
            SmtpAuth::CramMd5 { secret, .. } => secret.clear(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmtpResource {
    #[serde(flatten)]
    pub base: BaseResource,
    #[serde(default)]
    pub hostname: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<SmtpAuth>,
}

impl ResourceSpec for SmtpResource {
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::required("hostname", "SMTP hostname"),
        FieldDescriptor::required("port", "SMTP port"),
        FieldDescriptor::required("auth", "Authentication (plain, crammd5 or login)"),
    ];

    impl_base!();

    fn validate(&self) -> StudioResult<()> {
        require("hostname", &self.hostname)?;
        require("port", &self.port)?;
        match &self.auth {
            Some(auth) => auth.validate("auth"),
            None => Err(missing_field("auth")),
        }
    }

    fn scrub_sensitive_data(&mut self) {
        if let Some(auth) = self.auth.as_mut() {
            auth.scrub_sensitive_data();
        }
    }

    fn update(&mut self, other: &Self) -> StudioResult<()> {
        self.hostname = other.hostname.clone();
        self.port = other.port.clone();
        let updated_in_place = match (self.auth.as_mut(), other.auth.as_ref()) {
            (Some(current), Some(incoming)) => current.update(incoming),
            _ => false,
        };
        if !updated_in_place {
            self.auth = other.auth.clone();
        }
        Ok(())
    }

    fn summary(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendGridResource {
    #[serde(flatten)]
    pub base: BaseResource,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
}

impl ResourceSpec for SendGridResource {
    const FIELDS: &'static [FieldDescriptor] = &[FieldDescriptor::secret("apiKey", "SendGrid API key")];

    impl_base!();

    fn validate(&self) -> StudioResult<()> {
        require("apiKey", &self.api_key)
    }

    fn scrub_sensitive_data(&mut self) {
        self.api_key.clear();
    }

    fn update(&mut self, other: &Self) -> StudioResult<()> {
        update_secret(&mut self.api_key, &other.api_key);
        Ok(())
    }

    fn summary(&self) -> String {
        "SendGrid".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailgunResource {
    #[serde(flatten)]
    pub base: BaseResource,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    #[serde(default)]
    pub domain: String,
}

impl ResourceSpec for MailgunResource {
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::secret("apiKey", "Mailgun API key"),
        FieldDescriptor::required("domain", "Sending domain"),
    ];

    impl_base!();

    fn validate(&self) -> StudioResult<()> {
        require("apiKey", &self.api_key)?;
        require("domain", &self.domain)
    }

    fn scrub_sensitive_data(&mut self) {
        self.api_key.clear();
    }

    fn update(&mut self, other: &Self) -> StudioResult<()> {
        update_secret(&mut self.api_key, &other.api_key);
        self.domain = other.domain.clone();
        Ok(())
    }

    fn summary(&self) -> String {
        format!("Mailgun<{}>", self.domain)
    }
}

/// The team's chat integration. Provisioned by the platform; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackResource {
    #[serde(flatten)]
    pub base: BaseResource,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_token: String,
}

impl ResourceSpec for SlackResource {
    const FIELDS: &'static [FieldDescriptor] = &[FieldDescriptor::secret("accessToken", "Slack access token")];

    impl_base!();

    fn validate(&self) -> StudioResult<()> {
        Ok(())
    }

    fn scrub_sensitive_data(&mut self) {
        self.access_token.clear();
    }

    fn update(&mut self, _other: &Self) -> StudioResult<()> {
        Err(StudioError::unsupported("Slack resource cannot be updated"))
    }

    fn summary(&self) -> String {
        "Slack".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn smtp_validation_uses_auth_paths() {
        let resource: SmtpResource = serde_json::from_value(json!({
            "kind": "smtp", "slug": "mail", "hostname": "smtp.example.com", "port": 587,
            "auth": {"kind": "crammd5", "username": "u"}
        }))
        .unwrap();
        assert_eq!(resource.port, "587");
        let error = resource.validate().unwrap_err();
        assert!(error.to_string().contains("auth.secret"));
    }

    #[test]
    fn smtp_auth_kind_change_replaces_auth() {
        let mut resource: SmtpResource = serde_json::from_value(json!({
            "kind": "smtp", "slug": "mail", "hostname": "h", "port": "25",
            "auth": {"kind": "plain", "username": "u", "password": "pw"}
        }))
        .unwrap();
        let incoming: SmtpResource = serde_json::from_value(json!({
            "kind": "smtp", "slug": "mail", "hostname": "h", "port": "25",
            "auth": {"kind": "login", "username": "u2", "password": "pw2"}
        }))
        .unwrap();
        resource.update(&incoming).unwrap();
        assert!(matches!(resource.auth, Some(SmtpAuth::Login { ref username, .. }) if username == "u2"));
    }

    #[test]
    fn smtp_requires_auth() {
        let resource: SmtpResource =
            serde_json::from_value(json!({"kind": "smtp", "slug": "mail", "hostname": "h", "port": "25"})).unwrap();
        assert!(resource.validate().unwrap_err().to_string().contains("auth"));
    }
}
