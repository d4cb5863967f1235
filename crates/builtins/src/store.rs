use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use studio_types::{StudioError, StudioResult};
use tracing::debug;

/// Object contents together with the checksum published alongside them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub checksum: String,
}

/// Read access to the bucket builtins are published to.
#[async_trait]
pub trait BinaryStore: Send + Sync {
    /// Published checksum of `object`, without downloading it.
    async fn checksum(&self, object: &str) -> StudioResult<String>;

    async fn fetch(&self, object: &str) -> StudioResult<StoredObject>;
}

/// Anonymous access to a public Google Cloud Storage bucket through its JSON
/// API.
#[derive(Debug, Clone)]
pub struct GcsStore {
    http: Client,
    base_url: String,
    bucket: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMetadata {
    md5_hash: String,
}

impl GcsStore {
    pub fn new(base_url: &str, bucket: &str) -> StudioResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|error| StudioError::internal("building storage client", error))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
        })
    }

    fn object_url(&self, object: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.base_url,
            self.bucket,
            utf8_percent_encode(object, NON_ALPHANUMERIC)
        )
    }

    async fn get(&self, url: &str, media: bool, what: &str) -> StudioResult<reqwest::Response> {
        debug!(%url, media, "requesting builtins object");
        let mut request = self.http.get(url);
        if media {
            request = request.query(&[("alt", "media")]);
        }
        let response = request.send().await.map_err(|error| StudioError::upstream(what, error))?;
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(StudioError::not_found(format!("{what}: object not found at {url}"))),
            status => Err(StudioError::upstream(what, format!("HTTP {status}"))),
        }
    }
}

#[async_trait]
impl BinaryStore for GcsStore {
    async fn checksum(&self, object: &str) -> StudioResult<String> {
        let what = "getting builtins latest version";
        let response = self.get(&self.object_url(object), false, what).await?;
        let metadata: ObjectMetadata = response
            .json()
            .await
            .map_err(|error| StudioError::upstream(what, error))?;
        Ok(metadata.md5_hash)
    }

    async fn fetch(&self, object: &str) -> StudioResult<StoredObject> {
        // Metadata first so the checksum describes the bytes that follow.
        let checksum = self.checksum(object).await?;
        let what = "downloading builtins binary";
        let response = self.get(&self.object_url(object), true, what).await?;
        let bytes = response.bytes().await.map_err(|error| StudioError::upstream(what, error))?;
        Ok(StoredObject {
            bytes: bytes.to_vec(),
            checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_names_are_fully_escaped() {
        let store = GcsStore::new("https://storage.googleapis.com/", "bucket").unwrap();
        assert_eq!(
            store.object_url("builtin-builds/builtins-linux-amd64"),
            "https://storage.googleapis.com/storage/v1/b/bucket/o/builtin%2Dbuilds%2Fbuiltins%2Dlinux%2Damd64"
        );
    }
}
