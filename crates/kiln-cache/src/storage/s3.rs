//! S3-compatible object store (AWS S3, Aliyun OSS, MinIO, R2).

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use kiln_core::{Error, FileEntry, ObjectStore, Result};
use std::fmt;
use tracing::{debug, error, info};

/// Default endpoint when none is configured.
pub const DEFAULT_ENDPOINT: &str = "https://oss-cn-hangzhou.aliyuncs.com";

/// Default signing region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for an S3-compatible bucket.
#[derive(Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub access_key_secret: String,
    /// Address the bucket as a path segment instead of a subdomain.
    pub path_style: bool,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"***")
            .field("path_style", &self.path_style)
            .finish()
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            region: DEFAULT_REGION.to_string(),
            bucket: String::new(),
            access_key_id: String::new(),
            access_key_secret: String::new(),
            path_style: false,
        }
    }
}

impl S3Config {
    /// Check that every required setting is present.
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(Error::Configuration("bucket must be set".into()));
        }
        if self.access_key_id.trim().is_empty() || self.access_key_secret.trim().is_empty() {
            return Err(Error::Configuration(
                "access-key-id and access-key-secret must not be empty".into(),
            ));
        }
        if self.endpoint.trim().is_empty() {
            return Err(Error::Configuration("endpoint must not be empty".into()));
        }
        Ok(())
    }

    /// Endpoint with a scheme, defaulting to https.
    pub fn endpoint_url(&self) -> String {
        let endpoint = self.endpoint.trim().trim_end_matches('/');
        if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("https://{}", endpoint)
        }
    }
}

/// Object store backed by an S3-compatible bucket.
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    /// Build a client from static credentials.
    pub fn new(config: &S3Config) -> Result<Self> {
        config.validate()?;

        let credentials = Credentials::new(
            config.access_key_id.trim(),
            config.access_key_secret.trim(),
            None,
            None,
            "kiln-static",
        );
        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.endpoint_url())
            .credentials_provider(credentials)
            .force_path_style(config.path_style)
            .build();

        info!(
            endpoint = %config.endpoint_url(),
            bucket = %config.bucket,
            "Configured S3 storage"
        );

        Ok(Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket.clone(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn sdk_error<E>(operation: &'static str, key: &str, err: SdkError<E, HttpResponse>) -> Error
where
    E: std::error::Error + 'static,
{
    Error::storage(operation, key, DisplayErrorContext(err))
}

/// Some S3-compatible stores answer a missing key with a bare 404.
fn is_status_404<E>(err: &SdkError<E, HttpResponse>) -> bool {
    err.raw_response()
        .is_some_and(|response| response.status().as_u16() == 404)
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, content: Vec<u8>) -> Result<()> {
        let bytes = content.len();
        info!(bucket = %self.bucket, key, bytes, "Uploading cache archive");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(content))
            .send()
            .await
            .map_err(|e| {
                let err = sdk_error("put", key, e);
                error!(bucket = %self.bucket, key, error = %err, "Upload failed");
                err
            })?;

        info!(bucket = %self.bucket, key, "Uploaded cache archive");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        info!(bucket = %self.bucket, key, "Retrieving cache archive");

        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|s| s.is_no_such_key()) || is_status_404(&e) => {
                return Err(Error::ObjectNotFound(key.to_string()));
            }
            Err(e) => return Err(sdk_error("get", key, e)),
        };

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| Error::storage("get", key, format!("Failed to read object body: {}", e)))?;
        let content = body.into_bytes().to_vec();

        debug!(bucket = %self.bucket, key, bytes = content.len(), "Downloaded cache archive");
        Ok(content)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<FileEntry>> {
        let mut entries = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .delimiter("/");
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }

            let output = request.send().await.map_err(|e| sdk_error("list", prefix, e))?;

            for object in output.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                let last_modified = object
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
                    // An unknown age never counts as stale.
                    .unwrap_or_else(Utc::now);
                entries.push(FileEntry {
                    path: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified,
                });
            }

            match (output.is_truncated(), output.next_continuation_token()) {
                (Some(true), Some(token)) => continuation = Some(token.to_string()),
                _ => break,
            }
        }

        debug!(bucket = %self.bucket, prefix, count = entries.len(), "Listed objects");
        Ok(entries)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        info!(bucket = %self.bucket, key, "Deleting old cache archive");

        // DeleteObject succeeds on missing keys, so check existence first.
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => {}
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) || is_status_404(&e) => {
                return Err(Error::ObjectNotFound(key.to_string()));
            }
            Err(e) => return Err(sdk_error("delete", key, e)),
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("delete", key, e))?;

        info!(bucket = %self.bucket, key, "Deleted old cache archive");
        Ok(())
    }

    fn name(&self) -> &str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> S3Config {
        S3Config {
            bucket: "ci-cache".into(),
            access_key_id: "AKID".into(),
            access_key_secret: "secret".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_requires_bucket_and_credentials() {
        assert!(config().validate().is_ok());

        let mut missing_bucket = config();
        missing_bucket.bucket = " ".into();
        assert!(matches!(missing_bucket.validate(), Err(Error::Configuration(_))));

        let mut missing_secret = config();
        missing_secret.access_key_secret = String::new();
        assert!(matches!(missing_secret.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_endpoint_url_adds_scheme() {
        let mut cfg = config();
        cfg.endpoint = "oss-cn-hangzhou.aliyuncs.com".into();
        assert_eq!(cfg.endpoint_url(), "https://oss-cn-hangzhou.aliyuncs.com");
        cfg.endpoint = "http://localhost:9000/".into();
        assert_eq!(cfg.endpoint_url(), "http://localhost:9000");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("secret\""));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = S3Store::new(&S3Config::default()).err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
