//! S3 storage backend
//!
//! Each artifact is written with a single `PutObject`, which the service
//! applies atomically. Any S3-compatible endpoint works, including Google
//! Cloud Storage through its interoperability API.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use tracing::debug;

use super::{ArtifactStore, StorageError};

const DEFAULT_REGION: &str = "us-east-1";

/// S3 connection settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S3Config {
    /// Bucket name
    pub bucket: String,
    /// Region; the environment default is used when unset
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services
    pub endpoint: Option<String>,
    /// Address buckets by path instead of virtual host
    pub force_path_style: bool,
    /// Prefix prepended to every key
    pub prefix: Option<String>,
    /// Upload objects with a public-read ACL
    pub public_read: bool,
    /// Base of returned URLs, e.g. a CDN in front of the bucket
    pub public_base_url: Option<String>,
}

impl S3Config {
    /// Settings for `bucket` with defaults elsewhere
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    /// Interop settings for Google Cloud Storage
    pub fn google_cloud_storage(bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        Self {
            public_base_url: Some(format!("https://storage.googleapis.com/{}", bucket)),
            endpoint: Some("https://storage.googleapis.com".to_string()),
            region: Some("auto".to_string()),
            force_path_style: true,
            public_read: true,
            bucket,
            prefix: None,
        }
    }
}

/// S3-backed artifact store
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    region: String,
    endpoint: Option<String>,
    prefix: String,
    public_read: bool,
    public_base_url: Option<String>,
}

impl S3Store {
    /// Load credentials from the environment and connect
    pub async fn connect(config: &S3Config) -> Result<Self, StorageError> {
        if config.bucket.is_empty() {
            return Err(StorageError::Backend("bucket name is empty".into()));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(ref region) = config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(ref endpoint) = config.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let shared_config = loader.load().await;

        let region = shared_config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let mut s3_builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if config.force_path_style {
            s3_builder = s3_builder.force_path_style(true);
        }

        Ok(Self::from_client(Client::from_conf(s3_builder.build()), config, region))
    }

    /// Wrap an already configured client
    pub fn from_client(client: Client, config: &S3Config, region: impl Into<String>) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
            region: region.into(),
            endpoint: config.endpoint.as_ref().map(|e| e.trim_end_matches('/').to_string()),
            prefix: normalize_prefix(config.prefix.as_deref()),
            public_read: config.public_read,
            public_base_url: config
                .public_base_url
                .as_ref()
                .map(|b| b.trim_end_matches('/').to_string()),
        }
    }

    fn object_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    match prefix.map(|p| p.trim_matches('/')) {
        Some(p) if !p.is_empty() => format!("{}/", p),
        _ => String::new(),
    }
}

#[async_trait]
impl ArtifactStore for S3Store {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        let object_key = self.object_key(key);
        debug!(bucket = %self.bucket, key = %object_key, size = bytes.len(), "PutObject");

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .content_type(content_type)
            .body(ByteStream::from(bytes));
        if self.public_read {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }
        request
            .send()
            .await
            .map_err(|err| StorageError::Backend(err.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let object_key = self.object_key(key);
        debug!(bucket = %self.bucket, key = %object_key, "GetObject");

        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                let missing = err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    return Ok(None);
                }
                return Err(StorageError::Backend(err.to_string()));
            }
        };

        let data = output
            .body
            .collect()
            .await
            .map_err(|err| StorageError::Io(err.to_string()))?;
        Ok(Some(data.into_bytes().to_vec()))
    }

    fn url_for(&self, key: &str) -> String {
        let object_key = self.object_key(key);
        match (&self.public_base_url, &self.endpoint) {
            (Some(base), _) => format!("{}/{}", base, object_key),
            (None, Some(endpoint)) => format!("{}/{}/{}", endpoint, self.bucket, object_key),
            (None, None) => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, object_key
            ),
        }
    }
}
