//! Storage configuration types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::{Error, Result};

/// Service domain of the default (Tencent COS) object store
pub const COS_SERVICE_DOMAIN: &str = "myqcloud.com";

/// Immutable configuration for one bucket-backed store
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Bucket name (for COS this includes the APPID suffix, e.g. "certs-1250000000")
    pub bucket: String,

    /// Region, e.g. "ap-nanjing"
    pub region: String,

    /// Access key id; falls back to the ambient credential chain when unset
    pub secret_id: Option<String>,

    /// Secret access key paired with `secret_id`
    pub secret_key: Option<String>,

    /// Sub-directory all keys are stored under
    pub prefix: String,

    /// Custom endpoint URL (MinIO, LocalStack, ...) replacing the COS endpoint
    pub endpoint: Option<String>,

    /// Force path-style addressing (required for most custom endpoints)
    pub force_path_style: bool,

    /// Distributed lock settings
    pub lock: LockConfig,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("secret_id", &self.secret_id)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("prefix", &self.prefix)
            .field("endpoint", &self.endpoint)
            .field("force_path_style", &self.force_path_style)
            .field("lock", &self.lock)
            .finish()
    }
}

impl StorageConfig {
    /// Create a configuration for a bucket in a region
    pub fn new(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            ..Default::default()
        }
    }

    /// Set the static credential pair
    pub fn with_credentials(
        mut self,
        secret_id: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.secret_id = Some(secret_id.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    /// Set the key prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Point the store at a custom S3-compatible endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>, force_path_style: bool) -> Self {
        self.endpoint = Some(endpoint.into());
        self.force_path_style = force_path_style;
        self
    }

    /// Replace the lock settings
    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    /// Load a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: StorageConfig = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Prefix with surrounding separators removed
    pub fn trimmed_prefix(&self) -> &str {
        self.prefix.trim_matches('/')
    }

    /// Endpoint handed to the object-store client
    ///
    /// Defaults to the regional COS service endpoint; the client prepends
    /// the bucket when virtual-hosted addressing is used.
    pub fn service_endpoint(&self) -> Result<Url> {
        let raw = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://cos.{}.{}", self.region, COS_SERVICE_DOMAIN),
        };
        parse_url(&raw)
    }

    /// Fully qualified bucket URL, `https://{bucket}.cos.{region}.myqcloud.com`
    /// unless a custom endpoint is configured
    pub fn bucket_url(&self) -> Result<Url> {
        match &self.endpoint {
            Some(endpoint) if self.force_path_style => {
                let base = parse_url(endpoint)?;
                base.join(&format!("{}/", self.bucket))
                    .map_err(|e| Error::InvalidConfig {
                        message: format!("Failed to build bucket URL: {}", e),
                    })
            }
            Some(endpoint) => {
                let mut url = parse_url(endpoint)?;
                let host = url.host_str().unwrap_or_default().to_string();
                url.set_host(Some(&format!("{}.{}", self.bucket, host)))
                    .map_err(|e| Error::InvalidConfig {
                        message: format!("Failed to build bucket URL: {}", e),
                    })?;
                Ok(url)
            }
            None => parse_url(&format!(
                "https://{}.cos.{}.{}",
                self.bucket, self.region, COS_SERVICE_DOMAIN
            )),
        }
    }

    /// Validate the configuration
    ///
    /// Malformed bucket/region combinations fail here, when the URL is built,
    /// rather than on the first request.
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "bucket must not be empty".to_string(),
            });
        }
        if self.bucket.contains('/') {
            return Err(Error::InvalidConfig {
                message: format!("bucket must not contain '/': {}", self.bucket),
            });
        }
        if self.endpoint.is_none() && self.region.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "region must not be empty".to_string(),
            });
        }
        if self.secret_id.is_some() != self.secret_key.is_some() {
            return Err(Error::InvalidConfig {
                message: "secret_id and secret_key must be set together".to_string(),
            });
        }

        self.service_endpoint()?;
        self.bucket_url()?;

        self.lock.validate()
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::InvalidConfig {
        message: format!("Failed to parse bucket address {}: {}", raw, e),
    })
}

/// Distributed lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Delay between acquisition attempts
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,

    /// Age after which a lock marker is considered abandoned (None disables expiry)
    #[serde(with = "option_duration_ms")]
    pub lease: Option<Duration>,

    /// Acquire with the store's create-if-absent primitive
    ///
    /// When disabled, markers are written unconditionally and read back to
    /// compare the fencing token.
    pub conditional_writes: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            lease: Some(Duration::from_secs(2 * 60 * 60)),
            conditional_writes: true,
        }
    }
}

impl LockConfig {
    /// Validate lock settings
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig {
                message: "lock poll_interval must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Duration serialization helper (milliseconds)
mod duration_ms {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod option_duration_ms {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
