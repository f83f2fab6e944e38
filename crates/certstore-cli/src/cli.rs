//! Command-line definitions

use std::path::PathBuf;

use certstore_core::{Result, StorageConfig};
use clap::{Parser, Subcommand};

/// Inspect and manage certificate storage in an object-store bucket
#[derive(Debug, Parser)]
#[command(name = "certstore", version)]
pub struct Cli {
    /// JSON configuration file; flags override its values
    #[arg(long, short, env = "CERTSTORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bucket name
    #[arg(long, env = "CERTSTORE_BUCKET")]
    pub bucket: Option<String>,

    /// Bucket region, e.g. ap-nanjing
    #[arg(long, env = "CERTSTORE_REGION")]
    pub region: Option<String>,

    /// Access key id
    #[arg(long, env = "CERTSTORE_SECRET_ID")]
    pub secret_id: Option<String>,

    /// Secret access key
    #[arg(long, env = "CERTSTORE_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Key prefix inside the bucket
    #[arg(long, env = "CERTSTORE_PREFIX")]
    pub prefix: Option<String>,

    /// Custom S3-compatible endpoint
    #[arg(long, env = "CERTSTORE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Use path-style addressing with a custom endpoint
    #[arg(long)]
    pub path_style: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Store a file (or stdin) under a key
    Put {
        key: String,
        /// Read the value from this file instead of stdin
        #[arg(long, short)]
        file: Option<PathBuf>,
    },
    /// Print the value stored under a key
    Get {
        key: String,
        /// Write the value to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Report whether a key exists
    Exists { key: String },
    /// Delete a key
    Rm { key: String },
    /// List keys under a prefix
    Ls {
        #[arg(default_value = "")]
        prefix: String,
        /// Include keys at every depth
        #[arg(long, short)]
        recursive: bool,
    },
    /// Show key metadata
    Stat { key: String },
    /// Acquire a lock and hold it until interrupted
    Lock {
        key: String,
        /// Give up waiting after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Release a lock
    Unlock { key: String },
}

impl Cli {
    /// Merge the configuration file with command-line overrides
    pub fn storage_config(&self) -> Result<StorageConfig> {
        let mut config = match &self.config {
            Some(path) => StorageConfig::from_file(path)?,
            None => StorageConfig::default(),
        };

        if let Some(bucket) = &self.bucket {
            config.bucket = bucket.clone();
        }
        if let Some(region) = &self.region {
            config.region = region.clone();
        }
        if let Some(secret_id) = &self.secret_id {
            config.secret_id = Some(secret_id.clone());
        }
        if let Some(secret_key) = &self.secret_key {
            config.secret_key = Some(secret_key.clone());
        }
        if let Some(prefix) = &self.prefix {
            config.prefix = prefix.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = Some(endpoint.clone());
        }
        if self.path_style {
            config.force_path_style = true;
        }

        config.validate()?;
        Ok(config)
    }
}
