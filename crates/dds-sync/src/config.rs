//! Configuration management
//!
//! Settings are environment-driven, matching how the surrounding platform
//! injects resolved secrets into each compute unit. The profile key in the
//! request envelope selects which secret block the platform materializes;
//! by the time this process starts, the environment already holds the values
//! for exactly one profile.

use serde::{Deserialize, Serialize};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default timeout for extract API requests in seconds.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 300;

/// Default maximum attempts for transient API/download failures.
pub const DEFAULT_API_MAX_RETRIES: u32 = 3;

/// Default number of archive parts downloaded concurrently per descriptor.
pub const DEFAULT_PART_CONCURRENCY: usize = 4;

/// Default object-storage prefix under which archives and unpacked
/// extracts are kept.
pub const DEFAULT_STORAGE_PREFIX: &str = "direct-data";

/// Default warehouse connection URL for local development.
pub const DEFAULT_WAREHOUSE_URL: &str = "postgresql://localhost/dds";

/// Default maximum warehouse connections in the pool.
pub const DEFAULT_WAREHOUSE_MAX_CONNECTIONS: u32 = 5;

/// Default number of rows per load batch.
pub const DEFAULT_LOAD_BATCH_SIZE: usize = 500;

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub warehouse: WarehouseConfig,
    pub loader: LoaderConfig,
}

/// Extract API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the vendor API, e.g. `https://tenant.example.com/api/v24.1`
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub part_concurrency: usize,
}

/// Object storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible stores (minio, localstack)
    pub endpoint: Option<String>,
    pub path_style: bool,
    /// Prefix under which all archives and unpacked extracts live
    pub base_prefix: String,
}

/// Warehouse configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Data loader tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Rows per staged insert batch
    pub batch_size: usize,
}

impl SyncConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = SyncConfig {
            api: ApiConfig {
                base_url: std::env::var("DDS_API_BASE_URL").unwrap_or_default(),
                username: std::env::var("DDS_API_USERNAME").unwrap_or_default(),
                password: std::env::var("DDS_API_PASSWORD").unwrap_or_default(),
                timeout_secs: env_parsed("DDS_API_TIMEOUT_SECS", DEFAULT_API_TIMEOUT_SECS),
                max_retries: env_parsed("DDS_API_MAX_RETRIES", DEFAULT_API_MAX_RETRIES),
                part_concurrency: env_parsed("DDS_PART_CONCURRENCY", DEFAULT_PART_CONCURRENCY),
            },
            storage: StorageConfig {
                bucket: std::env::var("DDS_S3_BUCKET").unwrap_or_default(),
                region: std::env::var("DDS_S3_REGION")
                    .unwrap_or_else(|_| "us-east-1".to_string()),
                endpoint: std::env::var("DDS_S3_ENDPOINT").ok(),
                path_style: env_parsed("DDS_S3_PATH_STYLE", false),
                base_prefix: std::env::var("DDS_STORAGE_PREFIX")
                    .unwrap_or_else(|_| DEFAULT_STORAGE_PREFIX.to_string()),
            },
            warehouse: WarehouseConfig {
                url: std::env::var("DDS_WAREHOUSE_URL")
                    .unwrap_or_else(|_| DEFAULT_WAREHOUSE_URL.to_string()),
                max_connections: env_parsed(
                    "DDS_WAREHOUSE_MAX_CONNECTIONS",
                    DEFAULT_WAREHOUSE_MAX_CONNECTIONS,
                ),
            },
            loader: LoaderConfig {
                batch_size: env_parsed("DDS_LOAD_BATCH_SIZE", DEFAULT_LOAD_BATCH_SIZE),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api.base_url.is_empty() {
            anyhow::bail!("DDS_API_BASE_URL must be set");
        }

        if self.api.max_retries == 0 {
            anyhow::bail!("DDS_API_MAX_RETRIES must be greater than 0");
        }

        if self.api.part_concurrency == 0 {
            anyhow::bail!("DDS_PART_CONCURRENCY must be greater than 0");
        }

        if self.storage.bucket.is_empty() {
            anyhow::bail!("DDS_S3_BUCKET must be set");
        }

        if self.warehouse.url.is_empty() {
            anyhow::bail!("DDS_WAREHOUSE_URL cannot be empty");
        }

        if self.loader.batch_size == 0 {
            anyhow::bail!("DDS_LOAD_BATCH_SIZE must be greater than 0");
        }

        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: String::new(),
                username: String::new(),
                password: String::new(),
                timeout_secs: DEFAULT_API_TIMEOUT_SECS,
                max_retries: DEFAULT_API_MAX_RETRIES,
                part_concurrency: DEFAULT_PART_CONCURRENCY,
            },
            storage: StorageConfig {
                bucket: String::new(),
                region: "us-east-1".to_string(),
                endpoint: None,
                path_style: false,
                base_prefix: DEFAULT_STORAGE_PREFIX.to_string(),
            },
            warehouse: WarehouseConfig {
                url: DEFAULT_WAREHOUSE_URL.to_string(),
                max_connections: DEFAULT_WAREHOUSE_MAX_CONNECTIONS,
            },
            loader: LoaderConfig {
                batch_size: DEFAULT_LOAD_BATCH_SIZE,
            },
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
