use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fmt, str::FromStr, time::Duration};

const DEFAULT_BLOB_STORE_URL: &str = "memory://";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub blob_store_url: String,
    pub s3_endpoint: Option<String>,
    pub api_key: String,
    pub sweep_interval_secs: u64,
    pub metadata_cache_capacity: usize,
    pub metadata_cache_ttl_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Policy-governed file proxy for S3-compatible storage")]
pub struct Args {
    /// Host to bind to (overrides OBJECT_PROXY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_PROXY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Blob store URL, `s3://bucket[/prefix]` or `memory://`
    /// (overrides OBJECT_PROXY_BLOB_STORE_URL)
    #[arg(long)]
    pub blob_store_url: Option<String>,

    /// Custom endpoint for S3-compatible services (overrides OBJECT_PROXY_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// API key required for uploads and deletes (overrides OBJECT_PROXY_API_KEY)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Seconds between expiry sweeps (overrides OBJECT_PROXY_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Cached object heads; 0 disables the cache
    /// (overrides OBJECT_PROXY_METADATA_CACHE_CAPACITY)
    #[arg(long)]
    pub metadata_cache_capacity: Option<usize>,

    /// Seconds a cached head stays valid (overrides OBJECT_PROXY_METADATA_CACHE_TTL_SECS)
    #[arg(long)]
    pub metadata_cache_ttl_secs: Option<u64>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::merge(Args::parse())
    }

    fn merge(args: Args) -> Result<Self> {
        let api_key = match args.api_key {
            Some(key) => key,
            None => env_var("OBJECT_PROXY_API_KEY")?.unwrap_or_default(),
        };
        if api_key.trim().is_empty() {
            anyhow::bail!("an API key is required: set --api-key or OBJECT_PROXY_API_KEY");
        }

        let blob_store_url = match args.blob_store_url {
            Some(url) => url,
            None => env_var("OBJECT_PROXY_BLOB_STORE_URL")?
                .unwrap_or_else(|| DEFAULT_BLOB_STORE_URL.into()),
        };

        Ok(Self {
            host: match args.host {
                Some(host) => host,
                None => env_var("OBJECT_PROXY_HOST")?.unwrap_or_else(|| "0.0.0.0".into()),
            },
            port: or_env(args.port, "OBJECT_PROXY_PORT", 3000)?,
            blob_store_url,
            s3_endpoint: match args.s3_endpoint {
                Some(endpoint) => Some(endpoint),
                None => env_var("OBJECT_PROXY_S3_ENDPOINT")?,
            },
            api_key,
            sweep_interval_secs: or_env(
                args.sweep_interval_secs,
                "OBJECT_PROXY_SWEEP_INTERVAL_SECS",
                3600,
            )?
            .max(1),
            metadata_cache_capacity: or_env(
                args.metadata_cache_capacity,
                "OBJECT_PROXY_METADATA_CACHE_CAPACITY",
                1024,
            )?,
            metadata_cache_ttl_secs: or_env(
                args.metadata_cache_ttl_secs,
                "OBJECT_PROXY_METADATA_CACHE_TTL_SECS",
                30,
            )?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn uses_memory_store(&self) -> bool {
        self.blob_store_url.starts_with("memory:")
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn metadata_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_cache_ttl_secs)
    }
}

// Keeps the API key out of startup logs.
impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("blob_store_url", &self.blob_store_url)
            .field("s3_endpoint", &self.s3_endpoint)
            .field("api_key", &"<redacted>")
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("metadata_cache_capacity", &self.metadata_cache_capacity)
            .field("metadata_cache_ttl_secs", &self.metadata_cache_ttl_secs)
            .finish()
    }
}

fn env_var(name: &str) -> Result<Option<String>> {
    match env::var(name) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

/// CLI value, else parsed environment value, else `default`.
fn or_env<T>(cli: Option<T>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    match env_var(name)? {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(default),
    }
}
