use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Main configuration for the mask canvas API
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Prometheus exporter port; the exporter is not started when unset
    pub metrics_port: Option<u16>,
}

/// S3 storage configuration
#[derive(Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding originals and masks
    pub bucket: String,
    /// AWS region
    pub region: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Presigned URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("endpoint_url", &self.endpoint_url)
            .field("force_path_style", &self.force_path_style)
            .field("presigned_url_expiry_secs", &self.presigned_url_expiry_secs)
            .finish()
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL, `sqlite:` or `postgres:`
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Create the images table on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Allowed CORS origins (empty = any origin, without credentials)
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    /// Largest accepted request body in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

// Default value functions
fn default_service_name() -> String {
    "mask-canvas-api".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    3600
}

fn default_database_url() -> String {
    "sqlite://images.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string()]
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024 // 25MB
}

/// SigV4 presigned URLs cannot outlive one week
const MAX_PRESIGNED_URL_EXPIRY_SECS: u64 = 7 * 24 * 3600;

/// Flat environment variables honored on top of the prefixed ones
const FLAT_ENV_KEYS: &[(&str, &str)] = &[
    ("DATABASE_URL", "database.url"),
    ("AWS_ACCESS_KEY_ID", "s3.access_key_id"),
    ("AWS_SECRET_ACCESS_KEY", "s3.secret_access_key"),
    ("AWS_REGION", "s3.region"),
    ("S3_BUCKET_NAME", "s3.bucket"),
];

impl Config {
    /// Load configuration from config files and the process environment
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(|key| std::env::var(key).ok())
    }

    /// Load configuration, resolving flat variables through `lookup`
    pub fn load_from<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/mask-canvas").required(false))
            .add_source(config::File::with_name("/etc/mask-canvas/api").required(false))
            // MASK_CANVAS__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("MASK_CANVAS")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("api.cors_origins")
                    .try_parsing(true),
            );

        for (var, key) in FLAT_ENV_KEYS {
            builder = builder.set_override_option(*key, lookup(var))?;
        }
        builder = builder.set_override_option(
            "api.cors_origins",
            lookup("BACKEND_CORS_ORIGINS").map(|raw| parse_origin_list(&raw)),
        )?;

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would only fail once requests arrive
    fn validate(&self) -> anyhow::Result<()> {
        let expiry = self.s3.presigned_url_expiry_secs;
        if expiry == 0 || expiry > MAX_PRESIGNED_URL_EXPIRY_SECS {
            anyhow::bail!(
                "s3.presigned_url_expiry_secs must be between 1 and {} seconds, got {}",
                MAX_PRESIGNED_URL_EXPIRY_SECS,
                expiry
            );
        }
        Ok(())
    }

    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.presigned_url_expiry_secs)
    }
}

/// Split a comma-separated origin list, dropping blanks
fn parse_origin_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(String::from)
        .collect()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_origins: default_cors_origins(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            run_migrations: default_true(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_in(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_presigned_url_expiry_secs(), 3600);
        assert_eq!(default_database_url(), "sqlite://images.db?mode=rwc");
        assert_eq!(default_cors_origins(), vec!["http://localhost:5173"]);
    }

    #[test]
    fn test_load_from_flat_env() {
        let config = Config::load_from(lookup_in(&[
            ("AWS_ACCESS_KEY_ID", "AKIDEXAMPLE"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
            ("AWS_REGION", "eu-west-1"),
            ("S3_BUCKET_NAME", "masks-bucket"),
            ("BACKEND_CORS_ORIGINS", "http://a.test, http://b.test,"),
        ]))
        .unwrap();

        assert_eq!(config.s3.bucket, "masks-bucket");
        assert_eq!(config.s3.region, "eu-west-1");
        assert_eq!(config.s3.presigned_url_expiry_secs, 3600);
        assert_eq!(config.database.url, "sqlite://images.db?mode=rwc");
        assert_eq!(config.api.cors_origins, vec!["http://a.test", "http://b.test"]);
        assert_eq!(config.presigned_url_expiry(), Duration::from_secs(3600));
    }

    #[test]
    fn test_load_requires_s3_credentials() {
        let result = Config::load_from(lookup_in(&[
            ("AWS_REGION", "eu-west-1"),
            ("S3_BUCKET_NAME", "masks-bucket"),
        ]));
        assert!(result.is_err());
    }

    fn valid_config(expiry_secs: u64) -> Config {
        Config {
            service: ServiceConfig::default(),
            api: ApiConfig::default(),
            s3: S3Config {
                bucket: "b".to_string(),
                region: "us-east-1".to_string(),
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: "secret".to_string(),
                endpoint_url: None,
                force_path_style: false,
                presigned_url_expiry_secs: expiry_secs,
            },
            database: DatabaseConfig::default(),
        }
    }

    #[test]
    fn test_presigned_url_expiry_range() {
        assert!(valid_config(1).validate().is_ok());
        assert!(valid_config(604_800).validate().is_ok());

        let err = valid_config(0).validate().unwrap_err();
        assert!(err.to_string().contains("presigned_url_expiry_secs"));
        assert!(valid_config(604_801).validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let s3 = S3Config {
            bucket: "b".to_string(),
            region: "us-east-1".to_string(),
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "super-secret".to_string(),
            endpoint_url: None,
            force_path_style: false,
            presigned_url_expiry_secs: 60,
        };
        let rendered = format!("{:?}", s3);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_parse_origin_list() {
        assert_eq!(parse_origin_list(""), Vec::<String>::new());
        assert_eq!(parse_origin_list("http://x"), vec!["http://x"]);
    }
}
