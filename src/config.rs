use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URL of the viewer frontend, used to build share links
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Built frontend to serve for non-API paths
    #[serde(default)]
    pub frontend_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_local_path")]
    pub local_path: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentConfig {
    #[serde(default = "default_ttl_minutes")]
    pub default_ttl_minutes: f64,
    #[serde(default = "default_max_views")]
    pub default_max_views: i64,
    #[serde(default = "default_max_ttl_minutes")]
    pub max_ttl_minutes: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// 0 disables rate limiting
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_public_url() -> String {
    "http://localhost:5173".to_string()
}

fn default_db_path() -> String {
    "data/linkvault.db".to_string()
}

fn default_local_path() -> String {
    "data/uploads".to_string()
}

fn default_max_upload_bytes() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_ttl_minutes() -> f64 {
    10.0
}

fn default_max_views() -> i64 {
    1 // one-time by default
}

/// Keeps every expiry well inside four-digit years
const TTL_CEILING_MINUTES: f64 = 100.0 * 525_600.0;

fn default_max_ttl_minutes() -> f64 {
    525_600.0 // one year
}

fn default_sweep_interval() -> u64 {
    120
}

fn default_max_requests() -> u32 {
    60
}

fn default_window_secs() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
            frontend_dir: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_path: default_local_path(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            default_ttl_minutes: default_ttl_minutes(),
            default_max_views: default_max_views(),
            max_ttl_minutes: default_max_ttl_minutes(),
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.validate()?;
        config.ensure_directories()?;
        Ok(config)
    }

    /// Load configuration from conf.ini or config.toml
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["conf.ini", "config.toml", "data/conf.ini", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    /// Format: LV_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        // Server overrides
        if let Ok(val) = env::var("LV_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = env::var("LV_CONF_SERVER_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Ok(val) = env::var("LV_CONF_SERVER_PUBLIC_URL") {
            if !val.trim().is_empty() {
                self.server.public_url = val;
            }
        }
        if let Ok(val) = env::var("LV_CONF_SERVER_FRONTEND_DIR") {
            self.server.frontend_dir = Some(val).filter(|v| !v.trim().is_empty());
        }

        // Database overrides
        if let Ok(val) = env::var("LV_CONF_DATABASE_PATH") {
            self.database.path = val;
        }

        // Storage overrides
        if let Ok(val) = env::var("LV_CONF_STORAGE_LOCAL_PATH") {
            self.storage.local_path = val;
        }
        if let Ok(val) = env::var("LV_CONF_STORAGE_MAX_UPLOAD_BYTES") {
            if let Ok(bytes) = val.parse() {
                self.storage.max_upload_bytes = bytes;
            }
        }

        // Content defaults
        if let Ok(val) = env::var("LV_CONF_CONTENT_DEFAULT_TTL_MINUTES") {
            if let Ok(minutes) = val.parse() {
                self.content.default_ttl_minutes = minutes;
            }
        }
        if let Ok(val) = env::var("LV_CONF_CONTENT_DEFAULT_MAX_VIEWS") {
            if let Ok(views) = val.parse() {
                self.content.default_max_views = views;
            }
        }
        if let Ok(val) = env::var("LV_CONF_CONTENT_MAX_TTL_MINUTES") {
            if let Ok(minutes) = val.parse() {
                self.content.max_ttl_minutes = minutes;
            }
        }

        // Sweeper overrides
        if let Ok(val) = env::var("LV_CONF_SWEEPER_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                self.sweeper.interval_secs = secs;
            }
        }

        // Rate limit overrides
        if let Ok(val) = env::var("LV_CONF_RATE_LIMIT_MAX_REQUESTS") {
            if let Ok(max) = val.parse() {
                self.rate_limit.max_requests = max;
            }
        }
        if let Ok(val) = env::var("LV_CONF_RATE_LIMIT_WINDOW_SECS") {
            if let Ok(secs) = val.parse() {
                self.rate_limit.window_secs = secs;
            }
        }
    }

    /// Reject defaults that would break the creation contract
    fn validate(&self) -> anyhow::Result<()> {
        let content = &self.content;
        if !(content.default_ttl_minutes.is_finite() && content.default_ttl_minutes > 0.0) {
            anyhow::bail!("content.default_ttl_minutes must be a positive number");
        }
        if !(content.max_ttl_minutes.is_finite() && content.max_ttl_minutes <= TTL_CEILING_MINUTES) {
            anyhow::bail!(
                "content.max_ttl_minutes must be at most {} (100 years)",
                TTL_CEILING_MINUTES
            );
        }
        if content.default_ttl_minutes > content.max_ttl_minutes {
            anyhow::bail!("content.default_ttl_minutes exceeds content.max_ttl_minutes");
        }
        if content.default_max_views < 1 {
            anyhow::bail!("content.default_max_views must be at least 1");
        }
        if self.sweeper.interval_secs == 0 {
            anyhow::bail!("sweeper.interval_secs must be greater than zero");
        }
        if self.rate_limit.window_secs == 0 {
            anyhow::bail!("rate_limit.window_secs must be greater than zero");
        }
        Ok(())
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        // Ensure database directory exists
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }

        // Ensure local storage directory exists
        fs::create_dir_all(&self.storage.local_path)?;

        Ok(())
    }
}
