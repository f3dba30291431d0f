//! Server configuration loaded from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_EXISTENCE_TTL_MS: u64 = 2000;
const DEFAULT_MAX_UPLOAD_MB: usize = 512;

/// Public prefix under which stored media is served
pub const MEDIA_PREFIX: &str = "/media";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Root for the database and the media tree
    pub storage_path: PathBuf,
    pub database_path: PathBuf,
    /// Base address used when building asset URLs, e.g. `http://0.0.0.0:8000`
    pub public_base_url: String,
    /// How long a positive existence check may be reused
    pub existence_ttl: Duration,
    /// External STEP to GLB conversion endpoint
    pub converter_url: Option<String>,
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    /// Build a config rooted at `storage_path` with defaults everywhere else
    pub fn with_storage_path(storage_path: PathBuf) -> Self {
        let bind_addr = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT));
        Self {
            bind_addr,
            database_path: storage_path.join("chimney-assets.db"),
            storage_path,
            public_base_url: format!("http://{}", bind_addr),
            existence_ttl: Duration::from_millis(DEFAULT_EXISTENCE_TTL_MS),
            converter_url: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
        }
    }

    /// Read configuration from `CHIMNEY_*` environment variables
    pub fn from_env() -> Result<Self, String> {
        let storage_path = std::env::var("CHIMNEY_STORAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("chimney-assets"));

        let mut config = Self::with_storage_path(storage_path);

        if let Ok(bind) = std::env::var("CHIMNEY_BIND_ADDR") {
            config.bind_addr = bind
                .parse()
                .map_err(|e| format!("CHIMNEY_BIND_ADDR '{}': {}", bind, e))?;
            config.public_base_url = format!("http://{}", config.bind_addr);
        }
        if let Ok(path) = std::env::var("CHIMNEY_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Ok(base) = std::env::var("CHIMNEY_PUBLIC_BASE_URL") {
            config.public_base_url = base.trim_end_matches('/').to_string();
        }
        if let Ok(ttl) = std::env::var("CHIMNEY_EXISTENCE_TTL_MS") {
            let ms: u64 = ttl
                .parse()
                .map_err(|e| format!("CHIMNEY_EXISTENCE_TTL_MS '{}': {}", ttl, e))?;
            config.existence_ttl = Duration::from_millis(ms);
        }
        if let Ok(url) = std::env::var("CHIMNEY_STEP_CONVERTER_URL") {
            if !url.trim().is_empty() {
                config.converter_url = Some(url);
            }
        }
        if let Ok(mb) = std::env::var("CHIMNEY_MAX_UPLOAD_MB") {
            let mb: usize = mb
                .parse()
                .map_err(|e| format!("CHIMNEY_MAX_UPLOAD_MB '{}': {}", mb, e))?;
            config.max_upload_bytes = mb * 1024 * 1024;
        }

        Ok(config)
    }

    /// Directory holding uploaded asset bytes
    pub fn media_root(&self) -> PathBuf {
        self.storage_path.join("media")
    }
}
