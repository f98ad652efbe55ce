use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};

use common::cache::CacheConfig;
use common::label::UserProfile;
use common::prelude::MasterKey;
use object_store::ObjectStoreConfig;

use crate::database::SCHEMA_VERSION;

pub const APP_NAME: &str = "drive";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "db.sqlite";
pub const KEY_FILE_NAME: &str = "master.key";
pub const CACHE_DIR_NAME: &str = "cache";
pub const PERMANENT_DIR_NAME: &str = "permanent";

/// ASCII record separator.
pub const DEFAULT_NAME_PATH_DELIMITER: &str = "\u{1e}";

/// Header names the caller DN is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpersonationHeaders {
    pub user_dn: String,
    pub ssl_client_s_dn: String,
    pub external_sys_dn: String,
}

impl Default for ImpersonationHeaders {
    fn default() -> Self {
        Self {
            user_dn: "USER_DN".to_string(),
            ssl_client_s_dn: "SSL_CLIENT_S_DN".to_string(),
            external_sys_dn: "EXTERNAL_SYS_DN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Port for the API server
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Ciphertext cache settings; a relative `root` is resolved against the drive directory
    #[serde(default)]
    pub cache: CacheConfig,
    /// Where ciphertext is persisted
    #[serde(default)]
    pub permanent_store: ObjectStoreConfig,
    /// Expected metadata schema version; a mismatch makes the service read-only
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// DNs allowed to act on behalf of the user named in an impersonation header
    #[serde(default)]
    pub acl_impersonation_whitelist: Vec<String>,
    #[serde(default)]
    pub acm_impersonation_headers: ImpersonationHeaders,
    /// Splits created names into intermediate folders; empty disables it
    #[serde(default = "default_name_path_delimiter")]
    pub name_path_delimiter: Option<String>,
    /// Seconds to wait for pending uploads on shutdown
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: u64,
    /// Users known to the in-process label authority
    #[serde(default)]
    pub users: Vec<UserProfile>,
}

fn default_api_port() -> u16 {
    5001
}

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

fn default_name_path_delimiter() -> Option<String> {
    Some(DEFAULT_NAME_PATH_DELIMITER.to_string())
}

fn default_drain_timeout() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            cache: CacheConfig::default(),
            permanent_store: ObjectStoreConfig::default(),
            schema_version: default_schema_version(),
            acl_impersonation_whitelist: Vec::new(),
            acm_impersonation_headers: ImpersonationHeaders::default(),
            name_path_delimiter: default_name_path_delimiter(),
            drain_timeout: default_drain_timeout(),
            users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the drive directory (~/.drive)
    pub drive_dir: PathBuf,
    /// Path to the SQLite database
    pub db_path: PathBuf,
    /// Path to the hex master key
    pub key_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration, with relative paths resolved
    pub config: AppConfig,
}

impl AppState {
    /// Get the drive directory path (custom or default ~/.drive)
    pub fn drive_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new drive state directory
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let drive_dir = Self::drive_dir(custom_path)?;
        if drive_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }
        fs::create_dir_all(&drive_dir)?;
        fs::create_dir_all(drive_dir.join(CACHE_DIR_NAME))?;

        let key_path = drive_dir.join(KEY_FILE_NAME);
        fs::write(&key_path, MasterKey::generate_hex())?;
        restrict(&key_path)?;

        let config = config.unwrap_or_else(|| AppConfig {
            permanent_store: ObjectStoreConfig::Local {
                path: drive_dir.join(PERMANENT_DIR_NAME),
            },
            ..AppConfig::default()
        });
        let config_path = drive_dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, toml::to_string_pretty(&config)?)?;

        let db_path = drive_dir.join(DB_FILE_NAME);

        let mut state = Self {
            drive_dir,
            db_path,
            key_path,
            config_path,
            config,
        };
        state.resolve_paths();
        Ok(state)
    }

    /// Load existing state from the drive directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let drive_dir = Self::drive_dir(custom_path)?;
        if !drive_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let db_path = drive_dir.join(DB_FILE_NAME);
        let key_path = drive_dir.join(KEY_FILE_NAME);
        let config_path = drive_dir.join(CONFIG_FILE_NAME);

        if !key_path.exists() {
            return Err(StateError::MissingFile(KEY_FILE_NAME.to_string()));
        }
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config: AppConfig = toml::from_str(&fs::read_to_string(&config_path)?)?;
        validate(&config)?;

        let mut state = Self {
            drive_dir,
            db_path,
            key_path,
            config_path,
            config,
        };
        state.resolve_paths();
        Ok(state)
    }

    /// Read the master key. It is never written back.
    pub fn load_master_key(&self) -> Result<MasterKey, StateError> {
        let hex = fs::read_to_string(&self.key_path)?;
        MasterKey::from_hex(hex.trim()).map_err(|e| StateError::InvalidKey(e.to_string()))
    }

    fn resolve_paths(&mut self) {
        if self.config.cache.root.is_relative() {
            self.config.cache.root = self.drive_dir.join(&self.config.cache.root);
        }
        if let ObjectStoreConfig::Local { path } = &mut self.config.permanent_store {
            if path.is_relative() {
                *path = self.drive_dir.join(&*path);
            }
        }
    }
}

fn validate(config: &AppConfig) -> Result<(), StateError> {
    let cache = &config.cache;
    let in_range = |v: f64| (0.0..=1.0).contains(&v);
    if !in_range(cache.low_watermark) || !in_range(cache.high_watermark) {
        return Err(StateError::InvalidConfig(
            "watermarks must lie in [0, 1]".to_string(),
        ));
    }
    if cache.low_watermark > cache.high_watermark {
        return Err(StateError::InvalidConfig(
            "low_watermark must not exceed high_watermark".to_string(),
        ));
    }
    if let Some(delimiter) = &config.name_path_delimiter {
        if !delimiter.is_empty() && delimiter.chars().count() != 1 {
            return Err(StateError::InvalidConfig(
                "name_path_delimiter must be a single character".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(unix)]
fn restrict(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict(_path: &std::path::Path) -> std::io::Result<()> {
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("drive directory not initialized. Run 'drive init' first")]
    NotInitialized,

    #[error("drive directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid master key: {0}")]
    InvalidKey(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}
