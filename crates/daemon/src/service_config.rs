use std::path::PathBuf;
use std::time::Duration;

use common::cache::CacheConfig;
use common::label::UserProfile;
use common::prelude::MasterKey;
use object_store::ObjectStoreConfig;

use crate::state::{AppState, ImpersonationHeaders};

#[derive(Debug, Clone)]
pub struct Config {
    // http server configuration
    /// Port for the API HTTP server
    pub api_port: u16,
    /// Header names for caller identity
    pub impersonation_headers: ImpersonationHeaders,
    /// DNs allowed to impersonate
    pub impersonation_whitelist: Vec<String>,

    // storage configuration
    pub cache: CacheConfig,
    pub permanent_store: ObjectStoreConfig,
    /// a path to a sqlite database, if not set then an
    ///  in-memory database will be used
    pub sqlite_path: Option<PathBuf>,
    pub schema_version: String,

    // object semantics
    pub master_key: MasterKey,
    pub name_path_delimiter: Option<char>,
    pub users: Vec<UserProfile>,

    // lifecycle
    pub drain_timeout: Duration,

    // logging
    pub log_level: tracing::Level,
    /// Directory for log files (optional, logs to stdout only if not set)
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Runtime configuration for the state directory in `state`.
    pub fn from_state(state: &AppState, master_key: MasterKey) -> Self {
        let config = &state.config;
        Self {
            api_port: config.api_port,
            impersonation_headers: config.acm_impersonation_headers.clone(),
            impersonation_whitelist: config.acl_impersonation_whitelist.clone(),
            cache: config.cache.clone(),
            permanent_store: config.permanent_store.clone(),
            sqlite_path: Some(state.db_path.clone()),
            schema_version: config.schema_version.clone(),
            master_key,
            name_path_delimiter: config
                .name_path_delimiter
                .as_deref()
                .and_then(|d| d.chars().next()),
            users: config.users.clone(),
            drain_timeout: Duration::from_secs(config.drain_timeout),
            log_level: tracing::Level::INFO,
            log_dir: None,
        }
    }
}
