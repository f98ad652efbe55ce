use std::path::PathBuf;

use clap::Args;

use drive_daemon::state::{AppState, StateError, PERMANENT_DIR_NAME};
use drive_daemon::AppConfig;
use object_store::ObjectStoreConfig;

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// API server port
    #[arg(long)]
    pub api_port: Option<u16>,

    /// Cache selector; also the key prefix in the permanent store
    #[arg(long)]
    pub cache_selector: Option<String>,

    /// S3 endpoint; when unset ciphertext is kept on the local filesystem
    #[arg(long, requires_all = ["s3_bucket", "s3_access_key", "s3_secret_key"])]
    pub s3_endpoint: Option<String>,

    #[arg(long)]
    pub s3_bucket: Option<String>,

    #[arg(long)]
    pub s3_access_key: Option<String>,

    #[arg(long)]
    pub s3_secret_key: Option<String>,

    #[arg(long)]
    pub s3_region: Option<String>,

    /// Local permanent store directory (default <state dir>/permanent)
    #[arg(long, conflicts_with = "s3_endpoint")]
    pub permanent_path: Option<PathBuf>,
}

impl Init {
    fn permanent_store(&self) -> ObjectStoreConfig {
        if let (Some(endpoint), Some(bucket), Some(access_key), Some(secret_key)) = (
            &self.s3_endpoint,
            &self.s3_bucket,
            &self.s3_access_key,
            &self.s3_secret_key,
        ) {
            return ObjectStoreConfig::S3 {
                endpoint: endpoint.clone(),
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
                bucket: bucket.clone(),
                region: self.s3_region.clone(),
            };
        }
        ObjectStoreConfig::Local {
            // relative paths resolve against the state directory on load
            path: self
                .permanent_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(PERMANENT_DIR_NAME)),
        }
    }

    fn config(&self) -> AppConfig {
        let mut config = AppConfig {
            permanent_store: self.permanent_store(),
            ..AppConfig::default()
        };
        if let Some(port) = self.api_port {
            config.api_port = port;
        }
        if let Some(selector) = &self.cache_selector {
            config.cache.selector = selector.clone();
        }
        config
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = StateError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::init(ctx.config_path.clone(), Some(self.config()))?;
        Ok(format!(
            "initialized drive directory at {}\n  config: {}\n  key:    {}",
            state.drive_dir.display(),
            state.config_path.display(),
            state.key_path.display()
        ))
    }
}
