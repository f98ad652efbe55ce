use std::path::PathBuf;

use clap::Args;

use drive_daemon::state::{AppState, StateError};
use drive_daemon::{spawn_service, ServiceConfig};

#[derive(Args, Debug, Clone)]
pub struct Daemon {
    /// Override API server port (default from config)
    #[arg(long)]
    pub api_port: Option<u16>,

    /// Directory for log files (logs to stdout only if not set)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Daemon {
    type Error = StateError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let master_key = state.load_master_key()?;

        let mut config = ServiceConfig::from_state(&state, master_key);
        if let Some(port) = self.api_port {
            config.api_port = port;
        }
        config.log_dir = self.log_dir.clone();
        config.log_level = self.log_level;

        spawn_service(&config).await;
        Ok("daemon ended".to_string())
    }
}
