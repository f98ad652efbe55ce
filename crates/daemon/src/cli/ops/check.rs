use clap::Args;

use drive_daemon::database::Database;
use drive_daemon::state::{AppState, StateError};

/// Offline health check of the state directory.
#[derive(Args, Debug, Clone)]
pub struct Check;

#[async_trait::async_trait]
impl crate::cli::op::Op for Check {
    type Error = StateError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        state.load_master_key()?;

        let mut lines = vec![
            format!("directory:   {}", state.drive_dir.display()),
            "config.toml: OK".to_string(),
            "master.key:  OK".to_string(),
            format!("api_port:    {}", state.config.api_port),
        ];

        let cache_dir = state.config.cache.dir();
        lines.push(match std::fs::metadata(&cache_dir) {
            Ok(meta) if meta.is_dir() => format!("cache:       {}", cache_dir.display()),
            _ => format!("cache:       {} (created on first start)", cache_dir.display()),
        });

        if state.db_path.exists() {
            let line = match Database::connect(&state.db_path).await {
                Ok(db) => match db.stored_schema_version().await {
                    Ok(Some(stored)) if stored == state.config.schema_version => {
                        format!("db.sqlite:   OK (schema {stored})")
                    }
                    Ok(Some(stored)) => format!(
                        "db.sqlite:   READ ONLY (schema {stored}, expected {})",
                        state.config.schema_version
                    ),
                    Ok(None) => "db.sqlite:   OK (schema unset)".to_string(),
                    Err(e) => format!("db.sqlite:   error: {e}"),
                },
                Err(e) => format!("db.sqlite:   error: {e}"),
            };
            lines.push(line);
        } else {
            lines.push("db.sqlite:   (created on first start)".to_string());
        }

        Ok(lines.join("\n"))
    }
}
