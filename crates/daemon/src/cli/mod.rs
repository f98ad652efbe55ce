pub mod args;
pub mod op;
pub mod ops;

use clap::Subcommand;
use drive_daemon::StateError;

pub use ops::{Check, Daemon, Init, Version};

use op::{Op, OpContext};

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the state directory, config and master key
    Init(Init),
    /// Run the object store daemon
    Daemon(Daemon),
    /// Inspect the state directory without starting the daemon
    Check(Check),
    /// Print build information
    Version(Version),
}

impl Command {
    /// Run the subcommand and render its output for the terminal.
    pub async fn run(&self, ctx: &OpContext) -> Result<String, StateError> {
        match self {
            Command::Init(op) => op.execute(ctx).await,
            Command::Daemon(op) => op.execute(ctx).await,
            Command::Check(op) => op.execute(ctx).await,
            Command::Version(op) => match op.execute(ctx).await {
                Ok(output) => Ok(output),
                Err(never) => match never {},
            },
        }
    }
}
