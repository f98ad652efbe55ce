pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "drive")]
#[command(about = "Attribute-controlled encrypted object store")]
pub struct Args {
    /// Path to the drive state directory (defaults to ~/.drive)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: super::Command,
}
