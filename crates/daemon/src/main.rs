mod cli;

use clap::Parser;

use cli::args::Args;
use cli::op::OpContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let ctx = OpContext::new(args.config_path);

    let output = args.command.run(&ctx).await?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
