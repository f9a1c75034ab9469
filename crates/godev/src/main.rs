use anyhow::Result;
use clap::Parser;

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let parsed = cli::Cli::parse();
    godev_core::logging::init(parsed.log_format.as_deref());
    parsed.dispatch().await
}
