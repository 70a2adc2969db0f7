use anyhow::Result;
use clap::Parser;

use vigil_cli::{initialize_tracing, run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    initialize_tracing(cli.log_level, cli.json);

    run(cli).await
}
