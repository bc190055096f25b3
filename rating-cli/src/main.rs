//! Rating CLI - store rating sets in SQLite and rate values against them.

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "rating-cli",
    version,
    about = "Time-versioned rating toolkit"
)]
struct Cli {
    #[command(subcommand)]
    command: rating_cmd::Command,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    log::debug!("rating-cli {}", env!("CARGO_PKG_VERSION"));
    rating_cmd::run(cli.command)
}
