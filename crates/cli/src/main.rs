use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{Cli, Command};

fn main() -> Result<()> {
    packnplay_core::logging::init()?;

    let cli = Cli::parse();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        match cli.command {
            Command::Up(args) => commands::up::run(args).await,
            Command::Exec(args) => commands::exec::run(args).await,
            Command::ReadConfiguration(args) => commands::read_configuration::run(args).await,
        }
    })
}
