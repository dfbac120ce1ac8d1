//! PriceWatch CLI: track e-commerce product prices.
//!
//! Registers product pages, re-scrapes them on a schedule to build a price
//! history, and serves the tracked products over a small JSON API.

mod commands;
mod server;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
