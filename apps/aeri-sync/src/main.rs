use aeri_sync::app;
use aeri_sync::cli::Cli;
use aeri_sync::telemetry::{self, logging};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the defaults target the access point.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config())?;

    let result = app::run(cli).await;
    telemetry::report();
    result?;
    Ok(())
}
