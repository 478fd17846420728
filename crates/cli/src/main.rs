use anyhow::Result;
use clap::Parser;
use zabsync::collectors::CollectorRegistry;
use zabsync::config::Settings;
use zabsync::modifiers::ModifierRegistry;

mod cli_args;
mod logging;

use cli_args::CliArgs;
use logging::setup_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let settings = Settings::from_path(&args.config)?;
    setup_logging(&settings.zac.log_level);

    log::info!(
        "Main start ({}) version {}",
        std::process::id(),
        env!("CARGO_PKG_VERSION")
    );

    let collectors = CollectorRegistry::builtin();
    let modifiers = ModifierRegistry::builtin();
    zabsync::supervisor::run(settings, &collectors, &modifiers).await?;

    log::info!("Main exit");
    Ok(())
}
