use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "zabsyncd", version, about = "Zabbix synchronization daemon")]
pub struct CliArgs {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,
}
