//! Stackdrop CLI - inspect and deliver stored crash reports
//!
//! Provides commands for:
//! - Listing and viewing pending reports
//! - Sending them to a collector over HTTP
//! - Clearing the report store
//! - Viewing and validating configuration
//! - Triggering a test panic through the full pipeline

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use stackdrop_core::config::Config;
use stackdrop_reporter::ReportStore;

mod commands;
mod output;

use commands::{
    clear::ClearCommand, config::ConfigCommand, list::ListCommand, send::SendCommand,
    trigger::TriggerCommand, view::ViewCommand,
};
use output::OutputFormat;

/// Package name used when `--package` is not given
const DEFAULT_PACKAGE: &str = "stackdrop";

#[derive(Debug, Parser)]
#[command(name = "stackdrop", version, about = "Crash report store and delivery tool")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Reports directory (overrides the config file)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Package whose reports are handled
    #[arg(long, global = true, default_value = DEFAULT_PACKAGE)]
    package: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List pending reports
    List(ListCommand),
    /// Decode and display one pending report
    View(ViewCommand),
    /// Send pending reports to the collector, then clear them
    Send(SendCommand),
    /// Delete every pending report
    Clear(ClearCommand),
    /// View and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Register the reporter and panic with a chained error
    Trigger(TriggerCommand),
}

/// Settings shared by every command
#[derive(Debug, Clone)]
pub struct Context {
    pub config: Config,
    pub config_path: PathBuf,
    pub package_name: String,
    pub store: ReportStore,
}

impl Context {
    fn from_cli(cli: &Cli) -> Self {
        let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
        let mut config = Config::load_or_default(&config_path);
        if let Some(dir) = &cli.dir {
            config.reports.dir = Some(dir.clone());
        }
        let reports_dir = config
            .reports
            .dir
            .clone()
            .unwrap_or_else(|| ReportStore::default_dir(&cli.package));

        Self {
            config,
            config_path,
            package_name: cli.package.clone(),
            store: ReportStore::new(reports_dir),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let ctx = Context::from_cli(&cli);

    // Setup tracing
    let filter = match cli.verbose {
        0 => ctx.config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!(
        config = %ctx.config_path.display(),
        dir = %ctx.store.dir().display(),
        package = %ctx.package_name,
        "Starting"
    );

    let format = OutputFormat::from_flag(cli.json);

    match &cli.command {
        Commands::List(cmd) => cmd.execute(&ctx, format).await,
        Commands::View(cmd) => cmd.execute(&ctx, format).await,
        Commands::Send(cmd) => cmd.execute(&ctx, format).await,
        Commands::Clear(cmd) => cmd.execute(&ctx, format).await,
        Commands::Config(cmd) => cmd.execute(&ctx, format).await,
        Commands::Trigger(cmd) => cmd.execute(&ctx, format).await,
    }
}
