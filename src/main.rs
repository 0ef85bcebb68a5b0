use clap::Parser;
use natasha_exporter::cli::{commands, Cli, Commands};
use natasha_exporter::config::{self, ENV_FILE_VAR};
use std::{env, process};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Must run before parsing so the file can feed the flag env fallbacks.
    let env_file = env::var_os(ENV_FILE_VAR).map(|path| config::load_env_file(&path));

    let cli = Cli::parse();
    let cfg = cli.config();

    let filter = EnvFilter::try_new(&cfg.logs.level).unwrap_or_else(|e| {
        eprintln!("Invalid log level {:?}: {}", cfg.logs.level, e);
        process::exit(1);
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let init = if cfg.logs.pretty {
        builder.pretty().try_init()
    } else {
        builder.compact().try_init()
    };
    if let Err(e) = init {
        eprintln!("Failed to set tracing subscriber: {}", e);
        process::exit(1);
    }

    if let Some(Err(e)) = env_file {
        warn!("{}", e);
    }

    info!("Starting natasha-exporter v{}", env!("CARGO_PKG_VERSION"));

    let command = cli.command.clone().unwrap_or(Commands::Server);
    if let Err(e) = commands::handle_command(command, cfg).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
