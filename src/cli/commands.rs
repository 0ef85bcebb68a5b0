use crate::cli::{Commands, OutputFormat};
use crate::config::Config;
use crate::metrics::{self, Scraper};
use crate::server;
use crate::version::BuildInfo;
use crate::{ExporterError, Result};
use prometheus::{Encoder, TextEncoder};
use tracing::info;

pub async fn handle_command(command: Commands, cfg: Config) -> Result<()> {
    cfg.validate()?;

    match command {
        Commands::Server => handle_server(cfg).await,
        Commands::Scrape { format } => handle_scrape(cfg, format).await,
    }
}

async fn handle_server(cfg: Config) -> Result<()> {
    let build = BuildInfo::current();
    info!(
        version = %build.version,
        revision = %build.revision,
        date = %build.build_date,
        "Launching natasha exporter"
    );
    info!(
        "Scraping natasha at {} (timeout {:?})",
        cfg.target.address, cfg.target.timeout
    );

    let registry = metrics::new_registry(&cfg.target, &build)?;
    server::run(&cfg.server, registry).await
}

async fn handle_scrape(cfg: Config, format: OutputFormat) -> Result<()> {
    let output = tokio::task::spawn_blocking(move || render_scrape(&cfg, format))
        .await
        .map_err(|e| ExporterError::IoError(std::io::Error::other(e)))??;

    println!("{}", output);
    Ok(())
}

fn render_scrape(cfg: &Config, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            let result = Scraper::new(&cfg.target).run();
            serde_json::to_string_pretty(&result)
                .map_err(|e| ExporterError::IoError(std::io::Error::other(e)))
        }
        OutputFormat::Text => {
            let registry = metrics::new_registry(&cfg.target, &BuildInfo::current())?;
            let mut buffer = Vec::new();
            TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
            String::from_utf8(buffer).map_err(|e| {
                ExporterError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            })
        }
    }
}
