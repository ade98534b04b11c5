use anyhow::{Context, Result};
use clap::Parser;
use rustyreview::{api, config, logging, review::ReviewService};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Streaming paper-review server.
#[derive(Parser)]
#[command(name = "rustyreview", version, about)]
struct Cli {
    /// Port to listen on; overrides `SERVER_PORT`.
    #[arg(long)]
    port: Option<u16>,
    /// Environment file loaded before configuration is read.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Some(path) = &cli.env_file {
        dotenvy::from_path(path)
            .with_context(|| format!("failed to load environment file {}", path.display()))?;
    }

    logging::init_tracing();
    let config = config::init_config().context("invalid configuration")?;
    let service = ReviewService::from_config(config).context("failed to initialize review service")?;
    let app = api::create_router(Arc::new(service));

    let (listener, port) = bind_listener(cli.port.or(config.server_port))
        .await
        .context("failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("server terminated unexpectedly")?;
    Ok(())
}

async fn bind_listener(port: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 3000..=3099;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 3000-3099",
    ))
}
