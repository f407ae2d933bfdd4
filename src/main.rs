use clap::Parser;
use tracing::info;

use frps::{config::Cli, server, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = frps::config::ServerConfig::load(&cli.config)?;
    info!(bind_port = cfg.bind_port, "starting server");

    let state = AppState::new(cfg);

    let (_, control) = server::spawn_control_listener(state.clone()).await?;
    let kcp = server::spawn_kcp_listener(state.clone()).await?;
    let http = server::spawn_vhost_http_listener(state.clone()).await?;
    let https = server::spawn_vhost_https_listener(state.clone()).await?;

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");

    control.abort();
    if let Some(kcp) = kcp {
        kcp.abort();
    }
    if let Some((_, http)) = http {
        http.abort();
    }
    if let Some((_, https)) = https {
        https.abort();
    }

    Ok(())
}
