//! L2TP responder daemon.
//!
//! Usage: `l2tpd [CONFIG]` (default `l2tpd.json`).
//!
//! Environment variables:
//! - RUST_LOG: log filter (default `info`)
//!
//! Without `host_name` in the config file the system host name is advertised.

use l2tp_control::config::{FileConfig, L2TP_PROTOCOL};
use l2tp_control::server::L2tpServer;

const DEFAULT_CONFIG_PATH: &str = "l2tpd.json";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let file = FileConfig::load(&config_path)?;

    for (name, protocol) in file.protocols() {
        if name != L2TP_PROTOCOL {
            log::warn!("no handler for protocol {name} (port {}), skipping", protocol.port);
        }
    }

    let protocol = file.protocol(L2TP_PROTOCOL)?;
    let mut config = protocol.to_server_config();
    if let Some(host_name) = resolve_host_name(
        protocol.host_name.as_deref(),
        gethostname::gethostname().into_string().ok(),
    ) {
        config.dispatcher.host_name = host_name;
    }

    log::info!("l2tpd starting...");
    log::info!("  Config: {config_path}");
    log::info!("  Bind:   {}", config.bind_addr);
    log::info!("  Host:   {}", config.dispatcher.host_name);

    let server = L2tpServer::bind(config).await?;
    server.run(shutdown_signal()).await?;

    log::info!("l2tpd stopped");
    Ok(())
}

/// Host Name to advertise: the configured one, else the system's.
fn resolve_host_name(configured: Option<&str>, system: Option<String>) -> Option<String> {
    match configured {
        Some(name) => Some(name.to_string()),
        None => system.filter(|name| !name.is_empty()),
    }
}

/// Completes on SIGINT or (on unix) SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("received SIGINT, shutting down"),
        _ = terminate => log::info!("received SIGTERM, shutting down"),
    }
}
