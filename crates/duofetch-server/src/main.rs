use duofetch_server::{FileServer, RootError, ServerConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duofetch_server=debug,duofetch_protocol=info".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    info!(
        "Config: root={} tcp={} udp={} chunk_size={} framing={}",
        config.root_dir.display(),
        config.tcp_addr(),
        config.udp_addr(),
        config.datagram.chunk_size,
        config.datagram.framing,
    );

    let server = match FileServer::new(config).start().await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            if e.downcast_ref::<RootError>().is_some() {
                eprintln!("       Set DUOFETCH_ROOT_DIR to an existing directory and restart.");
            }
            std::process::exit(1);
        }
    };

    shutdown_signal().await;
    server.stop().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
