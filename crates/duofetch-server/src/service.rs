use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use duofetch_protocol::{TracingLogger, TransferLogger};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::datagram::DatagramEngine;
use crate::resolver::PathResolver;
use crate::stream::StreamEngine;

/// The file server before it binds anything.
///
/// Nothing happens at construction; [`FileServer::start`] binds both sockets
/// and spawns the engines, so several servers can run side by side.
pub struct FileServer {
    config: ServerConfig,
    logger: Arc<dyn TransferLogger>,
}

/// A started server. Dropping it leaves the listeners running; call
/// [`RunningServer::stop`] to shut them down.
pub struct RunningServer {
    tcp_addr: SocketAddr,
    udp_addr: SocketAddr,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl FileServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            logger: Arc::new(TracingLogger),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn TransferLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Validate the files root, bind TCP and UDP, and start serving.
    ///
    /// A missing files root fails here rather than on the first request.
    pub async fn start(self) -> anyhow::Result<RunningServer> {
        let resolver = PathResolver::new(&self.config.root_dir)?;
        info!("Serving files from {}", resolver.root().display());

        let listener = TcpListener::bind(self.config.tcp_addr())
            .await
            .with_context(|| format!("bind TCP {}", self.config.tcp_addr()))?;
        let udp_socket = UdpSocket::bind(self.config.udp_addr())
            .await
            .with_context(|| format!("bind UDP {}", self.config.udp_addr()))?;

        let tcp_addr = listener.local_addr()?;
        let udp_addr = udp_socket.local_addr()?;

        let shutdown = CancellationToken::new();

        let stream = StreamEngine::new(resolver.clone(), self.logger.clone());
        let datagram = DatagramEngine::new(resolver, self.config.datagram, self.logger);

        let tasks = vec![
            tokio::spawn(stream.run(listener, shutdown.clone())),
            tokio::spawn(datagram.run(Arc::new(udp_socket), shutdown.clone())),
        ];

        info!("TCP server listening on {}", tcp_addr);
        info!("UDP server listening on {}", udp_addr);

        Ok(RunningServer {
            tcp_addr,
            udp_addr,
            shutdown,
            tasks,
        })
    }
}

impl RunningServer {
    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    /// Stop accepting requests and wait for both listener loops to exit.
    /// Transfers already in flight finish on their own tasks.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Listener task ended abnormally: {}", e);
            }
        }
        info!("Server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duofetch_protocol::NullLogger;

    #[tokio::test]
    async fn missing_root_fails_start() {
        let root = std::env::temp_dir().join(format!("duofetch_missing_{}", uuid::Uuid::new_v4()));
        let result = FileServer::new(ServerConfig::ephemeral(&root))
            .with_logger(Arc::new(NullLogger))
            .start()
            .await;
        let err = result.err().unwrap();
        assert!(err.to_string().contains("files directory not found"));
    }

    #[tokio::test]
    async fn two_servers_run_side_by_side_and_stop() {
        let root = std::env::temp_dir().join(format!("duofetch_svc_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();

        let a = FileServer::new(ServerConfig::ephemeral(&root)).start().await.unwrap();
        let b = FileServer::new(ServerConfig::ephemeral(&root)).start().await.unwrap();
        assert_ne!(a.tcp_addr(), b.tcp_addr());
        assert_ne!(a.udp_addr(), b.udp_addr());

        let tcp = a.tcp_addr();
        a.stop().await;
        b.stop().await;

        // listener is gone once stop returns
        assert!(tokio::net::TcpStream::connect(tcp).await.is_err());

        std::fs::remove_dir_all(root).ok();
    }
}
