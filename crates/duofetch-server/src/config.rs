use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use duofetch_protocol::{
    DEFAULT_CHUNK_SIZE, DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, DatagramFraming, validate_chunk_size,
};

use crate::datagram::DatagramSettings;

/// Server configuration. Built from `DUOFETCH_*` environment variables in the
/// binary, or directly in tests.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub tcp_port: u16,
    pub udp_port: u16,
    /// Directory whose regular files are served. Must exist at startup.
    pub root_dir: PathBuf,
    pub datagram: DatagramSettings,
}

impl ServerConfig {
    /// Defaults: all interfaces, ports 5000/5001, 60 KB raw chunks.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            root_dir: root_dir.into(),
            datagram: DatagramSettings::default(),
        }
    }

    /// Loopback on OS-assigned ports, for tests and local tooling.
    pub fn ephemeral(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            tcp_port: 0,
            udp_port: 0,
            ..Self::new(root_dir)
        }
    }

    pub fn with_datagram(mut self, datagram: DatagramSettings) -> Self {
        self.datagram = datagram;
        self
    }

    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.tcp_port)
    }

    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.udp_port)
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host: IpAddr = lookup("DUOFETCH_HOST")
            .unwrap_or_else(|| "0.0.0.0".into())
            .parse()
            .context("DUOFETCH_HOST")?;
        let tcp_port: u16 = lookup("DUOFETCH_TCP_PORT")
            .unwrap_or_else(|| DEFAULT_TCP_PORT.to_string())
            .parse()
            .context("DUOFETCH_TCP_PORT")?;
        let udp_port: u16 = lookup("DUOFETCH_UDP_PORT")
            .unwrap_or_else(|| DEFAULT_UDP_PORT.to_string())
            .parse()
            .context("DUOFETCH_UDP_PORT")?;
        let root_dir: PathBuf = lookup("DUOFETCH_ROOT_DIR")
            .unwrap_or_else(|| "./files".into())
            .into();
        let chunk_size: usize = lookup("DUOFETCH_CHUNK_SIZE")
            .unwrap_or_else(|| DEFAULT_CHUNK_SIZE.to_string())
            .parse()
            .context("DUOFETCH_CHUNK_SIZE")?;
        let framing: DatagramFraming = lookup("DUOFETCH_UDP_FRAMING")
            .unwrap_or_else(|| "raw".into())
            .parse()?;
        let pacing_ms: u64 = lookup("DUOFETCH_UDP_PACING_MS")
            .unwrap_or_else(|| "0".into())
            .parse()
            .context("DUOFETCH_UDP_PACING_MS")?;

        Ok(Self {
            host,
            tcp_port,
            udp_port,
            root_dir,
            datagram: DatagramSettings {
                chunk_size: validate_chunk_size(chunk_size)?,
                framing,
                pacing: Duration::from_millis(pacing_ms),
            },
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("./files")
    }
}
