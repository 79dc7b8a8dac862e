use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, anyhow};
use duofetch_protocol::{DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, DatagramFraming};
use tokio::net::lookup_host;

use crate::datagram::DatagramOptions;

/// Files fetched when `DUOFETCH_FILES` is unset.
pub const DEFAULT_FILES: &[&str] = &["10KB.txt", "100KB.txt", "1MB.txt", "5MB.txt"];

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_host: String,
    pub tcp_port: u16,
    pub udp_port: u16,
    /// Created on demand before the first save.
    pub download_dir: PathBuf,
    /// Requested in order, one at a time.
    pub files: Vec<String>,
    pub datagram: DatagramOptions,
}

impl ClientConfig {
    /// Defaults: localhost, ports 5000/5001, `./downloads`, the four stock files.
    pub fn new(server_host: impl Into<String>) -> Self {
        Self {
            server_host: server_host.into(),
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            download_dir: PathBuf::from("./downloads"),
            files: DEFAULT_FILES.iter().map(|f| f.to_string()).collect(),
            datagram: DatagramOptions::default(),
        }
    }

    /// Point at a running server's actual addresses.
    pub fn for_server(tcp: SocketAddr, udp: SocketAddr) -> Self {
        Self {
            tcp_port: tcp.port(),
            udp_port: udp.port(),
            ..Self::new(tcp.ip().to_string())
        }
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_datagram(mut self, datagram: DatagramOptions) -> Self {
        self.datagram = datagram;
        self
    }

    pub async fn tcp_addr(&self) -> anyhow::Result<SocketAddr> {
        resolve(&self.server_host, self.tcp_port).await
    }

    pub async fn udp_addr(&self) -> anyhow::Result<SocketAddr> {
        resolve(&self.server_host, self.udp_port).await
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = DatagramOptions::default();

        let server_host = lookup("DUOFETCH_SERVER_HOST").unwrap_or_else(|| "localhost".into());
        let tcp_port: u16 = lookup("DUOFETCH_TCP_PORT")
            .unwrap_or_else(|| DEFAULT_TCP_PORT.to_string())
            .parse()
            .context("DUOFETCH_TCP_PORT")?;
        let udp_port: u16 = lookup("DUOFETCH_UDP_PORT")
            .unwrap_or_else(|| DEFAULT_UDP_PORT.to_string())
            .parse()
            .context("DUOFETCH_UDP_PORT")?;
        let download_dir: PathBuf = lookup("DUOFETCH_DOWNLOAD_DIR")
            .unwrap_or_else(|| "./downloads".into())
            .into();
        let files: Vec<String> = match lookup("DUOFETCH_FILES") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(String::from)
                .collect(),
            None => DEFAULT_FILES.iter().map(|f| f.to_string()).collect(),
        };
        let inactivity_ms: u64 = match lookup("DUOFETCH_UDP_INACTIVITY_MS") {
            Some(v) => v.parse().context("DUOFETCH_UDP_INACTIVITY_MS")?,
            None => defaults.inactivity.as_millis() as u64,
        };
        let hard_timeout_ms: u64 = match lookup("DUOFETCH_UDP_HARD_TIMEOUT_MS") {
            Some(v) => v.parse().context("DUOFETCH_UDP_HARD_TIMEOUT_MS")?,
            None => defaults.hard_timeout.as_millis() as u64,
        };
        let framing: DatagramFraming = lookup("DUOFETCH_UDP_FRAMING")
            .unwrap_or_else(|| "raw".into())
            .parse()?;

        if inactivity_ms == 0 || hard_timeout_ms == 0 {
            return Err(anyhow!("UDP timeouts must be greater than zero"));
        }

        Ok(Self {
            server_host,
            tcp_port,
            udp_port,
            download_dir,
            files,
            datagram: DatagramOptions {
                inactivity: Duration::from_millis(inactivity_ms),
                hard_timeout: Duration::from_millis(hard_timeout_ms),
                framing,
            },
        })
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("localhost")
    }
}

async fn resolve(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let addrs = lookup_host((host, port))
        .await
        .with_context(|| format!("resolving {}", host))?;
    preferred_address(addrs).ok_or_else(|| anyhow!("{} did not resolve to any address", host))
}

/// First IPv4 address, else the first address of any family. IPv4 matches the
/// server's default `0.0.0.0` bind even when `localhost` lists `::1` first.
fn preferred_address<I>(addrs: I) -> Option<SocketAddr>
where
    I: IntoIterator<Item = SocketAddr>,
{
    let mut fallback = None;
    for addr in addrs {
        if addr.is_ipv4() {
            return Some(addr);
        }
        fallback.get_or_insert(addr);
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.server_host, "localhost");
        assert_eq!(config.tcp_port, 5000);
        assert_eq!(config.udp_port, 5001);
        assert_eq!(config.download_dir, PathBuf::from("./downloads"));
        assert_eq!(config.files, vec!["10KB.txt", "100KB.txt", "1MB.txt", "5MB.txt"]);
        assert_eq!(config.datagram, DatagramOptions::default());
    }

    #[test]
    fn file_list_is_trimmed_and_ordered() {
        let config =
            ClientConfig::from_lookup(lookup(&[("DUOFETCH_FILES", " b.txt, a.txt ,,c.txt")]))
                .unwrap();
        assert_eq!(config.files, vec!["b.txt", "a.txt", "c.txt"]);
    }

    #[test]
    fn timers_and_framing_from_env() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("DUOFETCH_UDP_INACTIVITY_MS", "250"),
            ("DUOFETCH_UDP_HARD_TIMEOUT_MS", "2000"),
            ("DUOFETCH_UDP_FRAMING", "sequenced"),
        ]))
        .unwrap();
        assert_eq!(config.datagram.inactivity, Duration::from_millis(250));
        assert_eq!(config.datagram.hard_timeout, Duration::from_secs(2));
        assert_eq!(config.datagram.framing, DatagramFraming::Sequenced);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(ClientConfig::from_lookup(lookup(&[("DUOFETCH_TCP_PORT", "70000")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[("DUOFETCH_UDP_FRAMING", "zip")])).is_err());
        assert!(
            ClientConfig::from_lookup(lookup(&[("DUOFETCH_UDP_INACTIVITY_MS", "0")])).is_err()
        );
    }

    #[test]
    fn ipv4_preferred_among_resolved_addresses() {
        let v6: SocketAddr = "[::1]:5000".parse().unwrap();
        let v4: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        assert_eq!(preferred_address([v6, v4]), Some(v4));
        assert_eq!(preferred_address([v4, v6]), Some(v4));
        assert_eq!(preferred_address([v6]), Some(v6));
        assert_eq!(preferred_address(Vec::new()), None);
    }

    #[tokio::test]
    async fn localhost_resolves_to_ipv4_loopback() {
        let config = ClientConfig::default();
        let addr = config.udp_addr().await.unwrap();
        assert_eq!(addr, "127.0.0.1:5001".parse().unwrap());
    }

    #[tokio::test]
    async fn resolves_loopback() {
        let config = ClientConfig::new("127.0.0.1");
        let addr = config.tcp_addr().await.unwrap();
        assert_eq!(addr, "127.0.0.1:5000".parse().unwrap());
    }
}
