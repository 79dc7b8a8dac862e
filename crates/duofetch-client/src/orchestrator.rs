//! Batch driver: fetch every configured file over one transport, in order.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use duofetch_protocol::{TracingLogger, Transport, TransferLogger};
use tracing::{error, info};

use crate::config::ClientConfig;
use crate::datagram::DatagramClient;
use crate::error::FetchError;
use crate::report::TransferReport;
use crate::stream::StreamClient;

/// Result of fetching one file.
#[derive(Debug)]
pub struct FileOutcome {
    pub name: String,
    pub result: Result<TransferReport, FetchError>,
}

#[derive(Debug)]
pub struct BatchSummary {
    pub transport: Transport,
    pub outcomes: Vec<FileOutcome>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

pub struct Orchestrator {
    config: ClientConfig,
    logger: Arc<dyn TransferLogger>,
}

impl Orchestrator {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_logger(config, Arc::new(TracingLogger))
    }

    pub fn with_logger(config: ClientConfig, logger: Arc<dyn TransferLogger>) -> Self {
        Self { config, logger }
    }

    /// Fetch each file strictly one after another. A failed file is recorded
    /// and the batch moves on. Only setup problems (download directory, name
    /// resolution) abort the run.
    pub async fn run(&self, transport: Transport) -> anyhow::Result<BatchSummary> {
        tokio::fs::create_dir_all(&self.config.download_dir)
            .await
            .with_context(|| {
                format!(
                    "creating download directory {}",
                    self.config.download_dir.display()
                )
            })?;

        let mut outcomes = Vec::with_capacity(self.config.files.len());
        match transport {
            Transport::Tcp => {
                let client = StreamClient::new(self.config.tcp_addr().await?, self.logger.clone());
                for name in &self.config.files {
                    let save_path = self.prepare(name).await?;
                    let result = client.fetch(name, &save_path).await;
                    outcomes.push(record(transport, name, result));
                }
            }
            Transport::Udp => {
                let client = DatagramClient::new(
                    self.config.udp_addr().await?,
                    self.config.datagram,
                    self.logger.clone(),
                );
                for name in &self.config.files {
                    let save_path = self.prepare(name).await?;
                    let result = client.fetch(name, &save_path).await;
                    outcomes.push(record(transport, name, result));
                }
            }
        }

        Ok(BatchSummary {
            transport,
            outcomes,
        })
    }

    /// Save path for `name`, with any subdirectory it implies created.
    async fn prepare(&self, name: &str) -> anyhow::Result<PathBuf> {
        let save_path = save_path_for(&self.config.download_dir, name);
        if let Some(parent) = save_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        Ok(save_path)
    }
}

fn record(
    transport: Transport,
    name: &str,
    result: Result<TransferReport, FetchError>,
) -> FileOutcome {
    match &result {
        Ok(report) => info!(
            "{}: {} saved to {} ({} bytes, {:.2} ms, {}, sha256={})",
            transport,
            name,
            report.save_path.display(),
            report.bytes,
            report.elapsed_ms(),
            report.completion,
            report.sha256
        ),
        Err(e) => error!("{}: {} failed: {}", transport, name, e),
    }
    FileOutcome {
        name: name.to_string(),
        result,
    }
}

/// Where `name` is written under `download_dir`.
///
/// Only plain components survive, so a name like `../x` or `/etc/passwd`
/// always lands inside the download directory. A name with no plain
/// components falls back to `download`.
pub fn save_path_for(download_dir: &Path, name: &str) -> PathBuf {
    let relative: PathBuf = Path::new(name)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();

    if relative.as_os_str().is_empty() {
        download_dir.join("download")
    } else {
        download_dir.join(relative)
    }
}
