//! Stream (TCP) transfer engine, client side.
//!
//! ```text
//! Connecting -> Sent -> Receiving -> Saved
//!      \          \         \
//!       +----------+---------+----> Failed
//! ```
//!
//! The peer closing the connection is the only completion signal. There is no
//! read timeout: a server that stalls mid-transfer blocks this file forever.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use duofetch_protocol::{
    ERROR_MARKER, Transport, TransferEvent, TransferLog, TransferLogger, encode_stream_request,
    error_reason, is_error,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::artifact;
use crate::error::FetchError;
use crate::report::{Completion, TransferReport};

const READ_WINDOW: usize = 64 * 1024;

/// Longest error line we bother reading before giving up on the newline.
const MAX_ERROR_LINE: usize = 1024;

const COMPONENT: &str = "tcp-client";

pub struct StreamClient {
    server: SocketAddr,
    logger: Arc<dyn TransferLogger>,
}

impl StreamClient {
    pub fn new(server: SocketAddr, logger: Arc<dyn TransferLogger>) -> Self {
        Self { server, logger }
    }

    /// Request `name` and save the response body to `save_path`.
    ///
    /// On any failure the file at `save_path` is removed, so a failed
    /// download never leaves a file behind.
    pub async fn fetch(&self, name: &str, save_path: &Path) -> Result<TransferReport, FetchError> {
        let session = Uuid::new_v4();
        let started = Instant::now();

        let data = match self.receive(name, session).await {
            Ok(data) => data,
            Err(e) => {
                artifact::discard(save_path).await;
                self.log(session, TransferEvent::Error {
                    message: format!("{}: {}", name, e),
                });
                return Err(e);
            }
        };

        artifact::save(save_path, &data).await?;
        let elapsed = started.elapsed();

        self.log(session, TransferEvent::TransferComplete {
            bytes: data.len() as u64,
            chunks: 0,
            duration_ms: elapsed.as_millis() as u64,
            completion: Completion::ConnectionClosed.as_str(),
        });

        Ok(TransferReport {
            name: name.to_string(),
            transport: Transport::Tcp,
            save_path: save_path.to_path_buf(),
            bytes: data.len() as u64,
            elapsed,
            completion: Completion::ConnectionClosed,
            datagrams: 0,
            sha256: artifact::sha256_hex(&data),
        })
    }

    async fn receive(&self, name: &str, session: Uuid) -> Result<BytesMut, FetchError> {
        let mut stream = TcpStream::connect(self.server).await?;
        stream.set_nodelay(true)?;

        stream.write_all(&encode_stream_request(name)).await?;
        self.log(session, TransferEvent::RequestSent {
            transport: Transport::Tcp,
            name: name.to_string(),
            server: self.server,
        });

        let mut buf = BytesMut::with_capacity(READ_WINDOW);
        let mut checked = false;
        loop {
            let n = stream.read_buf(&mut buf).await?;

            if !checked && (buf.len() >= ERROR_MARKER.len() || n == 0) {
                checked = true;
                if is_error(&buf) {
                    read_error_line(&mut stream, &mut buf).await?;
                    return Err(FetchError::Remote(error_reason(&buf)));
                }
            }

            if n == 0 {
                return Ok(buf);
            }
            if buf.capacity() == buf.len() {
                buf.reserve(READ_WINDOW);
            }
        }
    }

    fn log(&self, session: Uuid, event: TransferEvent) {
        self.logger.log(TransferLog {
            component: COMPONENT,
            session,
            event,
        });
    }
}

/// The server closes right after the error line; read until its newline (or
/// the close) so the whole reason is reported.
async fn read_error_line(stream: &mut TcpStream, buf: &mut BytesMut) -> std::io::Result<()> {
    while !buf.contains(&b'\n') && buf.len() < MAX_ERROR_LINE {
        if stream.read_buf(buf).await? == 0 {
            break;
        }
    }
    Ok(())
}
