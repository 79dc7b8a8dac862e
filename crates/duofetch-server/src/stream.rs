//! Stream (TCP) transfer engine, server side.
//!
//! One task per accepted connection, no state shared between them beyond the
//! read-only resolver:
//!
//! ```text
//! AwaitingRequest -> Resolving -> Streaming -> Closed
//!        |               |
//!        +---------------+-----> Error -----> Closed
//! ```
//!
//! The request is one `\n`-terminated line. The response is the raw file
//! followed by a clean close, or a single `ERROR: <reason>\n` line followed by
//! a clean close. There is no length header: close is the end-of-file signal.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use duofetch_protocol::{
    MALFORMED_REQUEST_REASON, MAX_REQUEST_LEN, NOT_FOUND_REASON, ProtocolError,
    READ_FAILURE_REASON, REQUEST_DELIMITER, Transport, TransferEvent, TransferLog,
    TransferLogger, decode_request, encode_error,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::resolver::PathResolver;

/// 4 MB socket buffers for throughput.
const SOCKET_BUF_SIZE: usize = 4 * 1024 * 1024;

/// Files are streamed through a window of this size, never loaded whole.
const STREAM_WINDOW: usize = 64 * 1024;

const COMPONENT: &str = "tcp-server";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    AwaitingRequest,
    Resolving,
    Streaming,
    Error,
    Closed,
}

/// Shared state for all TCP connections.
#[derive(Clone)]
pub struct StreamEngine {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    resolver: PathResolver,
    logger: Arc<dyn TransferLogger>,
}

impl StreamEngine {
    pub fn new(resolver: PathResolver, logger: Arc<dyn TransferLogger>) -> Self {
        Self {
            inner: Arc::new(StreamInner { resolver, logger }),
        }
    }

    /// Accept connections until `shutdown` fires. Connections already being
    /// served run to completion on their own tasks.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("TCP: listener stopped");
                    return;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("TCP: new connection from {}", peer);
                        let engine = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = engine.handle_connection(stream, peer).await {
                                warn!("TCP: connection error from {}: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("TCP: accept error: {}", e);
                    }
                }
            }
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) -> std::io::Result<()> {
        tune_socket(&stream);

        let session = Uuid::new_v4();
        let started = Instant::now();
        let mut state = ConnState::AwaitingRequest;
        debug!(%session, ?state, "TCP: awaiting request from {}", peer);

        let name = match read_request(&mut stream).await? {
            Ok(name) => name,
            Err(e) => {
                state = ConnState::Error;
                self.log(session, TransferEvent::Error {
                    message: format!("{} from {}", e, peer),
                });
                stream.write_all(&encode_error(MALFORMED_REQUEST_REASON)).await?;
                stream.shutdown().await?;
                debug!(%session, ?state, "TCP: closing");
                return Ok(());
            }
        };

        self.log(session, TransferEvent::RequestReceived {
            transport: Transport::Tcp,
            name: name.clone(),
            peer,
        });

        state = ConnState::Resolving;
        debug!(%session, ?state, "TCP: resolving {:?}", name);
        let path = match self.inner.resolver.resolve(&name) {
            Ok(path) => path,
            Err(e) => {
                state = ConnState::Error;
                self.log(session, TransferEvent::RequestRejected {
                    name,
                    reason: e.to_string(),
                });
                stream.write_all(&encode_error(NOT_FOUND_REASON)).await?;
                stream.shutdown().await?;
                debug!(%session, ?state, "TCP: closing");
                return Ok(());
            }
        };

        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                state = ConnState::Error;
                self.log(session, TransferEvent::Error {
                    message: format!("read {}: {}", path.display(), e),
                });
                stream.write_all(&encode_error(READ_FAILURE_REASON)).await?;
                stream.shutdown().await?;
                debug!(%session, ?state, "TCP: closing");
                return Ok(());
            }
        };

        state = ConnState::Streaming;
        debug!(%session, ?state, "TCP: streaming {}", path.display());
        let mut reader = BufReader::with_capacity(STREAM_WINDOW, file);
        match send_body(&mut reader, &mut stream).await {
            Ok(bytes) => {
                state = ConnState::Closed;
                self.log(session, TransferEvent::TransferComplete {
                    bytes,
                    chunks: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                    completion: "closed",
                });
                debug!(%session, ?state, "TCP: done");
            }
            Err(e) => {
                self.log(session, TransferEvent::Error {
                    message: format!("streaming {} aborted: {}", path.display(), e),
                });
            }
        }

        Ok(())
    }

    fn log(&self, session: Uuid, event: TransferEvent) {
        self.inner.logger.log(TransferLog {
            component: COMPONENT,
            session,
            event,
        });
    }
}

/// Copy the body to the peer and close cleanly. On any error the connection
/// is reset instead: bytes are already on the wire, so an ERROR line would be
/// taken as file content.
async fn send_body<R>(reader: &mut R, stream: &mut TcpStream) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    match tokio::io::copy_buf(reader, stream).await {
        Ok(bytes) => {
            stream.shutdown().await?;
            Ok(bytes)
        }
        Err(e) => {
            abort(stream);
            Err(e)
        }
    }
}

/// Read one request line. The outer error is socket I/O; the inner error is a
/// request that never produced a usable line.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<Result<String, ProtocolError>> {
    let limited = (&mut *stream).take(MAX_REQUEST_LEN as u64 + 1);
    let mut reader = BufReader::new(limited);
    let mut line = Vec::new();
    reader.read_until(REQUEST_DELIMITER, &mut line).await?;

    if line.last() != Some(&REQUEST_DELIMITER) {
        if line.len() > MAX_REQUEST_LEN {
            return Ok(Err(ProtocolError::RequestTooLong {
                len: line.len(),
                max: MAX_REQUEST_LEN,
            }));
        }
        return Ok(Err(ProtocolError::MalformedRequest(
            "connection closed before newline",
        )));
    }
    Ok(decode_request(&line))
}

fn tune_socket(stream: &TcpStream) {
    let sock_ref = socket2::SockRef::from(stream);
    if let Err(e) = sock_ref.set_nodelay(true) {
        warn!("TCP: failed to set nodelay: {}", e);
    }
    if let Err(e) = sock_ref.set_send_buffer_size(SOCKET_BUF_SIZE) {
        warn!("TCP: failed to set send buffer: {}", e);
    }
    if let Err(e) = sock_ref.set_recv_buffer_size(SOCKET_BUF_SIZE) {
        warn!("TCP: failed to set recv buffer: {}", e);
    }
}

/// Zero linger: dropping the socket sends RST instead of FIN.
fn abort(stream: &TcpStream) {
    if let Err(e) = socket2::SockRef::from(stream).set_linger(Some(Duration::ZERO)) {
        warn!("TCP: failed to set linger: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::{AsyncRead, ReadBuf};

    /// Fails every read, like a file whose disk went away mid-transfer.
    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::Error::other("device went away")))
        }
    }

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn complete_body_ends_with_clean_close() {
        let (mut server, mut client) = connected_pair().await;

        let mut reader = BufReader::new(&b"whole file"[..]);
        let sent = send_body(&mut reader, &mut server).await.unwrap();
        assert_eq!(sent, 10);

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"whole file");
    }

    #[tokio::test]
    async fn read_failure_mid_body_resets_connection() {
        let (mut server, mut client) = connected_pair().await;

        let mut reader = BufReader::new((&b"partial body"[..]).chain(FailingReader));
        assert!(send_body(&mut reader, &mut server).await.is_err());
        drop(server);

        // No clean EOF: the peer must never mistake the prefix for the file.
        let mut received = Vec::new();
        assert!(client.read_to_end(&mut received).await.is_err());
    }
}
