//! Datagram (UDP) transfer engine, server side.
//!
//! A single socket receives requests from every client, keyed only by source
//! address. Each request is handled on its own task and keeps no state once
//! its send loop ends:
//!
//! 1. Decode the request datagram (UTF-8 path, trailing newline tolerated).
//! 2. Resolve it. On failure send one `ERROR:` datagram back and stop.
//! 3. Read the whole file and send it in `chunk_size` pieces, one awaited
//!    `send_to` after another. No acknowledgments, no retransmission, no
//!    end-of-transfer marker: the client infers the end from silence.
//!
//! With raw framing a lost, duplicated or reordered datagram silently corrupts
//! the client's copy. Sequenced framing adds `[index][count]` to every chunk
//! so the client can place chunks and detect loss.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use duofetch_protocol::{
    DEFAULT_CHUNK_SIZE, DatagramFraming, MALFORMED_REQUEST_REASON, MAX_REQUEST_LEN,
    NOT_FOUND_REASON, READ_FAILURE_REASON, SEQ_HEADER, Transport, TransferEvent, TransferLog,
    TransferLogger, chunk_count, decode_request, encode_error, encode_frame,
};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::resolver::PathResolver;

/// Socket receive buffer size (4 MB).
const RECV_BUF_SIZE: usize = 4 * 1024 * 1024;

/// Socket send buffer size (4 MB).
const SEND_BUF_SIZE: usize = 4 * 1024 * 1024;

const COMPONENT: &str = "udp-server";

/// How files are cut into datagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramSettings {
    /// Payload bytes per datagram (excluding the sequence header).
    pub chunk_size: usize,
    pub framing: DatagramFraming,
    /// Delay between consecutive chunks. Zero sends back-to-back.
    pub pacing: Duration,
}

impl Default for DatagramSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            framing: DatagramFraming::Raw,
            pacing: Duration::ZERO,
        }
    }
}

/// Shared state for the UDP listener.
#[derive(Clone)]
pub struct DatagramEngine {
    inner: Arc<DatagramInner>,
}

struct DatagramInner {
    resolver: PathResolver,
    settings: DatagramSettings,
    logger: Arc<dyn TransferLogger>,
}

impl DatagramEngine {
    pub fn new(
        resolver: PathResolver,
        settings: DatagramSettings,
        logger: Arc<dyn TransferLogger>,
    ) -> Self {
        Self {
            inner: Arc::new(DatagramInner {
                resolver,
                settings,
                logger,
            }),
        }
    }

    /// Receive requests until `shutdown` fires.
    pub async fn run(self, socket: Arc<UdpSocket>, shutdown: CancellationToken) {
        let sock_ref = socket2::SockRef::from(&*socket);
        if let Err(e) = sock_ref.set_recv_buffer_size(RECV_BUF_SIZE) {
            warn!("UDP: failed to set recv buffer: {}", e);
        }
        if let Err(e) = sock_ref.set_send_buffer_size(SEND_BUF_SIZE) {
            warn!("UDP: failed to set send buffer: {}", e);
        }

        // One byte over the limit so oversized requests are detected, not truncated.
        let mut buf = vec![0u8; MAX_REQUEST_LEN + 1];

        info!(
            "UDP: listening for requests (chunk_size={}, framing={})",
            self.inner.settings.chunk_size, self.inner.settings.framing
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("UDP: listener stopped");
                    return;
                }
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => {
                        if len == 0 {
                            continue;
                        }
                        let request = buf[..len].to_vec();
                        let engine = self.clone();
                        let socket = socket.clone();
                        tokio::spawn(async move {
                            engine.handle_request(&socket, &request, peer).await;
                        });
                    }
                    Err(e) => {
                        // ICMP port unreachable from an earlier send surfaces
                        // here on some platforms. Not fatal.
                        if e.kind() == io::ErrorKind::ConnectionReset {
                            continue;
                        }
                        error!("UDP: recv error: {}", e);
                    }
                }
            }
        }
    }

    async fn handle_request(&self, socket: &UdpSocket, request: &[u8], peer: SocketAddr) {
        let session = Uuid::new_v4();
        let started = Instant::now();

        let name = match decode_request(request) {
            Ok(name) => name,
            Err(e) => {
                self.log(session, TransferEvent::Error {
                    message: format!("{} from {}", e, peer),
                });
                self.send_error(socket, peer, MALFORMED_REQUEST_REASON).await;
                return;
            }
        };

        self.log(session, TransferEvent::RequestReceived {
            transport: Transport::Udp,
            name: name.clone(),
            peer,
        });

        let path = match self.inner.resolver.resolve(&name) {
            Ok(path) => path,
            Err(e) => {
                self.log(session, TransferEvent::RequestRejected {
                    name,
                    reason: e.to_string(),
                });
                self.send_error(socket, peer, NOT_FOUND_REASON).await;
                return;
            }
        };

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) => {
                self.log(session, TransferEvent::Error {
                    message: format!("read {}: {}", path.display(), e),
                });
                self.send_error(socket, peer, READ_FAILURE_REASON).await;
                return;
            }
        };

        match self.send_chunks(socket, peer, &data, session).await {
            Ok(chunks) => {
                self.log(session, TransferEvent::TransferComplete {
                    bytes: data.len() as u64,
                    chunks,
                    duration_ms: started.elapsed().as_millis() as u64,
                    completion: "sent",
                });
            }
            Err(e) => {
                self.log(session, TransferEvent::Error {
                    message: format!("send to {} failed: {}", peer, e),
                });
            }
        }
    }

    /// Send `data` to `peer` as a sequence of chunk datagrams. Returns the
    /// number of datagrams sent.
    ///
    /// Raw framing sends `ceil(len / chunk_size)` datagrams (none for an empty
    /// file). Sequenced framing always sends at least one frame so the client
    /// learns the chunk count.
    pub async fn send_chunks(
        &self,
        socket: &UdpSocket,
        peer: SocketAddr,
        data: &[u8],
        session: Uuid,
    ) -> io::Result<usize> {
        let DatagramSettings {
            chunk_size,
            framing,
            pacing,
        } = self.inner.settings;

        let total = match framing {
            DatagramFraming::Raw => chunk_count(data.len(), chunk_size),
            DatagramFraming::Sequenced => chunk_count(data.len(), chunk_size).max(1),
        };
        let total_u32 = u32::try_from(total)
            .map_err(|_| io::Error::other("file has too many chunks for sequenced framing"))?;

        let mut frame = match framing {
            DatagramFraming::Raw => Vec::new(),
            DatagramFraming::Sequenced => vec![0u8; SEQ_HEADER + chunk_size],
        };

        for index in 0..total {
            let start = index * chunk_size;
            let end = (start + chunk_size).min(data.len());
            let payload = &data[start..end];

            match framing {
                DatagramFraming::Raw => {
                    socket.send_to(payload, peer).await?;
                }
                DatagramFraming::Sequenced => {
                    // index < total, which fits u32
                    let n = encode_frame(&mut frame, index as u32, total_u32, payload);
                    socket.send_to(&frame[..n], peer).await?;
                }
            }
            self.log(session, TransferEvent::ChunkSent {
                index,
                len: payload.len(),
            });

            if !pacing.is_zero() && index + 1 < total {
                tokio::time::sleep(pacing).await;
            }
        }

        Ok(total)
    }

    async fn send_error(&self, socket: &UdpSocket, peer: SocketAddr, reason: &str) {
        if let Err(e) = socket.send_to(&encode_error(reason), peer).await {
            warn!("UDP: failed to send error to {}: {}", peer, e);
        }
    }

    fn log(&self, session: Uuid, event: TransferEvent) {
        self.inner.logger.log(TransferLog {
            component: COMPONENT,
            session,
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use duofetch_protocol::{NullLogger, decode_frame_header, frame_payload, is_error};

    fn engine(settings: DatagramSettings) -> (PathBuf, DatagramEngine) {
        let root = std::env::temp_dir().join(format!("duofetch_udp_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        let resolver = PathResolver::new(&root).unwrap();
        (root, DatagramEngine::new(resolver, settings, Arc::new(NullLogger)))
    }

    async fn pair() -> (UdpSocket, UdpSocket, SocketAddr) {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();
        (server, client, client_addr)
    }

    #[tokio::test]
    async fn five_megabytes_take_84_chunks() {
        let (root, engine) = engine(DatagramSettings::default());
        let (server, _client, client_addr) = pair().await;

        // The receiver never reads; the kernel drops what does not fit.
        let data = vec![7u8; 5_000_000];
        let sent = engine
            .send_chunks(&server, client_addr, &data, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(sent, 84);

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn raw_chunks_concatenate_to_source() {
        let settings = DatagramSettings {
            chunk_size: 1000,
            ..Default::default()
        };
        let (root, engine) = engine(settings);
        let (server, client, client_addr) = pair().await;

        let data: Vec<u8> = (0..3500).map(|i| (i % 251) as u8).collect();
        let sent = engine
            .send_chunks(&server, client_addr, &data, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(sent, 4);

        let mut received = Vec::new();
        let mut buf = vec![0u8; 2048];
        let mut sizes = Vec::new();
        for _ in 0..sent {
            let (n, _) = client.recv_from(&mut buf).await.unwrap();
            sizes.push(n);
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(sizes, vec![1000, 1000, 1000, 500]);
        assert_eq!(received, data);

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn empty_file_sends_nothing_raw_and_one_frame_sequenced() {
        let (root, raw) = engine(DatagramSettings::default());
        let (server, client, client_addr) = pair().await;
        let sent = raw
            .send_chunks(&server, client_addr, &[], Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(sent, 0);
        std::fs::remove_dir_all(root).ok();

        let (root, sequenced) = engine(DatagramSettings {
            framing: DatagramFraming::Sequenced,
            ..Default::default()
        });
        let sent = sequenced
            .send_chunks(&server, client_addr, &[], Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(sent, 1);

        let mut buf = vec![0u8; 64];
        let (n, _) = client.recv_from(&mut buf).await.unwrap();
        let header = decode_frame_header(&buf[..n]).unwrap();
        assert_eq!((header.chunk_index, header.chunk_count), (0, 1));
        assert_eq!(frame_payload(&buf[..n]), Some(&[][..]));
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn sequenced_frames_carry_index_and_count() {
        let (root, engine) = engine(DatagramSettings {
            chunk_size: 4,
            framing: DatagramFraming::Sequenced,
            pacing: Duration::ZERO,
        });
        let (server, client, client_addr) = pair().await;

        let sent = engine
            .send_chunks(&server, client_addr, b"abcdefghij", Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(sent, 3);

        let mut buf = vec![0u8; 64];
        let mut seen = Vec::new();
        for _ in 0..sent {
            let (n, _) = client.recv_from(&mut buf).await.unwrap();
            let header = decode_frame_header(&buf[..n]).unwrap();
            assert_eq!(header.chunk_count, 3);
            seen.push((header.chunk_index, frame_payload(&buf[..n]).unwrap().to_vec()));
        }
        assert_eq!(
            seen,
            vec![
                (0, b"abcd".to_vec()),
                (1, b"efgh".to_vec()),
                (2, b"ij".to_vec()),
            ]
        );

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn unknown_file_gets_one_error_datagram() {
        let (root, engine) = engine(DatagramSettings::default());
        let (server, client, client_addr) = pair().await;

        engine.handle_request(&server, b"missing.txt", client_addr).await;

        let mut buf = vec![0u8; 256];
        let (n, from) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(from, server.local_addr().unwrap());
        assert!(is_error(&buf[..n]));
        assert_eq!(&buf[..n], encode_error(NOT_FOUND_REASON).as_slice());

        std::fs::remove_dir_all(root).ok();
    }
}
