//! Datagram (UDP) transfer engine, client side.
//!
//! The request goes out once, with no retry. The session then runs on two
//! timers:
//!
//! - inactivity (default 1 s): re-armed by every accepted datagram, not armed
//!   until the first one arrives;
//! - hard cap (default 5 s): fixed deadline from the moment the request is
//!   sent, fires no matter how busy the channel is.
//!
//! Whichever fires first ends the session. Both timers and the receive live in
//! one `select!` loop, so once it breaks the other timer is dropped and can
//! never trigger a second write.
//!
//! Raw framing: completion is not correctness. The client cannot tell whether
//! every datagram arrived, arrived once, or arrived in order; it only knows
//! nothing new showed up for one inactivity window. Results are exact only on
//! an ordered, lossless path.
//!
//! Sequenced framing: chunks are placed by index and the session completes as
//! soon as every index is present. A timer firing first is a failure.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use duofetch_protocol::{
    ChunkBitfield, DatagramFraming, Transport, TransferEvent, TransferLog, TransferLogger,
    decode_frame_header, error_reason, frame_payload, is_error,
};
use tokio::net::UdpSocket;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::artifact;
use crate::error::FetchError;
use crate::report::{Completion, TransferReport};

/// Socket receive buffer size (8 MB). The OS may clamp it.
const RECV_BUF_SIZE: usize = 8 * 1024 * 1024;

/// Large enough for any UDP datagram.
const DATAGRAM_BUF: usize = 65_536;

/// Upper bound on a sequenced transfer's advertised chunk count.
const MAX_SEQUENCED_CHUNKS: u32 = 1 << 20;

/// Missing chunk indices listed in the warning before it is cut short.
const MISSING_REPORT_LIMIT: usize = 16;

const COMPONENT: &str = "udp-client";

/// Timers and framing for datagram transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramOptions {
    pub inactivity: Duration,
    pub hard_timeout: Duration,
    pub framing: DatagramFraming,
}

impl Default for DatagramOptions {
    fn default() -> Self {
        Self {
            inactivity: Duration::from_secs(1),
            hard_timeout: Duration::from_secs(5),
            framing: DatagramFraming::Raw,
        }
    }
}

/// Bytes gathered by one session and what ended it.
struct Received {
    data: BytesMut,
    completion: Completion,
    datagrams: usize,
}

pub struct DatagramClient {
    server: SocketAddr,
    options: DatagramOptions,
    logger: Arc<dyn TransferLogger>,
}

impl DatagramClient {
    pub fn new(server: SocketAddr, options: DatagramOptions, logger: Arc<dyn TransferLogger>) -> Self {
        Self {
            server,
            options,
            logger,
        }
    }

    /// Request `name` and save whatever the session collects to `save_path`.
    /// Nothing is written if the server reports an error.
    pub async fn fetch(&self, name: &str, save_path: &Path) -> Result<TransferReport, FetchError> {
        let session = Uuid::new_v4();
        let started = Instant::now();

        let received = match self.receive(name, session).await {
            Ok(received) => received,
            Err(e) => {
                self.log(session, TransferEvent::Error {
                    message: format!("{}: {}", name, e),
                });
                return Err(e);
            }
        };

        if received.data.is_empty() && received.completion == Completion::HardCap {
            warn!("UDP: {} finalized by hard cap with no data received", name);
        }

        artifact::save(save_path, &received.data).await?;
        let elapsed = started.elapsed();

        self.log(session, TransferEvent::TransferComplete {
            bytes: received.data.len() as u64,
            chunks: received.datagrams,
            duration_ms: elapsed.as_millis() as u64,
            completion: received.completion.as_str(),
        });

        Ok(TransferReport {
            name: name.to_string(),
            transport: Transport::Udp,
            save_path: save_path.to_path_buf(),
            bytes: received.data.len() as u64,
            elapsed,
            completion: received.completion,
            datagrams: received.datagrams,
            sha256: artifact::sha256_hex(&received.data),
        })
    }

    async fn receive(&self, name: &str, session: Uuid) -> Result<Received, FetchError> {
        let bind_ip = match self.server.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = UdpSocket::bind(SocketAddr::new(bind_ip, 0)).await?;
        if let Err(e) = socket2::SockRef::from(&socket).set_recv_buffer_size(RECV_BUF_SIZE) {
            warn!("UDP: failed to set recv buffer: {}", e);
        }

        socket.send_to(name.as_bytes(), self.server).await?;
        let hard_deadline = Instant::now() + self.options.hard_timeout;
        self.log(session, TransferEvent::RequestSent {
            transport: Transport::Udp,
            name: name.to_string(),
            server: self.server,
        });

        match self.options.framing {
            DatagramFraming::Raw => self.receive_raw(&socket, hard_deadline, session).await,
            DatagramFraming::Sequenced => {
                self.receive_sequenced(&socket, hard_deadline, session).await
            }
        }
    }

    /// Append every datagram in arrival order until a timer fires.
    async fn receive_raw(
        &self,
        socket: &UdpSocket,
        hard_deadline: Instant,
        session: Uuid,
    ) -> Result<Received, FetchError> {
        let hard_cap = sleep_until(hard_deadline);
        let idle = sleep(self.options.inactivity);
        tokio::pin!(hard_cap);
        tokio::pin!(idle);
        let mut armed = false;

        let mut data = BytesMut::new();
        let mut datagrams = 0usize;
        let mut buf = vec![0u8; DATAGRAM_BUF];

        let completion = loop {
            tokio::select! {
                _ = &mut hard_cap => break Completion::HardCap,
                _ = &mut idle, if armed => break Completion::Inactivity,
                received = socket.recv_from(&mut buf) => {
                    let (len, from) = received?;
                    if from != self.server {
                        debug!("UDP: ignoring {} bytes from {}", len, from);
                        continue;
                    }
                    let datagram = &buf[..len];
                    if is_error(datagram) {
                        return Err(FetchError::Remote(error_reason(datagram)));
                    }

                    data.extend_from_slice(datagram);
                    datagrams += 1;
                    idle.as_mut().reset(Instant::now() + self.options.inactivity);
                    armed = true;

                    self.log(session, TransferEvent::DatagramReceived {
                        len,
                        total: data.len() as u64,
                    });
                }
            }
        };

        Ok(Received {
            data,
            completion,
            datagrams,
        })
    }

    /// Place frames by index until all have arrived or a timer fires.
    async fn receive_sequenced(
        &self,
        socket: &UdpSocket,
        hard_deadline: Instant,
        session: Uuid,
    ) -> Result<Received, FetchError> {
        let hard_cap = sleep_until(hard_deadline);
        let idle = sleep(self.options.inactivity);
        tokio::pin!(hard_cap);
        tokio::pin!(idle);
        let mut armed = false;

        let mut slots: Vec<Option<Vec<u8>>> = Vec::new();
        let mut arrived: Option<ChunkBitfield> = None;
        let mut datagrams = 0usize;
        let mut buf = vec![0u8; DATAGRAM_BUF];

        let completion = loop {
            tokio::select! {
                _ = &mut hard_cap => break Completion::HardCap,
                _ = &mut idle, if armed => break Completion::Inactivity,
                received = socket.recv_from(&mut buf) => {
                    let (len, from) = received?;
                    if from != self.server {
                        debug!("UDP: ignoring {} bytes from {}", len, from);
                        continue;
                    }
                    let datagram = &buf[..len];
                    if is_error(datagram) {
                        return Err(FetchError::Remote(error_reason(datagram)));
                    }

                    let (Some(header), Some(payload)) =
                        (decode_frame_header(datagram), frame_payload(datagram))
                    else {
                        warn!("UDP: dropping malformed frame of {} bytes", len);
                        continue;
                    };
                    if arrived.is_none() {
                        if header.chunk_count > MAX_SEQUENCED_CHUNKS {
                            warn!("UDP: dropping frame advertising {} chunks", header.chunk_count);
                            continue;
                        }
                        slots = vec![None; header.chunk_count as usize];
                        arrived = Some(ChunkBitfield::new(header.chunk_count));
                    }
                    let Some(field) = arrived.as_mut() else {
                        continue;
                    };
                    if field.total() != header.chunk_count {
                        warn!(
                            "UDP: dropping frame with chunk count {} (expected {})",
                            header.chunk_count,
                            field.total()
                        );
                        continue;
                    }

                    if field.set(header.chunk_index) {
                        slots[header.chunk_index as usize] = Some(payload.to_vec());
                    }
                    datagrams += 1;
                    idle.as_mut().reset(Instant::now() + self.options.inactivity);
                    armed = true;

                    self.log(session, TransferEvent::DatagramReceived {
                        len,
                        total: field.received() as u64,
                    });

                    if field.is_complete() {
                        break Completion::AllChunks;
                    }
                }
            }
        };

        // The inactivity timer is only armed by an accepted frame, so an empty
        // session always ends on the hard cap.
        let Some(field) = arrived else {
            return Err(FetchError::NoResponse(self.options.hard_timeout));
        };
        if !field.is_complete() {
            let missing = field.missing_chunks();
            warn!(
                "UDP: {} of {} chunks missing at {}: {:?}{}",
                missing.len(),
                field.total(),
                completion,
                &missing[..missing.len().min(MISSING_REPORT_LIMIT)],
                if missing.len() > MISSING_REPORT_LIMIT { " ..." } else { "" }
            );
            return Err(FetchError::Incomplete {
                received: field.received(),
                expected: field.total(),
            });
        }

        let mut data = BytesMut::new();
        for payload in slots.into_iter().flatten() {
            data.extend_from_slice(&payload);
        }

        Ok(Received {
            data,
            completion,
            datagrams,
        })
    }

    fn log(&self, session: Uuid, event: TransferEvent) {
        self.logger.log(TransferLog {
            component: COMPONENT,
            session,
            event,
        });
    }
}
