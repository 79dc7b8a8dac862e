/// Transfer logging trait for structured lifecycle logs.
///
/// Server engines and client engines report the same event vocabulary so a
/// transfer can be followed on both ends by its session id.

use std::fmt;
use std::net::SocketAddr;

use uuid::Uuid;

use crate::transport::Transport;

/// Structured log entry for a transfer operation.
#[derive(Debug, Clone)]
pub struct TransferLog {
    pub component: &'static str,
    pub session: Uuid,
    pub event: TransferEvent,
}

/// Transfer events that can be logged.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Server: a request arrived
    RequestReceived {
        transport: Transport,
        name: String,
        peer: SocketAddr,
    },
    /// Server: request answered with an error line
    RequestRejected {
        name: String,
        reason: String,
    },
    /// Client: request written to the socket
    RequestSent {
        transport: Transport,
        name: String,
        server: SocketAddr,
    },
    /// Server: one datagram chunk sent
    ChunkSent {
        index: usize,
        len: usize,
    },
    /// Client: one datagram accepted into the buffer
    DatagramReceived {
        len: usize,
        total: u64,
    },
    /// Either side: transfer finished
    TransferComplete {
        bytes: u64,
        chunks: usize,
        duration_ms: u64,
        completion: &'static str,
    },
    /// Error occurred
    Error {
        message: String,
    },
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestReceived { transport, name, peer } => {
                write!(f, "request_received transport={} name={:?} peer={}", transport, name, peer)
            }
            Self::RequestRejected { name, reason } => {
                write!(f, "request_rejected name={:?} reason={}", name, reason)
            }
            Self::RequestSent { transport, name, server } => {
                write!(f, "request_sent transport={} name={:?} server={}", transport, name, server)
            }
            Self::ChunkSent { index, len } => {
                write!(f, "chunk_sent idx={} len={}", index, len)
            }
            Self::DatagramReceived { len, total } => {
                write!(f, "datagram_received len={} total={}", len, total)
            }
            Self::TransferComplete { bytes, chunks, duration_ms, completion } => {
                write!(
                    f,
                    "transfer_complete bytes={} chunks={} duration_ms={} completion={}",
                    bytes, chunks, duration_ms, completion
                )
            }
            Self::Error { message } => {
                write!(f, "error: {}", message)
            }
        }
    }
}

/// Trait for transfer logging. Implementations can write to tracing or
/// discard entries.
pub trait TransferLogger: Send + Sync {
    fn log(&self, entry: TransferLog);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl TransferLogger for TracingLogger {
    fn log(&self, entry: TransferLog) {
        // info for lifecycle, debug for per-datagram traffic
        match &entry.event {
            TransferEvent::ChunkSent { .. } | TransferEvent::DatagramReceived { .. } => {
                tracing::debug!(
                    component = entry.component,
                    session = %entry.session,
                    "{}",
                    entry.event,
                );
            }
            TransferEvent::RequestRejected { .. } | TransferEvent::Error { .. } => {
                tracing::warn!(
                    component = entry.component,
                    session = %entry.session,
                    "{}",
                    entry.event,
                );
            }
            _ => {
                tracing::info!(
                    component = entry.component,
                    session = %entry.session,
                    "{}",
                    entry.event,
                );
            }
        }
    }
}

/// No-op logger that discards all log entries.
pub struct NullLogger;

impl TransferLogger for NullLogger {
    fn log(&self, _entry: TransferLog) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_render_as_key_value_pairs() {
        let event = TransferEvent::TransferComplete {
            bytes: 10_240,
            chunks: 1,
            duration_ms: 3,
            completion: "inactivity",
        };
        assert_eq!(
            event.to_string(),
            "transfer_complete bytes=10240 chunks=1 duration_ms=3 completion=inactivity"
        );

        let event = TransferEvent::RequestReceived {
            transport: Transport::Udp,
            name: "5MB.txt".into(),
            peer: "127.0.0.1:40000".parse().unwrap(),
        };
        assert_eq!(
            event.to_string(),
            "request_received transport=UDP name=\"5MB.txt\" peer=127.0.0.1:40000"
        );
    }
}
