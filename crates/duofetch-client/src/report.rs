use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use duofetch_protocol::Transport;

/// What ended a successful transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// TCP: the server closed the connection after the last byte.
    ConnectionClosed,
    /// UDP: no datagram arrived within the inactivity window.
    Inactivity,
    /// UDP: the hard deadline passed, whatever the traffic.
    HardCap,
    /// UDP sequenced: every chunk index arrived.
    AllChunks,
}

impl Completion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionClosed => "connection_closed",
            Self::Inactivity => "inactivity",
            Self::HardCap => "hard_cap",
            Self::AllChunks => "all_chunks",
        }
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one saved transfer.
///
/// For raw UDP a report means "saved", not "correct": the digest is there so
/// the copy can be compared against the source out of band.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub name: String,
    pub transport: Transport,
    pub save_path: PathBuf,
    pub bytes: u64,
    /// From connect (TCP) or request send (UDP) until the file was written.
    pub elapsed: Duration,
    pub completion: Completion,
    /// Datagrams accepted (UDP) or 0 (TCP).
    pub datagrams: usize,
    /// SHA-256 of the saved bytes, hex encoded.
    pub sha256: String,
}

impl TransferReport {
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}
