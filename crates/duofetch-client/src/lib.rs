//! duofetch client.
//!
//! Downloads a configured list of files from a duofetch server over TCP or
//! UDP, one file at a time, timing each transfer.
//!
//! TCP transfers are exact: the server closes the connection after the last
//! byte. UDP transfers are best effort: with raw framing the client stops
//! listening after a quiet period and saves whatever arrived, in arrival order.

mod artifact;
pub mod config;
pub mod datagram;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod stream;

pub use config::ClientConfig;
pub use datagram::{DatagramClient, DatagramOptions};
pub use error::FetchError;
pub use orchestrator::{BatchSummary, FileOutcome, Orchestrator, save_path_for};
pub use report::{Completion, TransferReport};
pub use stream::StreamClient;
