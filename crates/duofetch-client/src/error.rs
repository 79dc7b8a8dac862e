use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Why a single file's transfer failed. The batch carries on regardless.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server answered with an `ERROR:` line.
    #[error("server error: {0}")]
    Remote(String),

    #[error("network failure: {0}")]
    Network(#[from] io::Error),

    #[error("failed to save {}: {source}", .path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Sequenced framing only: a timer fired before every chunk arrived.
    #[error("incomplete transfer: {received} of {expected} chunks arrived")]
    Incomplete { received: u32, expected: u32 },

    /// Sequenced framing only: not a single frame arrived.
    #[error("no response from server within {0:?}")]
    NoResponse(Duration),
}
