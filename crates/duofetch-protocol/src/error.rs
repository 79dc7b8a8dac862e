use thiserror::Error;

/// Errors raised while decoding requests or protocol settings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed request: {0}")]
    MalformedRequest(&'static str),

    #[error("request of {len} bytes exceeds the {max}-byte limit")]
    RequestTooLong { len: usize, max: usize },

    #[error("chunk size {0} is outside 1..={max}", max = crate::protocol::MAX_CHUNK_SIZE)]
    InvalidChunkSize(usize),

    #[error("unknown transport {0:?}, expected TCP or UDP")]
    UnknownTransport(String),

    #[error("unknown datagram framing {0:?}, expected raw or sequenced")]
    UnknownFraming(String),
}
