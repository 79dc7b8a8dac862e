/// duofetch wire protocol: request and error framing shared by the stream
/// (TCP) and datagram (UDP) transports.
///
/// Provides:
/// - Newline-terminated stream requests, single-datagram UDP requests
/// - `ERROR: <reason>\n` responses on both transports
/// - Fixed-size datagram chunking, raw or with an opt-in sequence header
/// - Per-transfer chunk bitfield for sequenced reassembly
/// - Structured transfer event logging

pub mod bitfield;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod transport;

pub use bitfield::ChunkBitfield;
pub use error::ProtocolError;
pub use logging::{NullLogger, TracingLogger, TransferEvent, TransferLog, TransferLogger};
pub use protocol::{
    DEFAULT_CHUNK_SIZE, DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, DatagramFraming, ERROR_MARKER,
    FrameHeader, MALFORMED_REQUEST_REASON, MAX_CHUNK_SIZE, MAX_REQUEST_LEN, NOT_FOUND_REASON,
    READ_FAILURE_REASON, REQUEST_DELIMITER, SEQ_HEADER, UDP_MAX_PAYLOAD, chunk_count,
    decode_frame_header, decode_request, encode_error, encode_frame, encode_stream_request,
    error_reason, frame_payload, is_error, validate_chunk_size,
};
pub use transport::Transport;
