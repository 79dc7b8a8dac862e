/// Wire format for both transports.
///
/// ```text
/// stream    client -> server   <relative path>\n
///           server -> client   <file bytes>, then close
///                            | ERROR: <reason>\n, then close
///
/// datagram  client -> server   <relative path>                 (one datagram)
///           server -> client   <chunk> <chunk> ...             (raw)
///                            | [idx u32 BE][count u32 BE]<chunk> ...  (sequenced)
///                            | ERROR: <reason>\n               (one datagram)
/// ```
///
/// Raw chunks carry no offset or sequence number. The receiver appends them in
/// arrival order and infers the end of the file from silence, so a raw
/// transfer is only correct on an ordered, lossless path (loopback, quiet LAN).
/// Sequenced framing is the opt-in fix: both ends must be configured for it.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Default TCP listener port.
pub const DEFAULT_TCP_PORT: u16 = 5000;

/// Default UDP listener port.
pub const DEFAULT_UDP_PORT: u16 = 5001;

/// Terminates a stream request.
pub const REQUEST_DELIMITER: u8 = b'\n';

/// Longest request line the server will buffer.
pub const MAX_REQUEST_LEN: usize = 4096;

/// Every error response starts with these bytes.
pub const ERROR_MARKER: &[u8] = b"ERROR";

/// Sent for both missing files and paths outside the root, so peers cannot
/// probe the server's directory layout.
pub const NOT_FOUND_REASON: &str = "File not found or access denied.";

pub const READ_FAILURE_REASON: &str = "Failed to read file.";

pub const MALFORMED_REQUEST_REASON: &str = "Malformed request.";

/// Largest UDP payload over IPv4 (65535 - 20 IP - 8 UDP).
pub const UDP_MAX_PAYLOAD: usize = 65_507;

/// Sequenced frame header: chunk index + chunk count, both u32 BE.
pub const SEQ_HEADER: usize = 8;

/// Largest chunk that still fits one datagram with a sequence header.
pub const MAX_CHUNK_SIZE: usize = UDP_MAX_PAYLOAD - SEQ_HEADER;

/// Default chunk size: 60 KB per datagram.
pub const DEFAULT_CHUNK_SIZE: usize = 60_000;

/// How file chunks are laid out in datagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatagramFraming {
    /// Bare payloads, completion inferred from silence.
    #[default]
    Raw,
    /// Payloads prefixed with `[index][count]`, completion when all indices arrive.
    Sequenced,
}

impl FromStr for DatagramFraming {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "sequenced" | "seq" => Ok(Self::Sequenced),
            _ => Err(ProtocolError::UnknownFraming(s.to_string())),
        }
    }
}

impl fmt::Display for DatagramFraming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => f.write_str("raw"),
            Self::Sequenced => f.write_str("sequenced"),
        }
    }
}

/// Encode a stream request: the path followed by a newline.
pub fn encode_stream_request(path: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(path.len() + 1);
    buf.extend_from_slice(path.as_bytes());
    buf.push(REQUEST_DELIMITER);
    buf
}

/// Decode a request from either transport.
///
/// Accepts an optional trailing `\n` or `\r\n` and trims surrounding
/// whitespace. The result is still untrusted and must go through the path
/// resolver.
pub fn decode_request(raw: &[u8]) -> Result<String, ProtocolError> {
    if raw.len() > MAX_REQUEST_LEN {
        return Err(ProtocolError::RequestTooLong {
            len: raw.len(),
            max: MAX_REQUEST_LEN,
        });
    }
    let text = std::str::from_utf8(raw)
        .map_err(|_| ProtocolError::MalformedRequest("request is not valid UTF-8"))?;
    let name = text.trim();
    if name.is_empty() {
        return Err(ProtocolError::MalformedRequest("empty request"));
    }
    if name.contains('\0') {
        return Err(ProtocolError::MalformedRequest("request contains NUL"));
    }
    Ok(name.to_string())
}

/// Encode an error response line.
pub fn encode_error(reason: &str) -> Vec<u8> {
    format!("ERROR: {}\n", reason).into_bytes()
}

/// True if `data` starts with the error marker.
///
/// A file whose content itself starts with `ERROR` is indistinguishable from
/// an error response; the protocol has no way around that.
pub fn is_error(data: &[u8]) -> bool {
    data.starts_with(ERROR_MARKER)
}

/// Extract the human-readable reason from an error response.
pub fn error_reason(data: &[u8]) -> String {
    let text = String::from_utf8_lossy(data);
    let rest = text.strip_prefix("ERROR").unwrap_or(&text);
    let rest = rest.strip_prefix(':').unwrap_or(rest);
    rest.trim().to_string()
}

/// Check a configured chunk size against the datagram ceiling.
pub fn validate_chunk_size(chunk_size: usize) -> Result<usize, ProtocolError> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(ProtocolError::InvalidChunkSize(chunk_size));
    }
    Ok(chunk_size)
}

/// Number of chunks needed for `len` bytes: ceil(len / chunk_size).
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size)
}

/// Encode a sequenced frame into `buf`. Returns bytes written.
///
/// # Panics
/// Panics if `buf` is smaller than `SEQ_HEADER + payload.len()`.
pub fn encode_frame(buf: &mut [u8], chunk_index: u32, chunk_count: u32, payload: &[u8]) -> usize {
    let total = SEQ_HEADER + payload.len();
    assert!(buf.len() >= total);

    buf[0..4].copy_from_slice(&chunk_index.to_be_bytes());
    buf[4..8].copy_from_slice(&chunk_count.to_be_bytes());
    buf[SEQ_HEADER..total].copy_from_slice(payload);
    total
}

/// Parsed sequenced frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub chunk_index: u32,
    pub chunk_count: u32,
}

/// Decode a sequenced frame header. Returns None if the frame is too short or
/// the index is out of range.
pub fn decode_frame_header(data: &[u8]) -> Option<FrameHeader> {
    if data.len() < SEQ_HEADER {
        return None;
    }
    let chunk_index = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let chunk_count = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if chunk_index >= chunk_count {
        return None;
    }
    Some(FrameHeader {
        chunk_index,
        chunk_count,
    })
}

/// Payload slice of a sequenced frame, or None if shorter than the header.
pub fn frame_payload(data: &[u8]) -> Option<&[u8]> {
    data.get(SEQ_HEADER..)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_request_is_newline_terminated() {
        assert_eq!(encode_stream_request("10KB.txt"), b"10KB.txt\n");
    }

    #[test]
    fn decode_request_trims_line_endings() {
        assert_eq!(decode_request(b"10KB.txt\n").unwrap(), "10KB.txt");
        assert_eq!(decode_request(b"docs/a.txt\r\n").unwrap(), "docs/a.txt");
        assert_eq!(decode_request(b"  b.txt  ").unwrap(), "b.txt");
    }

    #[test]
    fn decode_request_rejects_garbage() {
        assert_eq!(
            decode_request(b"\n"),
            Err(ProtocolError::MalformedRequest("empty request"))
        );
        assert!(decode_request(&[0xff, 0xfe, b'\n']).is_err());
        assert!(decode_request(b"a\0b").is_err());

        let long = vec![b'a'; MAX_REQUEST_LEN + 1];
        assert!(matches!(
            decode_request(&long),
            Err(ProtocolError::RequestTooLong { .. })
        ));
    }

    #[test]
    fn error_line_roundtrip() {
        let line = encode_error(NOT_FOUND_REASON);
        assert_eq!(line, b"ERROR: File not found or access denied.\n");
        assert!(is_error(&line));
        assert_eq!(error_reason(&line), NOT_FOUND_REASON);
        assert!(!is_error(b"hello"));
        assert!(!is_error(b"ERR"));
    }

    #[test]
    fn chunk_counts() {
        assert_eq!(chunk_count(0, DEFAULT_CHUNK_SIZE), 0);
        assert_eq!(chunk_count(1, DEFAULT_CHUNK_SIZE), 1);
        assert_eq!(chunk_count(60_000, DEFAULT_CHUNK_SIZE), 1);
        assert_eq!(chunk_count(60_001, DEFAULT_CHUNK_SIZE), 2);
        // 5 MB file with the default 60 KB cap
        assert_eq!(chunk_count(5_000_000, DEFAULT_CHUNK_SIZE), 84);
    }

    #[test]
    fn chunk_size_bounds() {
        assert!(validate_chunk_size(0).is_err());
        assert!(validate_chunk_size(MAX_CHUNK_SIZE + 1).is_err());
        assert_eq!(validate_chunk_size(MAX_CHUNK_SIZE), Ok(MAX_CHUNK_SIZE));
        assert_eq!(validate_chunk_size(DEFAULT_CHUNK_SIZE), Ok(DEFAULT_CHUNK_SIZE));
    }

    #[test]
    fn frame_header_layout() {
        let mut buf = vec![0u8; SEQ_HEADER + 3];
        let n = encode_frame(&mut buf, 2, 5, b"abc");
        assert_eq!(n, SEQ_HEADER + 3);
        assert_eq!(&buf[0..8], &[0, 0, 0, 2, 0, 0, 0, 5]);

        let header = decode_frame_header(&buf[..n]).unwrap();
        assert_eq!(
            header,
            FrameHeader {
                chunk_index: 2,
                chunk_count: 5
            }
        );
        assert_eq!(frame_payload(&buf[..n]), Some(&b"abc"[..]));
    }

    #[test]
    fn frame_header_rejects_bad_frames() {
        assert!(decode_frame_header(&[0, 0, 0]).is_none());
        // index == count
        assert!(decode_frame_header(&[0, 0, 0, 5, 0, 0, 0, 5]).is_none());
    }

    #[test]
    fn frame_payload_of_short_frame_is_none() {
        assert_eq!(frame_payload(&[0, 0, 1]), None);
        assert_eq!(frame_payload(&[0, 0, 0, 0, 0, 0, 0, 1]), Some(&[][..]));
    }

    #[test]
    fn framing_parses_case_insensitively() {
        assert_eq!("RAW".parse::<DatagramFraming>(), Ok(DatagramFraming::Raw));
        assert_eq!(
            " Sequenced ".parse::<DatagramFraming>(),
            Ok(DatagramFraming::Sequenced)
        );
        assert!("tcp".parse::<DatagramFraming>().is_err());
    }
}
