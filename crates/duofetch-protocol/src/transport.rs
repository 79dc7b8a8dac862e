use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Transport chosen once for a whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Udp,
}

impl FromStr for Transport {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let choice = s.trim();
        if choice.eq_ignore_ascii_case("tcp") {
            Ok(Self::Tcp)
        } else if choice.eq_ignore_ascii_case("udp") {
            Ok(Self::Udp)
        } else {
            Err(ProtocolError::UnknownTransport(choice.to_string()))
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("TCP"),
            Self::Udp => f.write_str("UDP"),
        }
    }
}
