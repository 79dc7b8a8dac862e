//! duofetch file server.
//!
//! Serves files under one root directory over two transports at once:
//! a TCP listener (one request per connection, close marks end of file) and a
//! UDP socket (one request datagram, file blasted back in fixed-size chunks).
//! Both transports share the same [`PathResolver`].

pub mod config;
pub mod datagram;
pub mod resolver;
pub mod service;
pub mod stream;

pub use config::ServerConfig;
pub use datagram::{DatagramEngine, DatagramSettings};
pub use resolver::{PathResolver, ResolveError, RootError};
pub use service::{FileServer, RunningServer};
pub use stream::StreamEngine;
