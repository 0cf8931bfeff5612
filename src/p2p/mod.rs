//! P2P networking - wire messages, peer sessions and the TCP transport

mod connection;
mod peer;
mod protocol;

pub use connection::*;
pub use peer::*;
pub use protocol::*;
