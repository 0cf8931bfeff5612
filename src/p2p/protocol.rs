//! P2P protocol messages
//!
//! Messages are JSON objects tagged by `type`, one per line, sent in
//! canonical form.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::consensus::Object;
use crate::constants::PROTOCOL_VERSION_PREFIX;
use crate::crypto::{canonicalize, CanonicalError, Hash};

/// Maximum message size (4 MB)
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Protocol errors; all of them end the connection
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Failed to parse incoming message as JSON: {0}")]
    Malformed(String),
    #[error("The received message does not match one of the known message formats: {0}")]
    InvalidMessage(String),
    #[error("Received an object that violates the object format: {0}")]
    InvalidObject(String),
    #[error("Received message {0} prior to \"hello\"")]
    HandshakeMissing(&'static str),
    #[error("Received a second \"hello\" message, even though handshake is completed")]
    DuplicateHello,
    #[error("Incompatible protocol version {0}")]
    IncompatibleVersion(String),
    #[error("Message exceeds {MAX_MESSAGE_SIZE} bytes")]
    MessageTooLarge,
    #[error("Connection error: {0}")]
    Io(#[from] std::io::Error),
}

/// P2P message types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum Message {
    /// Version handshake
    Hello { version: String, agent: String },
    /// Request peer addresses
    GetPeers,
    /// Share peer addresses
    Peers { peers: Vec<String> },
    /// Announce an object
    IHaveObject { objectid: Hash },
    /// Request an object
    GetObject { objectid: Hash },
    /// Object data
    Object { object: Object },
    GetChainTip,
    ChainTip { blockid: Hash },
    GetMempool,
    Mempool { txids: Vec<Hash> },
    /// Report a problem to the remote party
    Error { error: String },
}

impl Message {
    /// Parse one line received from a peer, object format rules included
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge);
        }
        let value: Value =
            serde_json::from_str(line).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let message: Message = serde_json::from_value(value)
            .map_err(|e| ProtocolError::InvalidMessage(e.to_string()))?;
        if let Message::Object { object } = &message {
            object.check_format().map_err(ProtocolError::InvalidObject)?;
        }
        Ok(message)
    }

    /// Canonical JSON line, without the trailing newline
    pub fn to_line(&self) -> Result<String, CanonicalError> {
        canonicalize(self)
    }

    /// Get the type tag of this message
    pub fn command(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "hello",
            Message::GetPeers => "getpeers",
            Message::Peers { .. } => "peers",
            Message::IHaveObject { .. } => "ihaveobject",
            Message::GetObject { .. } => "getobject",
            Message::Object { .. } => "object",
            Message::GetChainTip => "getchaintip",
            Message::ChainTip { .. } => "chaintip",
            Message::GetMempool => "getmempool",
            Message::Mempool { .. } => "mempool",
            Message::Error { .. } => "error",
        }
    }

    pub fn hello(agent: &str) -> Self {
        Message::Hello {
            version: crate::constants::PROTOCOL_VERSION.to_string(),
            agent: agent.to_string(),
        }
    }

    pub fn error(error: impl ToString) -> Self {
        Message::Error {
            error: error.to_string(),
        }
    }
}

/// Check a `hello` version against ours (same minor series)
pub fn is_compatible_version(version: &str) -> bool {
    version
        .strip_prefix(PROTOCOL_VERSION_PREFIX)
        .map(|patch| !patch.is_empty() && patch.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_messages_roundtrip() {
        for (line, message) in [
            (r#"{"type":"getpeers"}"#, Message::GetPeers),
            (r#"{"type":"getchaintip"}"#, Message::GetChainTip),
            (r#"{"type":"getmempool"}"#, Message::GetMempool),
        ] {
            assert_eq!(Message::parse(line).unwrap(), message);
            assert_eq!(message.to_line().unwrap(), line);
        }
    }

    #[test]
    fn test_hello_serialization_is_canonical() {
        let line = Message::hello("tidal").to_line().unwrap();
        assert_eq!(line, r#"{"agent":"tidal","type":"hello","version":"0.8.0"}"#);
        assert!(matches!(Message::parse(&line).unwrap(), Message::Hello { .. }));
    }

    #[test]
    fn test_malformed_and_unknown_messages() {
        assert!(matches!(Message::parse("{not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(
            Message::parse(r#"{"type":"gossip"}"#),
            Err(ProtocolError::InvalidMessage(_))
        ));
        assert!(matches!(
            Message::parse(r#"{"type":"getobject","objectid":"xyz"}"#),
            Err(ProtocolError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_object_format_enforced() {
        let line = r#"{"type":"object","object":{"type":"transaction","height":1,"inputs":[],"outputs":[]}}"#;
        assert!(matches!(Message::parse(line), Err(ProtocolError::InvalidObject(_))));
    }

    #[test]
    fn test_version_compatibility() {
        assert!(is_compatible_version("0.8.0"));
        assert!(is_compatible_version("0.8.12"));
        assert!(!is_compatible_version("0.9.0"));
        assert!(!is_compatible_version("0.8"));
        assert!(!is_compatible_version("0.8.x"));
    }
}
