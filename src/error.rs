//! # Error Types
//!
//! Error handling for the font agent protocol engine.
//!
//! Every failure in the engine is scoped to a single frame or a single
//! connection; nothing here is fatal to the whole server.
//!
//! ## Error Categories
//! - **Registry Errors**: unknown or duplicate packet types
//! - **Frame Errors**: malformed payloads, over-length fields, buffer overflow
//! - **Transport Errors**: socket failures, duplicate connections, closed peers
//! - **Service Errors**: unknown agents, invalid configuration
//!
//! ## Example Usage
//! ```rust
//! use font_agent_protocol::core::registry::PacketRegistry;
//! use font_agent_protocol::error::ProtocolError;
//!
//! let registry = PacketRegistry::standard();
//! match registry.decode(42, &[0u8; 4]) {
//!     Err(ProtocolError::UnknownPacketType(42)) => {}
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Lock errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";

    /// Frame validation errors
    pub const ERR_PAYLOAD_LENGTH: &str = "Payload length does not match descriptor size";
    pub const ERR_INVALID_BOOL: &str = "Boolean field must be 0 or 1";
    pub const ERR_INVALID_UTF8: &str = "String field is not valid UTF-8";
    pub const ERR_VARIANT_MISMATCH: &str = "Packet variant does not match descriptor type";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_WRITER_GONE: &str = "Connection writer has shut down";
}

/// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Unknown packet type: {0}")]
    UnknownPacketType(u16),

    #[error("Packet type {0} is already registered")]
    DuplicatePacketType(u16),

    #[error("Malformed frame (type {packet_type}): {reason}")]
    MalformedFrame {
        packet_type: u16,
        reason: String,
    },

    #[error("Field '{field}' is {len} bytes, exceeds width {width}")]
    FieldOverflow {
        field: &'static str,
        width: usize,
        len: usize,
    },

    #[error("Receive buffer holds {size} bytes, limit is {limit}")]
    BufferOverflow { size: usize, limit: usize },

    #[error("Transport error: {0}")]
    Transport(io::Error),

    #[error("Duplicate connection from {0}")]
    DuplicateConnection(SocketAddr),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Client not found: {0}")]
    ClientNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Build a [`ProtocolError::MalformedFrame`] for the given packet type
    pub fn malformed(packet_type: u16, reason: impl Into<String>) -> Self {
        ProtocolError::MalformedFrame {
            packet_type,
            reason: reason.into(),
        }
    }

    /// Whether this error is a peer reset, which agents trigger routinely
    /// when the desktop client is killed or the machine sleeps.
    pub fn is_connection_reset(&self) -> bool {
        match self {
            ProtocolError::Io(e) | ProtocolError::Transport(e) => {
                e.kind() == io::ErrorKind::ConnectionReset
            }
            _ => false,
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
