//! # Core Protocol Components
//!
//! Fixed-width packet layouts, the packet registry, and the frame codec.
//!
//! ## Components
//! - **Wire**: NUL-padded strings, little-endian integers, bool bytes
//! - **Packet**: typed payloads and the `Packet` tagged union
//! - **Registry**: packet type → payload size + encode/decode pair
//! - **Codec**: Tokio codec slicing frames out of a byte stream
//!
//! ## Wire Format
//! ```text
//! [Type(2, LE)] [Payload(N)]     N fixed per type, looked up in the registry
//! ```
//!
//! ## Robustness
//! - Frames are sliced independently of how the transport chunks bytes
//! - Unknown types drop only their 2-byte header
//! - Receive buffer is capped per connection

pub mod codec;
pub mod packet;
pub mod registry;
pub mod wire;
