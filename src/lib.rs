//! # Font Agent Protocol
//!
//! TCP protocol engine for talking to desktop font agents.
//!
//! Agents connect over plain TCP and exchange fixed-size frames:
//! a 2-byte little-endian packet type followed by a payload whose size is
//! fixed per type. String fields are NUL-padded UTF-8, integers are
//! little-endian, and booleans are a single 0/1 byte.
//!
//! ## Packets
//! | Type | Packet              | Payload |
//! |------|---------------------|---------|
//! | 0    | AuthRequest         | 100     |
//! | 1    | AuthResponse        | 257     |
//! | 2    | FontInstallRequest  | 161     |
//! | 3    | FontInstallResponse | 257     |
//!
//! ## Layers
//! - [`core`]: wire fields, packet layouts, the registry and the frame codec
//! - [`protocol`]: sanitizing decoded packets and dispatching them to listeners
//! - [`transport`]: the TCP server, sessions, and the live client table
//! - [`service`]: agent authentication and font commands
//! - [`utils`]: logging and metrics
//!
//! ## Example
//! ```no_run
//! use font_agent_protocol::{init_logging, AcceptAll, AgentServer, NetworkConfig, TcpServer};
//!
//! #[tokio::main]
//! async fn main() -> font_agent_protocol::Result<()> {
//!     let config = NetworkConfig::from_env()?;
//!     init_logging(&config.logging)?;
//!
//!     let mut server = TcpServer::new(config);
//!     let agents = AgentServer::attach(&mut server, AcceptAll);
//!     let listening = server.listen().await?;
//!     tracing::info!(agents = agents.directory().len(), "ready");
//!     listening.run().await
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::config::{LoggingConfig, NetworkConfig, ProtocolConfig, ServerConfig};
pub use crate::core::codec::{FrameCodec, RawFrame, DEFAULT_MAX_BUFFER_SIZE};
pub use crate::core::packet::{
    AuthRequest, AuthResponse, FixedPayload, FontInstallRequest, FontInstallResponse, Packet,
    PacketType,
};
pub use crate::core::registry::{PacketDescriptor, PacketRegistry};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::dispatcher::{EventBus, EventKey};
pub use crate::protocol::sanitize::Sanitize;
pub use crate::service::agent::{
    AcceptAll, AgentDirectory, AgentServer, Authenticator, FontSpec, HwidAllowList,
};
pub use crate::transport::clients::ClientRegistry;
pub use crate::transport::session::ConnectionHandle;
pub use crate::transport::sink::{ChannelSink, FrameSink, MemorySink};
pub use crate::transport::tcp::{connect, ListeningServer, ServerHandle, TcpServer};
pub use crate::utils::logging::init_logging;
pub use crate::utils::metrics::{Metrics, MetricsSnapshot};
