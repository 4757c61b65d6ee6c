//! # TCP Server
//!
//! Public face of the protocol server: configure the packet registry and
//! listeners on a [`TcpServer`], call [`TcpServer::listen`], then drive
//! the returned [`ListeningServer`].
//!
//! ```no_run
//! use font_agent_protocol::{AuthResponse, NetworkConfig, TcpServer};
//!
//! # async fn demo() -> font_agent_protocol::Result<()> {
//! let mut server = TcpServer::new(NetworkConfig::default());
//! server.on_auth_request(|conn, req| {
//!     tracing::info!(name = %req.client_name, "agent says hello");
//!     conn.send(&AuthResponse::accepted("welcome").into())
//! });
//! server.listen().await?.run().await
//! # }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{NetworkConfig, ProtocolConfig, ServerConfig};
use crate::core::codec::FrameCodec;
use crate::core::packet::{AuthRequest, FontInstallResponse, Packet, PacketType};
use crate::core::registry::{PacketDescriptor, PacketRegistry};
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::EventBus;
use crate::transport::clients::ClientRegistry;
use crate::transport::session::{serve_connection, ConnectionHandle, SessionContext};
use crate::utils::metrics::Metrics;

/// Server under construction. Packet types and listeners are added here;
/// both are frozen once [`listen`](Self::listen) is called.
#[derive(Debug)]
pub struct TcpServer {
    config: NetworkConfig,
    registry: PacketRegistry,
    events: EventBus,
}

impl TcpServer {
    /// Server with the four standard packet types registered
    pub fn new(config: NetworkConfig) -> Self {
        Self::with_registry(config, PacketRegistry::standard())
    }

    pub fn with_registry(config: NetworkConfig, registry: PacketRegistry) -> Self {
        Self {
            config,
            registry,
            events: EventBus::new(),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn registry(&self) -> &PacketRegistry {
        &self.registry
    }

    /// Add a packet type. Fails if the type is already known.
    pub fn register(&mut self, descriptor: PacketDescriptor) -> Result<()> {
        self.registry.register(descriptor)
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn on_packet<F>(&mut self, packet_type: PacketType, listener: F) -> &mut Self
    where
        F: Fn(&ConnectionHandle, &Packet) -> Result<()> + Send + Sync + 'static,
    {
        self.events.on_packet(packet_type, listener);
        self
    }

    pub fn on_auth_request<F>(&mut self, listener: F) -> &mut Self
    where
        F: Fn(&ConnectionHandle, &AuthRequest) -> Result<()> + Send + Sync + 'static,
    {
        self.events.on_auth_request(listener);
        self
    }

    pub fn on_font_install_response<F>(&mut self, listener: F) -> &mut Self
    where
        F: Fn(&ConnectionHandle, &FontInstallResponse) -> Result<()> + Send + Sync + 'static,
    {
        self.events.on_font_install_response(listener);
        self
    }

    pub fn on_connect<F>(&mut self, listener: F) -> &mut Self
    where
        F: Fn(&ConnectionHandle) -> Result<()> + Send + Sync + 'static,
    {
        self.events.on_connect(listener);
        self
    }

    pub fn on_disconnect<F>(&mut self, listener: F) -> &mut Self
    where
        F: Fn(&ConnectionHandle) -> Result<()> + Send + Sync + 'static,
    {
        self.events.on_disconnect(listener);
        self
    }

    pub fn on_error<F>(&mut self, listener: F) -> &mut Self
    where
        F: Fn(&ConnectionHandle, &ProtocolError) -> Result<()> + Send + Sync + 'static,
    {
        self.events.on_error(listener);
        self
    }

    /// Bind the configured address. Port 0 picks a free port; see
    /// [`ListeningServer::local_addr`].
    #[instrument(skip(self), fields(address = %self.config.server.address))]
    pub async fn listen(self) -> Result<ListeningServer> {
        let listener = TcpListener::bind(&self.config.server.address).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, packet_types = self.registry.len(), "Listening");

        let ctx = Arc::new(SessionContext::new(
            Arc::new(self.registry),
            Arc::new(self.events),
            self.config.protocol.max_buffer_size,
        ));

        Ok(ListeningServer {
            listener,
            ctx,
            config: self.config.server,
            local_addr,
        })
    }
}

/// A bound server that has not started accepting yet.
#[derive(Debug)]
pub struct ListeningServer {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    config: ServerConfig,
    local_addr: SocketAddr,
}

impl ListeningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            ctx: self.ctx.clone(),
            local_addr: self.local_addr,
        }
    }

    /// Accept until CTRL+C or [`ServerHandle::shutdown`].
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received CTRL+C signal, shutting down"),
                Err(e) => {
                    error!(error = %e, "Unable to listen for CTRL+C");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
    }

    /// Accept until `shutdown` resolves or [`ServerHandle::shutdown`] is
    /// called, then close every connection and wait up to the configured
    /// shutdown timeout for sessions to finish.
    #[instrument(skip_all, fields(address = %self.local_addr))]
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let ListeningServer {
            listener,
            ctx,
            config,
            ..
        } = self;
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = ctx.shutdown.cancelled() => {
                    info!("Shutdown requested through handle");
                    break;
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Session task failed");
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if sessions.len() >= config.max_connections {
                            warn!(peer = %peer, limit = config.max_connections, "Connection limit reached, dropping connection");
                            ctx.metrics.connection_rejected();
                            continue;
                        }
                        if config.nodelay {
                            if let Err(e) = stream.set_nodelay(true) {
                                debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                            }
                        }
                        sessions.spawn(serve_connection(ctx.clone(), stream, peer));
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                        ctx.metrics.transport_error();
                    }
                },
            }
        }

        drop(listener);
        ctx.shutdown.cancel();
        info!(
            connections = ctx.clients.len(),
            "Waiting for connections to close"
        );

        let drained = tokio::time::timeout(config.shutdown_timeout, async {
            while let Some(joined) = sessions.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Session task failed");
                }
            }
        })
        .await;

        match drained {
            Ok(()) => info!("All connections closed, shutting down"),
            Err(_) => {
                warn!(remaining = sessions.len(), "Shutdown timeout reached, aborting sessions");
                sessions.abort_all();
            }
        }

        ctx.metrics.log_metrics();
        Ok(())
    }
}

/// Cloneable access to a running server
#[derive(Debug, Clone)]
pub struct ServerHandle {
    ctx: Arc<SessionContext>,
    local_addr: SocketAddr,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue `packet` for `conn`
    pub fn send(&self, conn: &ConnectionHandle, packet: &Packet) -> Result<()> {
        conn.send(packet)
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.ctx.clients
    }

    pub fn lookup(&self, addr: &SocketAddr) -> Option<ConnectionHandle> {
        self.ctx.clients.get(addr)
    }

    pub fn registry(&self) -> &Arc<PacketRegistry> {
        &self.ctx.registry
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.ctx.metrics
    }

    /// Serve an already established stream as if it had been accepted
    /// from `peer`.
    pub fn attach<S>(&self, stream: S, peer: SocketAddr) -> JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        tokio::spawn(serve_connection(self.ctx.clone(), stream, peer))
    }

    /// Stop accepting and close every connection
    pub fn shutdown(&self) {
        self.ctx.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.ctx.shutdown.is_cancelled()
    }
}

/// Open a framed client connection to a server.
pub async fn connect(
    addr: SocketAddr,
    registry: Arc<PacketRegistry>,
    config: &ProtocolConfig,
) -> Result<Framed<TcpStream, FrameCodec>> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(ProtocolError::Transport)?;
    stream.set_nodelay(true)?;
    let codec = FrameCodec::new(registry).with_max_buffer_size(config.max_buffer_size);
    Ok(Framed::new(stream, codec))
}
