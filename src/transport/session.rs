//! # Connection Session
//!
//! One task per accepted stream. The read half is framed with
//! [`FrameCodec`]; each complete frame is decoded through the registry,
//! sanitized and handed to the event bus. The write half is owned by a
//! writer task fed through the connection's [`FrameSink`].
//!
//! ## Lifecycle
//! 1. Register in the [`ClientRegistry`] (duplicates are closed at once)
//! 2. Emit `connect`
//! 3. Dispatch frames until EOF, a transport error, or a local close
//! 4. Flush frames already queued and shut down the write half
//! 5. Emit `disconnect` once, then drop the registry entry

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::core::codec::{FrameCodec, RawFrame};
use crate::core::packet::Packet;
use crate::core::registry::PacketRegistry;
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::EventBus;
use crate::transport::clients::ClientRegistry;
use crate::transport::sink::{write_frames, ChannelSink, FrameSink};
use crate::utils::metrics::Metrics;

struct ConnectionInner {
    id: u64,
    peer: SocketAddr,
    registry: Arc<PacketRegistry>,
    sink: Arc<dyn FrameSink>,
    cancel: CancellationToken,
    connected_at: Instant,
}

/// Reference to one live connection, handed to every listener.
///
/// Clones share the same connection. Two handles are equal when they
/// refer to the same connection id.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnectionInner>,
}

impl ConnectionHandle {
    /// Build a handle over an arbitrary sink.
    pub fn new(
        id: u64,
        peer: SocketAddr,
        registry: Arc<PacketRegistry>,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        Self::with_cancel(id, peer, registry, sink, CancellationToken::new())
    }

    pub(crate) fn with_cancel(
        id: u64,
        peer: SocketAddr,
        registry: Arc<PacketRegistry>,
        sink: Arc<dyn FrameSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                peer,
                registry,
                sink,
                cancel,
                connected_at: Instant::now(),
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn registry(&self) -> &Arc<PacketRegistry> {
        &self.inner.registry
    }

    /// Time since the session started
    pub fn age(&self) -> Duration {
        self.inner.connected_at.elapsed()
    }

    /// Encode `packet` and queue it for this connection.
    ///
    /// Encoding errors (unregistered type, over-long field) are returned
    /// before anything is queued. Delivery itself is not confirmed.
    pub fn send(&self, packet: &Packet) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(ProtocolError::ConnectionClosed);
        }
        let frame = self.inner.registry.encode_frame(packet)?;
        self.inner.sink.send_frame(frame)
    }

    /// Stop the session. Frames already queued are written out before the
    /// socket closes; later sends fail with `ConnectionClosed`.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_connected(&self) -> bool {
        !self.inner.cancel.is_cancelled()
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ConnectionHandle {}

/// State shared by every session of one server
pub(crate) struct SessionContext {
    pub(crate) registry: Arc<PacketRegistry>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) clients: ClientRegistry,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) max_buffer_size: usize,
    pub(crate) shutdown: CancellationToken,
    next_id: AtomicU64,
}

impl SessionContext {
    pub(crate) fn new(
        registry: Arc<PacketRegistry>,
        events: Arc<EventBus>,
        max_buffer_size: usize,
    ) -> Self {
        Self {
            registry,
            events,
            clients: ClientRegistry::new(),
            metrics: Arc::new(Metrics::new()),
            max_buffer_size,
            shutdown: CancellationToken::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("clients", &self.clients.len())
            .field("max_buffer_size", &self.max_buffer_size)
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish()
    }
}

fn report_listener_result(ctx: &SessionContext, event: &str, result: Result<()>) {
    if let Err(e) = result {
        error!(event, error = %e, "Listener failed");
        ctx.metrics.listener_error();
    }
}

fn handle_frame(ctx: &SessionContext, conn: &ConnectionHandle, frame: RawFrame) {
    ctx.metrics.frame_received(frame.wire_len() as u64);

    let packet = match ctx.registry.decode(frame.packet_type, &frame.payload) {
        Ok(packet) => packet,
        Err(e) => {
            warn!(packet_type = frame.packet_type, error = %e, "Dropping undecodable frame");
            ctx.metrics.malformed_frame();
            return;
        }
    };

    ctx.metrics.packet_dispatched();
    let event = packet.packet_type().name();
    report_listener_result(ctx, event, ctx.events.dispatch_packet(conn, packet));
}

/// Run one connection to completion.
#[instrument(skip_all, fields(peer = %peer))]
pub(crate) async fn serve_connection<S>(ctx: Arc<SessionContext>, stream: S, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (sink, rx) = ChannelSink::channel();
    let conn = ConnectionHandle::with_cancel(
        ctx.next_id(),
        peer,
        ctx.registry.clone(),
        Arc::new(sink),
        ctx.shutdown.child_token(),
    );

    if let Err(e) = ctx.clients.insert(conn.clone()) {
        warn!(error = %e, "Rejecting connection");
        ctx.metrics.connection_rejected();
        return;
    }
    ctx.metrics.connection_established();
    info!(conn_id = conn.id(), "Connection established");

    let (reader, writer) = tokio::io::split(stream);
    let writer_task = tokio::spawn(write_frames(
        writer,
        rx,
        conn.cancel_token(),
        ctx.metrics.clone(),
    ));

    report_listener_result(&ctx, "connect", ctx.events.emit_connect(&conn));

    let codec = FrameCodec::new(ctx.registry.clone()).with_max_buffer_size(ctx.max_buffer_size);
    let mut frames = FramedRead::new(reader, codec);
    let cancel = conn.cancel_token();
    let mut skipped = 0u64;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Connection closed locally");
                break;
            }
            next = frames.next() => next,
        };

        let skipped_now = frames.decoder().skipped_headers();
        if skipped_now > skipped {
            ctx.metrics.unknown_types_skipped(skipped_now - skipped);
            skipped = skipped_now;
        }

        match next {
            Some(Ok(frame)) => handle_frame(&ctx, &conn, frame),
            Some(Err(e)) => {
                let err = match e {
                    ProtocolError::Io(io) => ProtocolError::Transport(io),
                    other => other,
                };
                ctx.metrics.transport_error();
                if err.is_connection_reset() {
                    debug!("Connection reset by peer");
                } else {
                    warn!(error = %err, "Connection failed");
                }
                report_listener_result(&ctx, "error", ctx.events.emit_error(&conn, &err));
                break;
            }
            None => {
                debug!("Peer closed connection");
                break;
            }
        }
    }

    conn.close();
    if let Err(e) = writer_task.await {
        debug!(error = %e, "Writer task ended abnormally");
    }

    report_listener_result(&ctx, "disconnect", ctx.events.emit_disconnect(&conn));
    ctx.clients.remove(peer, conn.id());
    ctx.metrics.connection_closed();
    info!(
        conn_id = conn.id(),
        duration_ms = conn.age().as_millis() as u64,
        "Connection closed"
    );
}
