use std::collections::HashMap;
use std::fmt;

use crate::core::packet::{
    AuthRequest, AuthResponse, FontInstallRequest, FontInstallResponse, Packet, PacketType,
};
use crate::error::{ProtocolError, Result};
use crate::protocol::sanitize::Sanitize;
use crate::transport::session::ConnectionHandle;

type ConnectionListener = dyn Fn(&ConnectionHandle) -> Result<()> + Send + Sync + 'static;
type ErrorListener = dyn Fn(&ConnectionHandle, &ProtocolError) -> Result<()> + Send + Sync + 'static;
type PacketListener = dyn Fn(&ConnectionHandle, &Packet) -> Result<()> + Send + Sync + 'static;

/// What a listener is registered for: a packet type or a connection event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKey {
    Packet(PacketType),
    Connect,
    Disconnect,
    Error,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKey::Packet(ty) => write!(f, "packet:{ty}"),
            EventKey::Connect => f.write_str("connect"),
            EventKey::Disconnect => f.write_str("disconnect"),
            EventKey::Error => f.write_str("error"),
        }
    }
}

/// Per-server listener table.
///
/// Listeners are appended during setup and the bus is frozen behind an
/// `Arc` once the server starts listening. Emission is synchronous and
/// follows registration order; the first listener error stops the chain
/// and is returned to the caller.
#[derive(Default)]
pub struct EventBus {
    packet: HashMap<PacketType, Vec<Box<PacketListener>>>,
    connect: Vec<Box<ConnectionListener>>,
    disconnect: Vec<Box<ConnectionListener>>,
    error: Vec<Box<ErrorListener>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let packet: HashMap<_, _> = self.packet.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventBus")
            .field("packet", &packet)
            .field("connect", &self.connect.len())
            .field("disconnect", &self.disconnect.len())
            .field("error", &self.error.len())
            .finish()
    }
}

/// Typed registration helpers that filter on the packet variant.
macro_rules! typed_listener {
    ($(#[$doc:meta])* $method:ident, $variant:ident) => {
        $(#[$doc])*
        pub fn $method<F>(&mut self, listener: F) -> &mut Self
        where
            F: Fn(&ConnectionHandle, &$variant) -> Result<()> + Send + Sync + 'static,
        {
            self.on_packet(PacketType::$variant, move |conn, packet| match packet {
                Packet::$variant(inner) => listener(conn, inner),
                _ => Ok(()),
            })
        }
    };
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_packet<F>(&mut self, packet_type: PacketType, listener: F) -> &mut Self
    where
        F: Fn(&ConnectionHandle, &Packet) -> Result<()> + Send + Sync + 'static,
    {
        self.packet
            .entry(packet_type)
            .or_default()
            .push(Box::new(listener));
        self
    }

    typed_listener!(on_auth_request, AuthRequest);
    typed_listener!(on_auth_response, AuthResponse);
    typed_listener!(
        /// Install and uninstall requests share this type; check `install`.
        on_font_install,
        FontInstallRequest
    );
    typed_listener!(on_font_install_response, FontInstallResponse);

    pub fn on_connect<F>(&mut self, listener: F) -> &mut Self
    where
        F: Fn(&ConnectionHandle) -> Result<()> + Send + Sync + 'static,
    {
        self.connect.push(Box::new(listener));
        self
    }

    pub fn on_disconnect<F>(&mut self, listener: F) -> &mut Self
    where
        F: Fn(&ConnectionHandle) -> Result<()> + Send + Sync + 'static,
    {
        self.disconnect.push(Box::new(listener));
        self
    }

    pub fn on_error<F>(&mut self, listener: F) -> &mut Self
    where
        F: Fn(&ConnectionHandle, &ProtocolError) -> Result<()> + Send + Sync + 'static,
    {
        self.error.push(Box::new(listener));
        self
    }

    pub fn listener_count(&self, key: EventKey) -> usize {
        match key {
            EventKey::Packet(ty) => self.packet.get(&ty).map_or(0, Vec::len),
            EventKey::Connect => self.connect.len(),
            EventKey::Disconnect => self.disconnect.len(),
            EventKey::Error => self.error.len(),
        }
    }

    /// Sanitize a freshly decoded packet and hand it to its listeners.
    pub fn dispatch_packet(&self, conn: &ConnectionHandle, mut packet: Packet) -> Result<()> {
        packet.sanitize();
        self.emit_packet(conn, &packet)
    }

    /// Invoke the listeners for `packet` as-is. Listeners are selected by
    /// the packet's variant, not by the type id it arrived under.
    pub fn emit_packet(&self, conn: &ConnectionHandle, packet: &Packet) -> Result<()> {
        if let Some(listeners) = self.packet.get(&packet.packet_type()) {
            for listener in listeners {
                listener(conn, packet)?;
            }
        }
        Ok(())
    }

    pub fn emit_connect(&self, conn: &ConnectionHandle) -> Result<()> {
        self.connect.iter().try_for_each(|listener| listener(conn))
    }

    pub fn emit_disconnect(&self, conn: &ConnectionHandle) -> Result<()> {
        self.disconnect.iter().try_for_each(|listener| listener(conn))
    }

    pub fn emit_error(&self, conn: &ConnectionHandle, error: &ProtocolError) -> Result<()> {
        self.error.iter().try_for_each(|listener| listener(conn, error))
    }
}
