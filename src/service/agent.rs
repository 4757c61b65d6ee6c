//! # Agent Service
//!
//! Business layer on top of the protocol server: authenticates agents,
//! remembers which connection belongs to which hardware id, and pushes
//! font install/uninstall commands to them.
//!
//! The hardware id (HWID) is the durable key. When an agent
//! re-authenticates from a new connection, the newer connection replaces
//! the older one in the directory.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::core::packet::{AuthRequest, AuthResponse, FontInstallRequest, FontInstallResponse, Packet};
use crate::error::{ProtocolError, Result};
use crate::transport::session::ConnectionHandle;
use crate::transport::tcp::TcpServer;

pub const AUTH_SUCCESS_MESSAGE: &str = "Authentication successful";
pub const AUTH_FAILURE_MESSAGE: &str = "Authentication failed";

/// Decides whether an agent may connect.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, request: &AuthRequest, conn: &ConnectionHandle) -> AuthResponse;
}

/// Accepts every agent that presents a hardware id.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Authenticator for AcceptAll {
    fn authenticate(&self, request: &AuthRequest, _conn: &ConnectionHandle) -> AuthResponse {
        if request.client_hwid.is_empty() {
            AuthResponse::rejected(AUTH_FAILURE_MESSAGE)
        } else {
            AuthResponse::accepted(AUTH_SUCCESS_MESSAGE)
        }
    }
}

/// Accepts only hardware ids from a fixed list.
#[derive(Debug, Clone, Default)]
pub struct HwidAllowList {
    allowed: HashSet<String>,
}

impl HwidAllowList {
    pub fn new<I, S>(hwids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: hwids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allow(&mut self, hwid: impl Into<String>) {
        self.allowed.insert(hwid.into());
    }

    pub fn is_allowed(&self, hwid: &str) -> bool {
        !hwid.is_empty() && self.allowed.contains(hwid)
    }
}

impl Authenticator for HwidAllowList {
    fn authenticate(&self, request: &AuthRequest, _conn: &ConnectionHandle) -> AuthResponse {
        if self.is_allowed(&request.client_hwid) {
            AuthResponse::accepted(AUTH_SUCCESS_MESSAGE)
        } else {
            AuthResponse::rejected(AUTH_FAILURE_MESSAGE)
        }
    }
}

/// An authenticated agent and the connection it is reachable on.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub hwid: String,
    pub name: String,
    pub version: u32,
    pub connection: ConnectionHandle,
    pub authenticated_at: SystemTime,
    pub last_install_report: Option<FontInstallResponse>,
}

/// [`AgentRecord`] without the connection, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSummary {
    pub hwid: String,
    pub name: String,
    pub version: u32,
    pub peer: SocketAddr,
    pub connected: bool,
    pub authenticated_at: SystemTime,
}

impl From<&AgentRecord> for AgentSummary {
    fn from(record: &AgentRecord) -> Self {
        Self {
            hwid: record.hwid.clone(),
            name: record.name.clone(),
            version: record.version,
            peer: record.connection.peer_addr(),
            connected: record.connection.is_connected(),
            authenticated_at: record.authenticated_at,
        }
    }
}

/// Authenticated agents keyed by hardware id.
#[derive(Debug, Clone, Default)]
pub struct AgentDirectory {
    agents: Arc<RwLock<HashMap<String, AgentRecord>>>,
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the agent behind `conn`, replacing any earlier record for the
    /// same hardware id. Returns the replaced record.
    pub fn record(&self, request: &AuthRequest, conn: ConnectionHandle) -> Option<AgentRecord> {
        let record = AgentRecord {
            hwid: request.client_hwid.clone(),
            name: request.client_name.clone(),
            version: request.version,
            connection: conn,
            authenticated_at: SystemTime::now(),
            last_install_report: None,
        };
        self.agents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.hwid.clone(), record)
    }

    pub fn lookup(&self, hwid: &str) -> Option<AgentRecord> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hwid)
            .cloned()
    }

    pub fn by_connection(&self, id: u64) -> Option<AgentRecord> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|r| r.connection.id() == id)
            .cloned()
    }

    /// Drop the record owned by connection `id`, if any. A record that has
    /// since moved to a newer connection is left alone.
    pub fn remove_connection(&self, id: u64) -> Option<AgentRecord> {
        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        let hwid = agents
            .iter()
            .find(|(_, r)| r.connection.id() == id)
            .map(|(hwid, _)| hwid.clone())?;
        agents.remove(&hwid)
    }

    fn note_install_report(&self, id: u64, report: &FontInstallResponse) -> Option<String> {
        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        let record = agents.values_mut().find(|r| r.connection.id() == id)?;
        record.last_install_report = Some(report.clone());
        Some(record.hwid.clone())
    }

    /// Snapshot of every agent, ordered by hardware id
    pub fn list(&self) -> Vec<AgentSummary> {
        let mut agents: Vec<AgentSummary> = self
            .agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(AgentSummary::from)
            .collect();
        agents.sort_by(|a, b| a.hwid.cmp(&b.hwid));
        agents
    }

    pub fn len(&self) -> usize {
        self.agents.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Font identity sent with install and uninstall commands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FontSpec {
    pub file_hash: String,
    pub name: String,
    pub style: String,
    pub file_type: String,
}

impl FontSpec {
    fn request(&self, install: bool) -> FontInstallRequest {
        FontInstallRequest {
            file_hash: self.file_hash.clone(),
            name: self.name.clone(),
            style: self.style.clone(),
            file_type: self.file_type.clone(),
            install,
        }
    }
}

/// Agent-facing service wired into a [`TcpServer`].
#[derive(Debug, Clone)]
pub struct AgentServer {
    directory: AgentDirectory,
}

impl AgentServer {
    /// Register the agent listeners on `server`. Call before `listen`.
    pub fn attach<A>(server: &mut TcpServer, authenticator: A) -> Self
    where
        A: Authenticator + 'static,
    {
        let directory = AgentDirectory::new();
        let authenticator: Arc<dyn Authenticator> = Arc::new(authenticator);

        {
            let directory = directory.clone();
            server.on_auth_request(move |conn, req| {
                let response = authenticator.authenticate(req, conn);
                if response.success {
                    if let Some(previous) = directory.record(req, conn.clone()) {
                        if previous.connection != *conn {
                            debug!(
                                hwid = %req.client_hwid,
                                old_conn = previous.connection.id(),
                                "Agent moved to a new connection"
                            );
                        }
                    }
                    info!(hwid = %req.client_hwid, name = %req.client_name, version = req.version, "Agent authenticated");
                } else {
                    warn!(hwid = %req.client_hwid, peer = %conn.peer_addr(), reason = %response.message, "Agent rejected");
                }
                conn.send(&Packet::AuthResponse(response))
            });
        }

        {
            let directory = directory.clone();
            server.on_font_install_response(move |conn, resp| {
                match directory.note_install_report(conn.id(), resp) {
                    Some(hwid) => {
                        info!(hwid = %hwid, success = resp.success, message = %resp.message, "Font install response")
                    }
                    None => {
                        warn!(peer = %conn.peer_addr(), message = %resp.message, "Font install response from unauthenticated connection")
                    }
                }
                Ok(())
            });
        }

        server.on_connect(|conn| {
            debug!(peer = %conn.peer_addr(), conn_id = conn.id(), "Agent connected");
            Ok(())
        });

        {
            let directory = directory.clone();
            server.on_disconnect(move |conn| {
                if let Some(record) = directory.remove_connection(conn.id()) {
                    info!(hwid = %record.hwid, "Agent disconnected");
                }
                Ok(())
            });
        }

        server.on_error(|conn, err| {
            if err.is_connection_reset() {
                debug!(peer = %conn.peer_addr(), "Agent connection reset");
            } else {
                warn!(peer = %conn.peer_addr(), error = %err, "Agent connection error");
            }
            Ok(())
        });

        Self { directory }
    }

    pub fn directory(&self) -> &AgentDirectory {
        &self.directory
    }

    pub fn install_font(&self, hwid: &str, font: &FontSpec) -> Result<()> {
        self.send_font_command(hwid, font, true)
    }

    pub fn uninstall_font(&self, hwid: &str, font: &FontSpec) -> Result<()> {
        self.send_font_command(hwid, font, false)
    }

    fn send_font_command(&self, hwid: &str, font: &FontSpec, install: bool) -> Result<()> {
        let record = self
            .directory
            .lookup(hwid)
            .ok_or_else(|| ProtocolError::ClientNotFound(hwid.to_string()))?;
        debug!(hwid, font = %font.name, install, "Sending font command");
        record
            .connection
            .send(&Packet::FontInstallRequest(font.request(install)))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::registry::PacketRegistry;
    use crate::transport::sink::MemorySink;

    fn conn(id: u64) -> (ConnectionHandle, Arc<MemorySink>) {
        let sink = MemorySink::new();
        let handle = ConnectionHandle::new(
            id,
            SocketAddr::from(([10, 1, 1, 1], 5000 + id as u16)),
            Arc::new(PacketRegistry::standard()),
            sink.clone(),
        );
        (handle, sink)
    }

    fn auth(hwid: &str) -> AuthRequest {
        AuthRequest {
            version: 2,
            client_name: "studio-mac".into(),
            client_hwid: hwid.into(),
        }
    }

    #[test]
    fn test_accept_all_rejects_empty_hwid() {
        let (handle, _) = conn(1);
        assert!(AcceptAll.authenticate(&auth("HW"), &handle).success);
        let rejected = AcceptAll.authenticate(&auth(""), &handle);
        assert!(!rejected.success);
        assert_eq!(rejected.message, AUTH_FAILURE_MESSAGE);
    }

    #[test]
    fn test_allow_list() {
        let (handle, _) = conn(1);
        let mut list = HwidAllowList::new(["A"]);
        list.allow("B");
        assert!(list.authenticate(&auth("A"), &handle).success);
        assert!(list.authenticate(&auth("B"), &handle).success);
        assert!(!list.authenticate(&auth("C"), &handle).success);
    }

    #[test]
    fn test_reauth_replaces_and_old_disconnect_is_ignored() {
        let directory = AgentDirectory::new();
        let (old, _) = conn(1);
        let (new, _) = conn(2);

        assert!(directory.record(&auth("HW"), old.clone()).is_none());
        assert_eq!(directory.record(&auth("HW"), new.clone()).unwrap().connection, old);

        assert!(directory.remove_connection(old.id()).is_none());
        assert_eq!(directory.lookup("HW").unwrap().connection, new);

        assert_eq!(directory.remove_connection(new.id()).unwrap().hwid, "HW");
        assert!(directory.is_empty());
    }

    #[test]
    fn test_list_is_sorted_summary() {
        let directory = AgentDirectory::new();
        let (a, _) = conn(1);
        let (b, _) = conn(2);
        directory.record(&auth("zeta"), a);
        directory.record(&auth("alpha"), b.clone());

        let list = directory.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].hwid, "alpha");
        assert_eq!(list[0].peer, b.peer_addr());
        assert!(list[0].connected);
        assert_eq!(directory.by_connection(b.id()).unwrap().hwid, "alpha");
    }

    #[test]
    fn test_install_report_is_recorded() {
        let directory = AgentDirectory::new();
        let (handle, _) = conn(3);
        directory.record(&auth("HW"), handle.clone());

        let report = FontInstallResponse {
            success: false,
            message: "disk full".into(),
        };
        assert_eq!(
            directory.note_install_report(handle.id(), &report).as_deref(),
            Some("HW")
        );
        assert_eq!(directory.lookup("HW").unwrap().last_install_report, Some(report));
    }

    #[test]
    fn test_font_request_flag() {
        let font = FontSpec {
            file_hash: "d41d8cd9".into(),
            name: "Inter".into(),
            style: "Regular".into(),
            file_type: "otf".into(),
        };
        assert!(font.request(true).install);
        assert!(!font.request(false).install);
        assert_eq!(font.request(true).file_hash, "d41d8cd9");
    }
}
