//! Live connections keyed by peer address.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::transport::session::ConnectionHandle;

/// Shared table of live connections.
///
/// At most one entry exists per address. The entry is added when the
/// session starts and removed when it ends.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    inner: Arc<Mutex<HashMap<SocketAddr, ConnectionHandle>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Every update is a single map operation, so a poisoned guard is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<SocketAddr, ConnectionHandle>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a connection. An existing entry for the same address wins and
    /// the call fails with [`ProtocolError::DuplicateConnection`].
    pub fn insert(&self, handle: ConnectionHandle) -> Result<()> {
        let mut clients = self.lock();
        let addr = handle.peer_addr();
        if clients.contains_key(&addr) {
            return Err(ProtocolError::DuplicateConnection(addr));
        }
        clients.insert(addr, handle);
        Ok(())
    }

    /// Remove the entry for `addr` if it belongs to connection `id`.
    pub fn remove(&self, addr: SocketAddr, id: u64) -> Option<ConnectionHandle> {
        let mut clients = self.lock();
        match clients.get(&addr) {
            Some(existing) if existing.id() == id => clients.remove(&addr),
            Some(existing) => {
                debug!(peer = %addr, id, live = existing.id(), "Entry belongs to another connection");
                None
            }
            None => None,
        }
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<ConnectionHandle> {
        self.lock().get(addr).cloned()
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.lock().contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.lock().keys().copied().collect()
    }

    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.lock().values().cloned().collect()
    }

    /// Ask every live connection to close. Entries disappear as their
    /// sessions finish.
    pub fn close_all(&self) {
        for handle in self.handles() {
            handle.close();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::core::registry::PacketRegistry;
    use crate::transport::sink::MemorySink;

    fn handle(id: u64, addr: &str) -> ConnectionHandle {
        ConnectionHandle::new(
            id,
            addr.parse().unwrap(),
            Arc::new(PacketRegistry::standard()),
            MemorySink::new(),
        )
    }

    #[test]
    fn test_duplicate_keeps_existing() {
        let clients = ClientRegistry::new();
        clients.insert(handle(1, "10.0.0.1:4000")).unwrap();

        let err = clients.insert(handle(2, "10.0.0.1:4000")).unwrap_err();
        assert!(matches!(err, ProtocolError::DuplicateConnection(_)));

        let addr = "10.0.0.1:4000".parse().unwrap();
        assert_eq!(clients.get(&addr).unwrap().id(), 1);
        assert_eq!(clients.len(), 1);
    }

    #[test]
    fn test_remove_requires_matching_id() {
        let clients = ClientRegistry::new();
        let addr: SocketAddr = "10.0.0.2:4000".parse().unwrap();
        clients.insert(handle(7, "10.0.0.2:4000")).unwrap();

        assert!(clients.remove(addr, 8).is_none());
        assert!(clients.contains(&addr));

        assert_eq!(clients.remove(addr, 7).unwrap().id(), 7);
        assert!(clients.is_empty());
    }

    #[test]
    fn test_close_all() {
        let clients = ClientRegistry::new();
        clients.insert(handle(1, "10.0.0.3:1")).unwrap();
        clients.insert(handle(2, "10.0.0.3:2")).unwrap();

        clients.close_all();
        assert!(clients.handles().iter().all(|h| !h.is_connected()));
        assert_eq!(clients.addresses().len(), 2);
    }

    #[test]
    fn test_poisoned_lock_keeps_entries_visible() {
        let clients = ClientRegistry::new();
        let addr: SocketAddr = "10.0.0.4:4000".parse().unwrap();
        clients.insert(handle(3, "10.0.0.4:4000")).unwrap();

        let shared = clients.clone();
        let _ = std::thread::spawn(move || {
            let _guard = shared.inner.lock().unwrap();
            panic!("poison the table");
        })
        .join();
        assert!(clients.inner.is_poisoned());

        assert_eq!(clients.len(), 1);
        assert!(clients.contains(&addr));
        assert_eq!(clients.get(&addr).unwrap().id(), 3);
        assert_eq!(clients.addresses(), vec![addr]);
        assert!(matches!(
            clients.insert(handle(4, "10.0.0.4:4000")),
            Err(ProtocolError::DuplicateConnection(_))
        ));
        assert_eq!(clients.remove(addr, 3).unwrap().id(), 3);
        assert!(clients.is_empty());
    }
}
