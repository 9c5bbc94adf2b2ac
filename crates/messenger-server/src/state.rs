//! The server's shared client table, keyed by remote address like the
//! original implementation (two connections from the same peer address
//! would collide; this is a known, preserved quirk, not tightened here).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::client_record::ClientRecord;

pub struct ServerState {
    clients: Mutex<HashMap<SocketAddr, Arc<Mutex<ClientRecord>>>>,
}

impl ServerState {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, addr: SocketAddr, record: Arc<Mutex<ClientRecord>>) {
        self.clients.lock().await.insert(addr, record);
    }

    pub async fn remove(&self, addr: &SocketAddr) {
        self.clients.lock().await.remove(addr);
    }

    /// Linear scan for the first client whose name matches. Duplicate
    /// names resolve to whichever client was inserted first and is still
    /// iterated first by the map — this is not tightened into a uniqueness
    /// constraint, matching the original `find_client` behavior.
    pub async fn find_by_name(&self, name: &[u8]) -> Option<Arc<Mutex<ClientRecord>>> {
        let clients = self.clients.lock().await;
        for record in clients.values() {
            let guard = record.lock().await;
            if guard.name.as_deref() == Some(name) {
                drop(guard);
                return Some(Arc::clone(record));
            }
        }
        None
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}
