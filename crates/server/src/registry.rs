use courier_proto::ServerEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};

/// Items carried on a connection's outbound channel. `Close` instructs the
/// writer pump to emit a close frame and stop; it is sent to connections
/// displaced by a fresh authentication for the same user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Event(ServerEvent),
    Close,
}

#[derive(Clone)]
pub struct ConnectionHandle {
    pub sender: mpsc::Sender<Outbound>,
    pub connection_id: u64,
}

/// Live mapping from user id to the single active connection. All mutation
/// goes through `register` / `unregister`; each operation is atomic with
/// respect to the others.
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<i64, ConnectionHandle>>,
    next_connection_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry {
            entries: RwLock::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Inserts or replaces the mapping for `user_id`. Returns the id assigned
    /// to the new connection and the displaced handle, if any, so the caller
    /// can shut the old connection down.
    pub async fn register(
        &self,
        user_id: i64,
        sender: mpsc::Sender<Outbound>,
    ) -> (u64, Option<ConnectionHandle>) {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries.write().await;
        let displaced = entries.insert(
            user_id,
            ConnectionHandle {
                sender,
                connection_id,
            },
        );
        (connection_id, displaced)
    }

    /// Removes the mapping only if it still belongs to `connection_id`. A
    /// stale disconnect racing a fresh reconnect is a no-op.
    pub async fn unregister(&self, user_id: i64, connection_id: u64) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(&user_id) {
            Some(entry) if entry.connection_id == connection_id => {
                entries.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, user_id: i64) -> Option<ConnectionHandle> {
        let entries = self.entries.read().await;
        entries.get(&user_id).cloned()
    }

    /// Snapshot of every live entry, used for broadcast fan-out.
    pub async fn all_entries(&self) -> Vec<(i64, ConnectionHandle)> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .map(|(user_id, handle)| (*user_id, handle.clone()))
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
