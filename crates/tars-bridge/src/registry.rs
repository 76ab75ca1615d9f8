//! Registry of live display connections.
//!
//! Membership changes only on accept, on a connection's own close or error,
//! and on server shutdown. A failed broadcast write never removes an entry.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::connection::ConnectionId;

#[derive(Debug)]
struct ConnectionEntry {
    sender: mpsc::UnboundedSender<Bytes>,
    task: JoinHandle<()>,
}

/// Outbound queue of one registered connection, captured for a broadcast.
#[derive(Debug, Clone)]
pub(crate) struct BroadcastTarget {
    pub id: ConnectionId,
    pub sender: mpsc::UnboundedSender<Bytes>,
}

#[derive(Debug, Default)]
pub(crate) struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    accepting: bool,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start accepting members again after a previous [`close`](Self::close).
    pub fn open(&mut self) {
        self.accepting = true;
    }

    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    pub fn add(
        &mut self,
        id: ConnectionId,
        sender: mpsc::UnboundedSender<Bytes>,
        task: JoinHandle<()>,
    ) {
        debug!("Registering connection: {}", id);
        self.connections
            .insert(id, ConnectionEntry { sender, task });
    }

    pub fn remove(&mut self, id: &ConnectionId) -> bool {
        let removed = self.connections.remove(id).is_some();
        if removed {
            debug!("Unregistered connection: {}", id);
        }
        removed
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    #[cfg(test)]
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Snapshot of every member's outbound queue.
    #[must_use]
    pub fn targets(&self) -> Vec<BroadcastTarget> {
        self.connections
            .iter()
            .map(|(id, entry)| BroadcastTarget {
                id: *id,
                sender: entry.sender.clone(),
            })
            .collect()
    }

    /// Stop accepting members and hand back every connection task.
    ///
    /// The tasks are aborted before they are returned; callers await them to
    /// know the sockets are gone.
    pub fn close(&mut self) -> Vec<JoinHandle<()>> {
        self.accepting = false;
        self.connections
            .drain()
            .map(|(_, entry)| {
                entry.task.abort();
                entry.task
            })
            .collect()
    }
}
