//! Connection state and the set of open connections.
//!
//! Each accepted client is tracked as a [`Connection`]; the open set lives
//! in a [`ConnectionRegistry`] backed by slab allocation, so every
//! connection has a stable id for its poll token and removal during event
//! dispatch cannot invalidate the ids of its neighbours.

use bytes::BytesMut;
use mio::net::UnixStream;
use slab::Slab;

/// A single client connection.
///
/// The stream is non-blocking from the moment it is accepted. Dropping a
/// `Connection` closes the descriptor, so removal from the registry and
/// release of the handle are a single operation on every exit path.
#[derive(Debug)]
pub struct Connection {
    /// The accepted non-blocking stream.
    pub stream: UnixStream,
    /// Bytes received but not yet forming a complete frame.
    pub read_buf: BytesMut,
    /// Outbound bytes a saturated socket could not take yet.
    pub write_buf: BytesMut,
}

impl Connection {
    /// Wrap a freshly accepted stream.
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            read_buf: BytesMut::new(),
            write_buf: BytesMut::new(),
        }
    }

    /// Whether output is queued waiting for the socket to drain.
    pub fn has_pending_write(&self) -> bool {
        !self.write_buf.is_empty()
    }
}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove; ids are stable until removed
/// and double as poll tokens.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    /// Get a mutable reference to a connection.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Remove a connection, dropping (and thereby closing) its stream.
    pub fn remove(&mut self, id: usize) -> Option<Connection> {
        if self.connections.contains(id) {
            Some(self.connections.remove(id))
        } else {
            None
        }
    }

    /// Check if a connection exists.
    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if there are no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Ids of every open connection, snapshotted so the caller can mutate
    /// the registry while walking the set.
    pub fn ids(&self) -> Vec<usize> {
        self.connections.iter().map(|(id, _)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_pair() -> (UnixStream, UnixStream) {
        UnixStream::pair().unwrap()
    }

    #[test]
    fn test_registry_insert_remove() {
        let mut registry = ConnectionRegistry::new(4);

        let (a, _keep_a) = stream_pair();
        let (b, _keep_b) = stream_pair();

        let id_a = registry.insert(Connection::new(a)).unwrap();
        let id_b = registry.insert(Connection::new(b)).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(id_a));

        registry.remove(id_a);
        assert!(!registry.contains(id_a));
        assert_eq!(registry.len(), 1);
        // The other entry keeps its id
        assert!(registry.contains(id_b));

        // Removing twice is a no-op
        assert!(registry.remove(id_a).is_none());
    }

    #[test]
    fn test_registry_refuses_at_capacity() {
        let mut registry = ConnectionRegistry::new(1);

        let (a, _keep_a) = stream_pair();
        let (b, _keep_b) = stream_pair();

        registry.insert(Connection::new(a)).unwrap();
        assert!(registry.insert(Connection::new(b)).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_snapshot_allows_removal_while_walking() {
        let mut registry = ConnectionRegistry::new(4);
        let mut keep = Vec::new();

        for _ in 0..3 {
            let (s, peer) = stream_pair();
            registry.insert(Connection::new(s)).unwrap();
            keep.push(peer);
        }

        let ids = registry.ids();
        assert_eq!(ids.len(), 3);

        // Remove the middle entry mid-walk: every id is still visited
        // exactly once and none is skipped.
        let mut visited = Vec::new();
        for (n, id) in ids.iter().enumerate() {
            if n == 0 {
                registry.remove(ids[1]);
            }
            visited.push(*id);
        }
        assert_eq!(visited, ids);
        assert_eq!(registry.len(), 2);
    }
}
