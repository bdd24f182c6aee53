//! Peer registration and primary-connection election for the UCS
//! multiplexer: a newly registered peer id that was already seen over a
//! different socket prefers the loopback-addressed socket as primary,
//! otherwise the first registered socket keeps the role.

use std::collections::HashMap;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

#[derive(Debug, Clone)]
struct PeerRecord {
    primary: ConnectionId,
    connections: Vec<ConnectionId>,
}

/// Tracks, per UCS peer id, which of its (possibly several) connections is
/// primary.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<u32, PeerRecord>,
    connection_addrs: HashMap<ConnectionId, IpAddr>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        PeerRegistry::default()
    }

    pub fn note_connection_address(&mut self, conn: ConnectionId, addr: IpAddr) {
        self.connection_addrs.insert(conn, addr);
    }

    fn is_loopback(&self, conn: ConnectionId) -> bool {
        self.connection_addrs.get(&conn).map(|a| a.is_loopback()).unwrap_or(false)
    }

    /// Registers `conn` as carrying `peer_id`. Returns whether `conn` is (or
    /// became) the primary connection for that peer.
    pub fn register(&mut self, peer_id: u32, conn: ConnectionId) -> bool {
        let conn_is_loopback = self.is_loopback(conn);
        {
            let record = self.peers.entry(peer_id).or_insert_with(|| PeerRecord { primary: conn, connections: Vec::new() });
            if !record.connections.contains(&conn) {
                record.connections.push(conn);
            }
        }

        let primary = self.peers.get(&peer_id).expect("just inserted").primary;
        let primary_is_loopback = self.is_loopback(primary);
        let record = self.peers.get_mut(&peer_id).expect("just inserted");
        if record.primary != conn && conn_is_loopback && !primary_is_loopback {
            record.primary = conn;
        }
        record.primary == conn
    }

    pub fn is_primary(&self, peer_id: u32, conn: ConnectionId) -> bool {
        self.peers.get(&peer_id).map(|r| r.primary == conn).unwrap_or(false)
    }

    pub fn primary_connections(&self) -> Vec<ConnectionId> {
        self.peers.values().map(|r| r.primary).collect()
    }

    /// Drops `conn` from every peer record it appears under, promoting the
    /// next-registered connection to primary if it was that peer's primary.
    pub fn remove_connection(&mut self, conn: ConnectionId) {
        self.connection_addrs.remove(&conn);
        self.peers.retain(|_, record| {
            record.connections.retain(|c| *c != conn);
            if record.primary == conn {
                if let Some(&next) = record.connections.first() {
                    record.primary = next;
                } else {
                    return false;
                }
            }
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn first_registered_connection_is_primary_by_default() {
        let mut registry = PeerRegistry::new();
        let a = ConnectionId(1);
        let b = ConnectionId(2);
        registry.note_connection_address(a, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        registry.note_connection_address(b, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));

        assert!(registry.register(42, a));
        assert!(!registry.register(42, b));
        assert!(registry.is_primary(42, a));
    }

    #[test]
    fn loopback_connection_takes_over_primary_from_a_non_loopback_one() {
        let mut registry = PeerRegistry::new();
        let remote = ConnectionId(1);
        let loopback = ConnectionId(2);
        registry.note_connection_address(remote, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        registry.note_connection_address(loopback, IpAddr::V4(Ipv4Addr::LOCALHOST));

        registry.register(7, remote);
        let became_primary = registry.register(7, loopback);
        assert!(became_primary);
        assert!(registry.is_primary(7, loopback));
        assert!(!registry.is_primary(7, remote));
    }

    #[test]
    fn removing_the_primary_promotes_the_next_connection() {
        let mut registry = PeerRegistry::new();
        let a = ConnectionId(1);
        let b = ConnectionId(2);
        registry.register(1, a);
        registry.register(1, b);
        registry.remove_connection(a);
        assert!(registry.is_primary(1, b));
    }
}
