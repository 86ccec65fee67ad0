// Connection registry: this node's view of who is reachable and how.
//
// A `Registry` holds three kinds of state:
// - `connected_clients`: clients with an open session on this node, in
//   arrival order. Each is a `RemoteConnection` (id + UDP endpoint).
// - `left_roster` / `right_roster`: the ids each neighbor last reported as
//   its own direct clients. Replaced wholesale on every sync, never merged.
// - `left_neighbor` / `right_neighbor`: the resolved endpoint of each
//   neighbor node, or `None` at a chain boundary or while unresolved.
//
// All three loops in `server.rs` touch this state, so the server keeps the
// registry behind one `parking_lot::Mutex` (`SharedRegistry`). Every method
// here is a short, non-blocking operation meant to run while that lock is
// held; socket sends and DNS lookups happen outside it. Because a roster
// replacement is a single assignment under the lock, a concurrent reader
// sees either the old roster or the new one, never a mix.
//
// Routing lives here too, as `plan_delivery`: a pure decision over the
// current state that returns where a message should go. The Dispatch loop
// takes the lock, plans, drops the lock, and then sends.

use std::net::SocketAddr;
use std::sync::Arc;

use linkchat_protocol::{Message, MessageKind};
use parking_lot::Mutex;

/// The registry as shared between the server loops.
pub type SharedRegistry = Arc<Mutex<Registry>>;

/// A directly addressable peer: a client attached to this node, or a
/// neighbor node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteConnection {
    pub identifier: String,
    pub endpoint: SocketAddr,
}

impl RemoteConnection {
    pub fn new(identifier: impl Into<String>, endpoint: SocketAddr) -> Self {
        Self {
            identifier: identifier.into(),
            endpoint,
        }
    }
}

/// Which neighbor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    /// Kind of the sync message this node sends *toward* `self`. The label
    /// names the direction of travel; the receiver stores the roster under
    /// the opposite side (see `Registry::apply_sync`).
    pub fn outbound_sync_kind(self) -> MessageKind {
        match self {
            Side::Left => MessageKind::SyncLeft,
            Side::Right => MessageKind::SyncRight,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Side::Left => "left",
            Side::Right => "right",
        })
    }
}

/// Outcome of routing one message over UDP.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Send to each of these local clients (may be empty).
    Broadcast(Vec<SocketAddr>),
    /// The destination is attached to this node.
    Local(SocketAddr),
    /// The destination is a direct client of this neighbor; hand it over.
    Neighbor(Side, SocketAddr),
    /// Nobody we know of has this client.
    Miss,
}

#[derive(Debug, Default)]
pub struct Registry {
    connected_clients: Vec<RemoteConnection>,
    left_roster: Vec<String>,
    right_roster: Vec<String>,
    left_neighbor: Option<RemoteConnection>,
    right_neighbor: Option<RemoteConnection>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Register a client session. Appends without deduplication; a client
    /// that connects twice holds two entries until it disconnects twice.
    pub fn add_client(&mut self, identifier: impl Into<String>, endpoint: SocketAddr) {
        self.connected_clients
            .push(RemoteConnection::new(identifier, endpoint));
    }

    /// Remove the first session registered under `identifier`.
    pub fn remove_client(&mut self, identifier: &str) -> Option<RemoteConnection> {
        let index = self
            .connected_clients
            .iter()
            .position(|client| client.identifier == identifier)?;
        Some(self.connected_clients.remove(index))
    }

    pub fn clients(&self) -> &[RemoteConnection] {
        &self.connected_clients
    }

    /// Ids of the local clients, in arrival order. This is the roster this
    /// node advertises to its neighbors.
    pub fn client_ids(&self) -> Vec<String> {
        self.connected_clients
            .iter()
            .map(|client| client.identifier.clone())
            .collect()
    }

    pub fn roster(&self, side: Side) -> &[String] {
        match side {
            Side::Left => &self.left_roster,
            Side::Right => &self.right_roster,
        }
    }

    /// Replace a neighbor's roster wholesale.
    pub fn replace_roster(&mut self, side: Side, ids: Vec<String>) {
        match side {
            Side::Left => self.left_roster = ids,
            Side::Right => self.right_roster = ids,
        }
    }

    /// Store the roster carried by an inbound sync message and return the
    /// side it was filed under. A `SyncLeft` travelled leftward, so it came
    /// from our right neighbor; `SyncRight` came from our left.
    pub fn apply_sync(&mut self, message: &Message) -> Option<Side> {
        debug_assert!(
            message.kind().is_sync(),
            "apply_sync called with {} message",
            message.kind()
        );
        let side = match message.kind() {
            MessageKind::SyncLeft => Side::Right,
            MessageKind::SyncRight => Side::Left,
            _ => return None,
        };
        let roster = message.roster()?.to_vec();
        self.replace_roster(side, roster);
        Some(side)
    }

    pub fn neighbor(&self, side: Side) -> Option<&RemoteConnection> {
        match side {
            Side::Left => self.left_neighbor.as_ref(),
            Side::Right => self.right_neighbor.as_ref(),
        }
    }

    /// Install (or clear) a neighbor connection, returning the previous
    /// one. Connections are replaced, never edited in place.
    pub fn set_neighbor(
        &mut self,
        side: Side,
        connection: Option<RemoteConnection>,
    ) -> Option<RemoteConnection> {
        let slot = match side {
            Side::Left => &mut self.left_neighbor,
            Side::Right => &mut self.right_neighbor,
        };
        std::mem::replace(slot, connection)
    }

    /// Decide where `message` goes.
    ///
    /// Broadcasts go to every local client except the sender. Unicasts go to
    /// the first match among, in order: local clients, the left neighbor's
    /// roster (only while a left connection exists), and the right
    /// neighbor's roster (only while a right connection exists).
    pub fn plan_delivery(&self, message: &Message) -> Delivery {
        if message.is_broadcast() {
            let targets = self
                .connected_clients
                .iter()
                .filter(|client| client.identifier != message.source_id())
                .map(|client| client.endpoint)
                .collect();
            return Delivery::Broadcast(targets);
        }

        let destination = message.destination_id();
        if let Some(client) = self
            .connected_clients
            .iter()
            .find(|client| client.identifier == destination)
        {
            return Delivery::Local(client.endpoint);
        }

        for side in Side::BOTH {
            let Some(neighbor) = self.neighbor(side) else {
                continue;
            };
            if self.roster(side).iter().any(|id| id == destination) {
                return Delivery::Neighbor(side, neighbor.endpoint);
            }
        }

        Delivery::Miss
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// A registry with local clients a/b/c on ports 1..=3 and both
    /// neighbors connected (left on 100, right on 200).
    fn populated() -> Registry {
        let mut registry = Registry::new();
        registry.add_client("a", addr(1));
        registry.add_client("b", addr(2));
        registry.add_client("c", addr(3));
        registry.set_neighbor(Side::Left, Some(RemoteConnection::new("west", addr(100))));
        registry.set_neighbor(Side::Right, Some(RemoteConnection::new("east", addr(200))));
        registry
    }

    #[test]
    fn broadcast_skips_sender() {
        let registry = populated();
        let msg = Message::chat("a", "hello").unwrap();
        assert_eq!(
            registry.plan_delivery(&msg),
            Delivery::Broadcast(vec![addr(2), addr(3)])
        );
    }

    #[test]
    fn broadcast_from_neighbor_client_reaches_everyone_local() {
        let registry = populated();
        let msg = Message::chat("zed", "from afar").unwrap();
        assert_eq!(
            registry.plan_delivery(&msg),
            Delivery::Broadcast(vec![addr(1), addr(2), addr(3)])
        );
    }

    #[test]
    fn local_client_wins_over_roster() {
        let mut registry = populated();
        registry.replace_roster(Side::Left, ids(&["b"]));
        registry.replace_roster(Side::Right, ids(&["b"]));
        let msg = Message::private("a", "b", "hi").unwrap();
        assert_eq!(registry.plan_delivery(&msg), Delivery::Local(addr(2)));
    }

    #[test]
    fn left_roster_checked_before_right() {
        let mut registry = populated();
        registry.replace_roster(Side::Left, ids(&["x"]));
        registry.replace_roster(Side::Right, ids(&["x"]));
        let msg = Message::private("a", "x", "hi").unwrap();
        assert_eq!(
            registry.plan_delivery(&msg),
            Delivery::Neighbor(Side::Left, addr(100))
        );
    }

    #[test]
    fn right_roster_used_when_absent_on_left() {
        let mut registry = populated();
        registry.replace_roster(Side::Right, ids(&["y"]));
        let msg = Message::private("a", "y", "hi").unwrap();
        assert_eq!(
            registry.plan_delivery(&msg),
            Delivery::Neighbor(Side::Right, addr(200))
        );
    }

    #[test]
    fn roster_ignored_without_connection() {
        let mut registry = populated();
        registry.set_neighbor(Side::Left, None);
        registry.replace_roster(Side::Left, ids(&["x"]));
        let msg = Message::private("a", "x", "hi").unwrap();
        assert_eq!(registry.plan_delivery(&msg), Delivery::Miss);
    }

    #[test]
    fn right_roster_gated_on_right_connection() {
        // Left connected, right absent: a right-roster hit must not route.
        let mut registry = populated();
        registry.set_neighbor(Side::Right, None);
        registry.replace_roster(Side::Right, ids(&["y"]));
        let msg = Message::private("a", "y", "hi").unwrap();
        assert_eq!(registry.plan_delivery(&msg), Delivery::Miss);
    }

    #[test]
    fn unknown_destination_is_miss() {
        let registry = populated();
        let msg = Message::private("a", "nobody", "hello?").unwrap();
        assert_eq!(registry.plan_delivery(&msg), Delivery::Miss);
    }

    #[test]
    fn sync_labels_are_inverted_on_receipt() {
        let mut registry = Registry::new();

        let from_right = Message::sync(ids(&["r1"]), "east", "me", MessageKind::SyncLeft).unwrap();
        assert_eq!(registry.apply_sync(&from_right), Some(Side::Right));
        assert_eq!(registry.roster(Side::Right), ids(&["r1"]).as_slice());

        let from_left = Message::sync(ids(&["l1"]), "west", "me", MessageKind::SyncRight).unwrap();
        assert_eq!(registry.apply_sync(&from_left), Some(Side::Left));
        assert_eq!(registry.roster(Side::Left), ids(&["l1"]).as_slice());
    }

    #[test]
    fn empty_sync_clears_roster() {
        let mut registry = Registry::new();
        registry.replace_roster(Side::Right, ids(&["r1", "r2"]));
        let empty = Message::sync(vec![], "east", "me", MessageKind::SyncLeft).unwrap();
        registry.apply_sync(&empty);
        assert!(registry.roster(Side::Right).is_empty());
    }

    #[test]
    fn remove_client_takes_first_match_only() {
        let mut registry = Registry::new();
        registry.add_client("dup", addr(1));
        registry.add_client("other", addr(2));
        registry.add_client("dup", addr(3));

        let removed = registry.remove_client("dup").unwrap();
        assert_eq!(removed.endpoint, addr(1));
        assert_eq!(registry.client_ids(), ids(&["other", "dup"]));

        assert!(registry.remove_client("missing").is_none());
    }

    #[test]
    fn set_neighbor_returns_previous() {
        let mut registry = Registry::new();
        let previous = registry.set_neighbor(Side::Left, Some(RemoteConnection::new("w", addr(9))));
        assert!(previous.is_none());
        let old = registry.set_neighbor(Side::Left, None).unwrap();
        assert_eq!(old.identifier, "w");
        assert!(registry.neighbor(Side::Left).is_none());
    }

    #[test]
    fn concurrent_connect_disconnect_keeps_membership_consistent() {
        const WORKERS: u16 = 8;
        const PER_WORKER: u16 = 200;

        let registry = Registry::shared();
        let mut handles = Vec::new();

        // Each worker connects PER_WORKER clients, then disconnects the
        // odd-numbered ones. Survivors are the even-numbered clients.
        for worker in 0..WORKERS {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                for i in 0..PER_WORKER {
                    registry
                        .lock()
                        .add_client(format!("w{worker}-c{i}"), addr(worker * PER_WORKER + i));
                }
                for i in (1..PER_WORKER).step_by(2) {
                    let removed = registry.lock().remove_client(&format!("w{worker}-c{i}"));
                    assert!(removed.is_some());
                }
            }));
        }

        // Readers plan broadcasts while membership churns; every plan must
        // be internally consistent (no duplicate endpoints).
        for _ in 0..2 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                let msg = Message::chat("observer", "tick").unwrap();
                for _ in 0..500 {
                    if let Delivery::Broadcast(targets) = registry.lock().plan_delivery(&msg) {
                        let mut sorted = targets.clone();
                        sorted.sort();
                        sorted.dedup();
                        assert_eq!(sorted.len(), targets.len());
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let mut actual = registry.lock().client_ids();
        actual.sort();
        let mut expected: Vec<String> = (0..WORKERS)
            .flat_map(|w| (0..PER_WORKER).step_by(2).map(move |i| format!("w{w}-c{i}")))
            .collect();
        expected.sort();
        assert_eq!(actual, expected);
    }
}
