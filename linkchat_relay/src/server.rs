// UDP relay node: socket ownership and the three concurrent loops.
//
// Architecture: one `UdpSocket`, one `SharedRegistry`, three threads.
//
// - **Ingest** (`ingest_loop`): blocking `recv_from` with a read timeout of
//   `poll_interval`, so it wakes up to check `keep_running` even when no
//   traffic arrives. Decodes each datagram, applies control messages to the
//   registry (`apply_inbound`), and pushes every non-sync message onto the
//   relay queue. Malformed datagrams are logged and dropped.
// - **Dispatch** (`dispatch_loop`): drains the relay queue (an `mpsc`
//   channel, so it sleeps in `recv_timeout` rather than spinning), plans each
//   delivery under the registry lock, sends after releasing it, then hands
//   the message to the secondary transport.
// - **Neighbor-Sync** (`neighbor_sync_loop`): every `sync_interval`, for each
//   side that exists in the topology, either resolves the neighbor's address
//   (if no connection is recorded) or pushes this node's client roster to it.
//   A failed send keeps the connection; only a failed resolution clears it.
//
// The socket is shared by reference between all three threads. `send_to` on
// a UDP socket writes one whole datagram per call, so concurrent sends from
// Dispatch and Neighbor-Sync never interleave bytes.
//
// Shutdown: `ServerHandle::stop` clears `keep_running` and joins the
// threads. Each loop checks the flag at least once per `poll_interval`.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use linkchat_protocol::{ChainPosition, MAX_DATAGRAM_SIZE, Message, MessageKind, decode, encode};
use tracing::{debug, info, warn};

use crate::config::{ChainTopology, ServerConfig};
use crate::error::RelayError;
use crate::registry::{Delivery, Registry, RemoteConnection, SharedRegistry, Side};
use crate::transport::{NoopTransport, SecondaryTransport};

/// Counters for what a node has done since it started.
#[derive(Debug, Default)]
struct RelayStats {
    received: AtomicU64,
    malformed: AtomicU64,
    datagrams_sent: AtomicU64,
    send_failures: AtomicU64,
    routing_misses: AtomicU64,
    syncs_sent: AtomicU64,
}

/// Point-in-time copy of a node's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub malformed: u64,
    pub datagrams_sent: u64,
    pub send_failures: u64,
    pub routing_misses: u64,
    pub syncs_sent: u64,
}

impl RelayStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            routing_misses: self.routing_misses.load(Ordering::Relaxed),
            syncs_sent: self.syncs_sent.load(Ordering::Relaxed),
        }
    }
}

/// Handle returned by `start_server` to inspect and stop a running node.
pub struct ServerHandle {
    server: Arc<Server>,
    threads: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Signal all loops to stop and wait for them to exit.
    pub fn stop(mut self) {
        self.server.keep_running.store(false, Ordering::SeqCst);
        self.join_all();
    }

    /// Block until the node stops. Nothing inside the node clears the
    /// shutdown flag, so for a standalone process this waits until the
    /// process is killed.
    pub fn wait(mut self) {
        self.join_all();
    }

    pub fn name(&self) -> &str {
        &self.server.name
    }

    pub fn position(&self) -> ChainPosition {
        self.server.position
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr
    }

    /// The node's registry, for inspection. Hold the lock briefly: the
    /// relay loops block on it.
    pub fn registry(&self) -> &SharedRegistry {
        &self.server.registry
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.server.stats.snapshot()
    }

    fn join_all(&mut self) {
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.server.keep_running.store(false, Ordering::SeqCst);
    }
}

/// State shared by the three loops of one node.
struct Server {
    name: String,
    position: ChainPosition,
    topology: ChainTopology,
    socket: UdpSocket,
    local_addr: SocketAddr,
    registry: SharedRegistry,
    stats: RelayStats,
    keep_running: AtomicBool,
    sync_interval: Duration,
    poll_interval: Duration,
}

/// What Ingest does with a message after applying it to the registry.
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    /// Push onto the relay queue.
    Relay,
    /// Node-to-node control traffic; stops here.
    Consumed,
}

/// Start a relay node with the no-op secondary transport.
pub fn start_server(config: ServerConfig) -> Result<(ServerHandle, SocketAddr), RelayError> {
    start_server_with_transport(config, Arc::new(NoopTransport))
}

/// Bind the node's socket and spawn its loops. Returns a handle for stopping
/// it and the bound address (useful when the listen port is 0).
pub fn start_server_with_transport(
    config: ServerConfig,
    secondary: Arc<dyn SecondaryTransport>,
) -> Result<(ServerHandle, SocketAddr), RelayError> {
    config.topology.validate()?;
    let name = config.own_node()?.name.clone();
    let port = config.listen_port()?;
    // A zero read timeout is rejected by the OS.
    let poll_interval = config.poll_interval.max(Duration::from_millis(1));
    // Neighbor-Sync sleeps at least one poll per tick; a zero interval
    // would otherwise spin and flood both neighbors.
    let sync_interval = config.sync_interval.max(poll_interval);

    let socket = UdpSocket::bind((config.bind_host.as_str(), port))?;
    socket.set_read_timeout(Some(poll_interval))?;
    let local_addr = socket.local_addr()?;

    let server = Arc::new(Server {
        name,
        position: config.position,
        topology: config.topology,
        socket,
        local_addr,
        registry: Registry::shared(),
        stats: RelayStats::default(),
        keep_running: AtomicBool::new(true),
        sync_interval,
        poll_interval,
    });

    let (relay_tx, relay_rx) = mpsc::channel();
    let mut handle = ServerHandle {
        server: Arc::clone(&server),
        threads: Vec::with_capacity(3),
    };

    let ingest = Arc::clone(&server);
    handle.threads.push(
        thread::Builder::new()
            .name(format!("{}-ingest", server.name))
            .spawn(move || ingest_loop(&ingest, &relay_tx))?,
    );

    let dispatch = Arc::clone(&server);
    handle.threads.push(
        thread::Builder::new()
            .name(format!("{}-dispatch", server.name))
            .spawn(move || dispatch_loop(&dispatch, &relay_rx, &*secondary))?,
    );

    let sync = Arc::clone(&server);
    handle.threads.push(
        thread::Builder::new()
            .name(format!("{}-sync", server.name))
            .spawn(move || neighbor_sync_loop(&sync))?,
    );

    info!(
        node = %server.name,
        position = %server.position,
        addr = %local_addr,
        "relay node started"
    );
    Ok((handle, local_addr))
}

/// Receive, decode, apply, enqueue. Runs until shutdown.
fn ingest_loop(server: &Server, relay_tx: &Sender<Message>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    while server.is_running() {
        let (len, from) = match server.socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => {
                // ICMP port-unreachable from a dead peer surfaces here on
                // some platforms. Nothing to do but keep listening.
                debug!(node = %server.name, error = %e, "receive error");
                continue;
            }
        };
        RelayStats::bump(&server.stats.received);

        let message = match decode(&buf[..len]) {
            Ok(message) => message,
            Err(source) => {
                RelayStats::bump(&server.stats.malformed);
                let err = RelayError::MalformedMessage { from, source };
                warn!(node = %server.name, error = %err, "dropping datagram");
                continue;
            }
        };
        debug!(
            node = %server.name,
            kind = %message.kind(),
            source = message.source_id(),
            %from,
            "received"
        );

        if misaddressed_sync(&server.name, &message) {
            debug!(
                node = %server.name,
                destination = message.destination_id(),
                %from,
                "roster sync addressed to another node"
            );
        }
        let outcome = apply_inbound(&mut server.registry.lock(), &message, from);
        if matches!(message.kind(), MessageKind::Connect | MessageKind::Disconnect) {
            info!(
                node = %server.name,
                client = message.source_id(),
                kind = %message.kind(),
                %from,
                "client session"
            );
        }
        if outcome == Inbound::Relay && relay_tx.send(message).is_err() {
            // Dispatch is gone; only happens during shutdown.
            break;
        }
    }
    debug!(node = %server.name, "ingest loop stopped");
}

/// Registry side effects of one inbound message.
fn apply_inbound(registry: &mut Registry, message: &Message, from: SocketAddr) -> Inbound {
    match message.kind() {
        MessageKind::Connect => {
            registry.add_client(message.source_id(), from);
            Inbound::Relay
        }
        MessageKind::Disconnect => {
            registry.remove_client(message.source_id());
            Inbound::Relay
        }
        MessageKind::Chat | MessageKind::PrivateMessage => Inbound::Relay,
        MessageKind::SyncLeft | MessageKind::SyncRight => {
            registry.apply_sync(message);
            Inbound::Consumed
        }
    }
}

/// A sync whose destination is not this node. Still applied: the sender is
/// taken to be the neighbor, but a mismatch points at a misconfigured chain.
fn misaddressed_sync(own_name: &str, message: &Message) -> bool {
    message.kind().is_sync() && message.destination_id() != own_name
}

/// Drain the relay queue in FIFO order. Runs until shutdown.
fn dispatch_loop(
    server: &Server,
    relay_rx: &Receiver<Message>,
    secondary: &dyn SecondaryTransport,
) {
    while server.is_running() {
        let message = match relay_rx.recv_timeout(server.poll_interval) {
            Ok(message) => message,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        server.relay_udp(&message);

        if let Err(e) = secondary.deliver(&message) {
            warn!(
                node = %server.name,
                transport = secondary.name(),
                error = %e,
                "secondary delivery failed"
            );
        }
    }
    debug!(node = %server.name, "dispatch loop stopped");
}

/// Keep neighbor connections alive and push rosters. Runs until shutdown.
fn neighbor_sync_loop(server: &Server) {
    while server.is_running() {
        for side in Side::BOTH {
            server.maintain_neighbor(side);
        }
        server.sleep_while_running(server.sync_interval);
    }
    debug!(node = %server.name, "neighbor sync loop stopped");
}

impl Server {
    fn is_running(&self) -> bool {
        self.keep_running.load(Ordering::SeqCst)
    }

    /// Sleep for `total`, waking every `poll_interval` to check for
    /// shutdown.
    fn sleep_while_running(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while self.is_running() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(self.poll_interval));
        }
    }

    fn send_datagram(&self, datagram: &[u8], target: SocketAddr) -> Result<(), RelayError> {
        match self.socket.send_to(datagram, target) {
            Ok(_) => {
                RelayStats::bump(&self.stats.datagrams_sent);
                Ok(())
            }
            Err(source) => {
                RelayStats::bump(&self.stats.send_failures);
                Err(RelayError::TransportSendFailure { target, source })
            }
        }
    }

    /// Route one message over UDP. Errors are logged, never returned.
    fn relay_udp(&self, message: &Message) {
        let delivery = self.registry.lock().plan_delivery(message);

        let datagram = match encode(message) {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!(node = %self.name, error = %e, "cannot re-encode message");
                return;
            }
        };

        let targets = match delivery {
            Delivery::Broadcast(targets) => targets,
            Delivery::Local(target) => vec![target],
            Delivery::Neighbor(side, target) => {
                debug!(
                    node = %self.name,
                    destination = message.destination_id(),
                    %side,
                    "forwarding to neighbor"
                );
                vec![target]
            }
            Delivery::Miss => {
                RelayStats::bump(&self.stats.routing_misses);
                let err = RelayError::RoutingMiss {
                    destination: message.destination_id().to_string(),
                    source_id: message.source_id().to_string(),
                };
                warn!(node = %self.name, error = %err, "message dropped");
                return;
            }
        };

        for target in targets {
            if let Err(e) = self.send_datagram(&datagram, target) {
                warn!(node = %self.name, error = %e, "relay send failed");
            }
        }
    }

    fn neighbor_position(&self, side: Side) -> Option<ChainPosition> {
        match side {
            Side::Left => self.topology.left_of(self.position),
            Side::Right => self.topology.right_of(self.position),
        }
    }

    /// One Neighbor-Sync step for one side.
    fn maintain_neighbor(&self, side: Side) {
        let Some(position) = self.neighbor_position(side) else {
            // Chain boundary: this side stays empty for good.
            return;
        };

        let current = self.registry.lock().neighbor(side).cloned();
        match current {
            None => self.resolve_neighbor(side, position),
            Some(neighbor) => self.push_roster(side, &neighbor),
        }
    }

    fn resolve_neighbor(&self, side: Side, position: ChainPosition) {
        let resolved = self.topology.resolve(position).and_then(|endpoint| {
            let name = self
                .topology
                .name_of(position)
                .ok_or_else(|| RelayError::Topology(format!("no node at {position}")))?;
            Ok(RemoteConnection::new(name, endpoint))
        });

        match resolved {
            Ok(connection) => {
                info!(
                    node = %self.name,
                    %side,
                    neighbor = %connection.identifier,
                    endpoint = %connection.endpoint,
                    "neighbor connected"
                );
                self.registry.lock().set_neighbor(side, Some(connection));
            }
            Err(e) => {
                debug!(node = %self.name, %side, error = %e, "neighbor unresolved, will retry");
                self.registry.lock().set_neighbor(side, None);
            }
        }
    }

    fn push_roster(&self, side: Side, neighbor: &RemoteConnection) {
        let roster = self.registry.lock().client_ids();
        let datagram = Message::sync(
            roster,
            &self.name,
            &neighbor.identifier,
            side.outbound_sync_kind(),
        )
        .and_then(|message| encode(&message));

        match datagram {
            Ok(datagram) => match self.send_datagram(&datagram, neighbor.endpoint) {
                Ok(()) => RelayStats::bump(&self.stats.syncs_sent),
                Err(e) => warn!(node = %self.name, %side, error = %e, "roster sync failed"),
            },
            Err(e) => warn!(node = %self.name, %side, error = %e, "cannot build roster sync"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn connect_registers_sender_address_and_relays() {
        let mut registry = Registry::new();
        let msg = Message::connect("alice").unwrap();
        assert_eq!(apply_inbound(&mut registry, &msg, addr(5000)), Inbound::Relay);
        assert_eq!(registry.clients(), &[RemoteConnection::new("alice", addr(5000))]);
    }

    #[test]
    fn disconnect_removes_and_relays() {
        let mut registry = Registry::new();
        registry.add_client("alice", addr(5000));
        registry.add_client("bob", addr(5001));
        let msg = Message::disconnect("alice").unwrap();
        assert_eq!(apply_inbound(&mut registry, &msg, addr(5000)), Inbound::Relay);
        assert_eq!(registry.client_ids(), vec!["bob".to_string()]);
    }

    #[test]
    fn chat_relays_without_touching_registry() {
        let mut registry = Registry::new();
        let msg = Message::private("alice", "bob", "hi").unwrap();
        assert_eq!(apply_inbound(&mut registry, &msg, addr(5000)), Inbound::Relay);
        assert!(registry.clients().is_empty());
    }

    #[test]
    fn sync_is_consumed_and_stored() {
        let mut registry = Registry::new();
        let msg = Message::sync(
            vec!["carol".into()],
            "east",
            "me",
            MessageKind::SyncLeft,
        )
        .unwrap();
        assert_eq!(apply_inbound(&mut registry, &msg, addr(9000)), Inbound::Consumed);
        assert_eq!(registry.roster(Side::Right), &["carol".to_string()]);
        assert!(registry.roster(Side::Left).is_empty());
    }

    #[test]
    fn sync_for_another_node_is_flagged() {
        let to_me = Message::sync(vec![], "east", "middle", MessageKind::SyncLeft).unwrap();
        let to_other = Message::sync(vec![], "east", "west", MessageKind::SyncLeft).unwrap();
        assert!(!misaddressed_sync("middle", &to_me));
        assert!(misaddressed_sync("middle", &to_other));

        // Only sync traffic is addressed node-to-node.
        let private = Message::private("alice", "bob", "hi").unwrap();
        assert!(!misaddressed_sync("middle", &private));
    }
}
