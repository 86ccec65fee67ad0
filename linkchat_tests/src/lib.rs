// Test-only harness for running a whole relay chain in one process.
//
// `TestChain::start` boots one relay node per name, wired into a shared
// localhost topology, and offers synchronous waiting helpers for the
// asynchronous parts (neighbor resolution, roster sync, message arrival).
// Clients are the real `ChatClient` from the relay crate; nothing here
// replaces production code paths, it only adds polling with timeouts.
//
// See also: `tests/chain.rs` for the scenarios.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Once;
use std::thread;
use std::time::{Duration, Instant};

use linkchat_protocol::{ChainPosition, Message};
use linkchat_relay::{
    ChainTopology, ChatClient, NodeAddress, ServerConfig, ServerHandle, Side, start_server,
};

/// Default timeout for blocking waits.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep between polls.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

static INIT: Once = Once::new();

/// Install a test-writer tracing subscriber once per test binary.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Ask the OS for `n` currently free UDP ports on localhost.
fn free_ports(n: usize) -> Vec<u16> {
    let sockets: Vec<UdpSocket> = (0..n)
        .map(|_| UdpSocket::bind("127.0.0.1:0").expect("bind probe socket"))
        .collect();
    sockets
        .iter()
        .map(|s| s.local_addr().expect("probe addr").port())
        .collect()
}

/// Poll `cond` until it holds or `WAIT_TIMEOUT` passes.
pub fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(POLL_INTERVAL);
    }
    cond()
}

/// Receive on `client` until a message matching `pred` arrives.
pub fn wait_for(client: &ChatClient, pred: impl Fn(&Message) -> bool) -> Option<Message> {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match client.recv_timeout(remaining) {
            Some(msg) if pred(&msg) => return Some(msg),
            Some(_) => {}
            None => return None,
        }
    }
    None
}

/// Wait `window`, then return everything the client received.
pub fn collect_for(client: &ChatClient, window: Duration) -> Vec<Message> {
    thread::sleep(window);
    client.poll()
}

/// A running chain of relay nodes, index = chain position.
pub struct TestChain {
    topology: ChainTopology,
    nodes: Vec<Option<ServerHandle>>,
}

impl TestChain {
    /// Start one node per name, left to right.
    pub fn start(names: &[&str]) -> Self {
        init_tracing();
        let ports = free_ports(names.len());
        let nodes = names
            .iter()
            .zip(&ports)
            .map(|(name, port)| NodeAddress::new(*name, "127.0.0.1", *port))
            .collect();
        let topology = ChainTopology::new(nodes).expect("valid test topology");

        let mut chain = Self {
            topology,
            nodes: Vec::new(),
        };
        for position in 0..names.len() {
            let handle = chain.start_node(position);
            chain.nodes.push(Some(handle));
        }
        chain
    }

    fn start_node(&self, position: usize) -> ServerHandle {
        let position = u8::try_from(position).expect("test chains are short");
        let config = ServerConfig {
            sync_interval: Duration::from_millis(50),
            poll_interval: Duration::from_millis(20),
            ..ServerConfig::for_position(self.topology.clone(), ChainPosition(position))
        };
        let (handle, _addr) = start_server(config).expect("start relay node");
        handle
    }

    pub fn node(&self, position: usize) -> &ServerHandle {
        self.nodes[position].as_ref().expect("node is stopped")
    }

    pub fn addr(&self, position: usize) -> SocketAddr {
        self.node(position).local_addr()
    }

    /// Attach a new client to the node at `position`.
    pub fn client(&self, position: usize, username: &str) -> ChatClient {
        ChatClient::connect(self.addr(position), username).expect("client connect")
    }

    /// Stop one node, leaving a gap in the chain.
    pub fn stop_node(&mut self, position: usize) {
        if let Some(handle) = self.nodes[position].take() {
            handle.stop();
        }
    }

    /// Start a stopped node again on the same port.
    pub fn restart_node(&mut self, position: usize) {
        assert!(self.nodes[position].is_none(), "node {position} is running");
        let handle = self.start_node(position);
        self.nodes[position] = Some(handle);
    }

    /// Wait until every running node has resolved each neighbor the
    /// topology gives it.
    pub fn wait_until_linked(&self) -> bool {
        wait_until(|| {
            self.nodes.iter().enumerate().all(|(position, node)| {
                let Some(node) = node else {
                    return true;
                };
                let registry = node.registry().lock();
                let left_ok = position == 0 || registry.neighbor(Side::Left).is_some();
                let right_ok =
                    position + 1 == self.nodes.len() || registry.neighbor(Side::Right).is_some();
                left_ok && right_ok
            })
        })
    }

    /// Wait until the node at `position` holds exactly `expected` as its
    /// roster for `side`.
    pub fn wait_for_roster(&self, position: usize, side: Side, expected: &[&str]) -> bool {
        wait_until(|| self.node(position).registry().lock().roster(side) == expected)
    }

    pub fn stop(mut self) {
        for position in 0..self.nodes.len() {
            self.stop_node(position);
        }
    }
}
