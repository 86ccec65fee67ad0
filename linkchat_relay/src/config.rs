// Static configuration for a relay node.
//
// `ChainTopology` is the ordered host/port table shared by every node in the
// chain. A node only ever consults it for its own listen port and name and
// for its two immediate neighbors; the validity predicates (`left_of`,
// `right_of`) are what tell the Neighbor-Sync loop that a chain boundary has
// been reached and that side should stay permanently empty.
//
// Topologies are plain JSON so the same file can be handed to every node:
//
//   { "nodes": [ { "name": "left",   "host": "127.0.0.1", "port": 8080 },
//                { "name": "middle", "host": "127.0.0.1", "port": 8081 } ] }
//
// `ServerConfig` adds the per-node knobs: which position this process is,
// where to bind, and the loop cadences.

use std::collections::BTreeSet;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use linkchat_protocol::ChainPosition;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Positions are `u8`, so a chain holds at most this many nodes.
pub const MAX_CHAIN_LEN: usize = u8::MAX as usize + 1;

/// One row of the topology table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }
}

/// Ordered node table; index in `nodes` is the chain position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTopology {
    pub nodes: Vec<NodeAddress>,
}

impl Default for ChainTopology {
    fn default() -> Self {
        Self {
            nodes: vec![
                NodeAddress::new("left", "127.0.0.1", 8080),
                NodeAddress::new("middle", "127.0.0.1", 8081),
                NodeAddress::new("right", "127.0.0.1", 8082),
            ],
        }
    }
}

impl ChainTopology {
    pub fn new(nodes: Vec<NodeAddress>) -> Result<Self, RelayError> {
        let topology = Self { nodes };
        topology.validate()?;
        Ok(topology)
    }

    /// Read and validate a JSON topology file.
    pub fn load(path: &Path) -> Result<Self, RelayError> {
        let text = std::fs::read_to_string(path)?;
        let topology: Self = serde_json::from_str(&text)
            .map_err(|e| RelayError::Topology(format!("{}: {e}", path.display())))?;
        topology.validate()?;
        Ok(topology)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.nodes.is_empty() {
            return Err(RelayError::Topology("chain has no nodes".into()));
        }
        if self.nodes.len() > MAX_CHAIN_LEN {
            return Err(RelayError::Topology(format!(
                "chain has {} nodes (max {MAX_CHAIN_LEN})",
                self.nodes.len()
            )));
        }
        let mut names = BTreeSet::new();
        for node in &self.nodes {
            if node.name.is_empty() || node.host.is_empty() {
                return Err(RelayError::Topology(format!(
                    "node entry with empty name or host: {node:?}"
                )));
            }
            if !names.insert(node.name.as_str()) {
                return Err(RelayError::Topology(format!(
                    "duplicate node name {:?}",
                    node.name
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True if `position` falls within the configured chain.
    pub fn is_valid(&self, position: ChainPosition) -> bool {
        position.index() < self.nodes.len()
    }

    pub fn node(&self, position: ChainPosition) -> Option<&NodeAddress> {
        self.nodes.get(position.index())
    }

    pub fn name_of(&self, position: ChainPosition) -> Option<&str> {
        self.node(position).map(|node| node.name.as_str())
    }

    /// The left neighbor's position, if the chain has one.
    pub fn left_of(&self, position: ChainPosition) -> Option<ChainPosition> {
        position.left().filter(|p| self.is_valid(*p))
    }

    /// The right neighbor's position, if the chain has one.
    pub fn right_of(&self, position: ChainPosition) -> Option<ChainPosition> {
        position.right().filter(|p| self.is_valid(*p))
    }

    /// Resolve a node's host/port to a socket address, preferring IPv4 to
    /// match the IPv4 listening sockets.
    pub fn resolve(&self, position: ChainPosition) -> Result<SocketAddr, RelayError> {
        let node = self
            .node(position)
            .ok_or_else(|| RelayError::Topology(format!("no node at position {position}")))?;
        let unreachable = |reason: String| RelayError::NeighborUnreachable {
            name: node.name.clone(),
            host: node.host.clone(),
            port: node.port,
            reason,
        };

        let addrs: Vec<SocketAddr> = (node.host.as_str(), node.port)
            .to_socket_addrs()
            .map_err(|e| unreachable(e.to_string()))?
            .collect();
        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| unreachable("host resolved to no addresses".into()))
    }
}

/// Everything needed to start one relay node.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// This node's slot in `topology`.
    pub position: ChainPosition,
    pub topology: ChainTopology,
    /// Listen port override. `None` uses the topology's port for
    /// `position`; `Some(0)` lets the OS choose.
    pub port: Option<u16>,
    pub bind_host: String,
    /// How often rosters are pushed to neighbors (and absent neighbors
    /// re-resolved). Raised to `poll_interval` if shorter.
    pub sync_interval: Duration,
    /// Upper bound on how long any loop blocks before re-checking the
    /// shutdown flag.
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            position: ChainPosition(0),
            topology: ChainTopology::default(),
            port: None,
            bind_host: "127.0.0.1".into(),
            sync_interval: Duration::from_millis(250),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl ServerConfig {
    pub fn for_position(topology: ChainTopology, position: ChainPosition) -> Self {
        Self {
            position,
            topology,
            ..Self::default()
        }
    }

    /// This node's own entry in the topology.
    pub fn own_node(&self) -> Result<&NodeAddress, RelayError> {
        self.topology.node(self.position).ok_or_else(|| {
            RelayError::Topology(format!(
                "position {} is outside a chain of {} nodes",
                self.position,
                self.topology.len()
            ))
        })
    }

    pub fn listen_port(&self) -> Result<u16, RelayError> {
        match self.port {
            Some(port) => Ok(port),
            None => Ok(self.own_node()?.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn leftmost_node_has_no_left_neighbor() {
        let topology = ChainTopology::default();
        assert_eq!(topology.left_of(ChainPosition(0)), None);
        assert_eq!(topology.right_of(ChainPosition(0)), Some(ChainPosition(1)));
    }

    #[test]
    fn rightmost_node_has_no_right_neighbor() {
        let topology = ChainTopology::default();
        assert_eq!(topology.right_of(ChainPosition(2)), None);
        assert_eq!(topology.left_of(ChainPosition(2)), Some(ChainPosition(1)));
    }

    #[test]
    fn single_node_chain_has_no_neighbors() {
        let topology =
            ChainTopology::new(vec![NodeAddress::new("solo", "localhost", 9000)]).unwrap();
        assert_eq!(topology.left_of(ChainPosition(0)), None);
        assert_eq!(topology.right_of(ChainPosition(0)), None);
    }

    #[test]
    fn empty_chain_rejected() {
        assert!(matches!(ChainTopology::new(vec![]), Err(RelayError::Topology(_))));
    }

    #[test]
    fn duplicate_names_rejected() {
        let result = ChainTopology::new(vec![
            NodeAddress::new("a", "127.0.0.1", 1),
            NodeAddress::new("a", "127.0.0.1", 2),
        ]);
        assert!(matches!(result, Err(RelayError::Topology(_))));
    }

    #[test]
    fn load_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"nodes":[{{"name":"west","host":"127.0.0.1","port":7001}},
                          {{"name":"east","host":"127.0.0.1","port":7002}}]}}"#
        )
        .unwrap();

        let topology = ChainTopology::load(file.path()).unwrap();
        assert_eq!(topology.len(), 2);
        assert_eq!(topology.name_of(ChainPosition(1)), Some("east"));
    }

    #[test]
    fn load_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            ChainTopology::load(file.path()),
            Err(RelayError::Topology(_))
        ));
    }

    #[test]
    fn resolves_localhost() {
        let topology = ChainTopology::default();
        let addr = topology.resolve(ChainPosition(1)).unwrap();
        assert_eq!(addr, "127.0.0.1:8081".parse().unwrap());
    }

    #[test]
    fn unresolvable_host_is_neighbor_unreachable() {
        let topology =
            ChainTopology::new(vec![NodeAddress::new("ghost", "no-such-host.invalid", 9)]).unwrap();
        assert!(matches!(
            topology.resolve(ChainPosition(0)),
            Err(RelayError::NeighborUnreachable { .. })
        ));
    }

    #[test]
    fn listen_port_defaults_to_topology() {
        let config = ServerConfig::for_position(ChainTopology::default(), ChainPosition(2));
        assert_eq!(config.listen_port().unwrap(), 8082);

        let config = ServerConfig {
            port: Some(0),
            ..config
        };
        assert_eq!(config.listen_port().unwrap(), 0);
    }

    #[test]
    fn out_of_range_position_rejected() {
        let config = ServerConfig::for_position(ChainTopology::default(), ChainPosition(7));
        assert!(config.own_node().is_err());
    }
}
