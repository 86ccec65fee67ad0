// linkchat_relay — relay node for the linkchat chain.
//
// Relay nodes form a linear chain. Each node knows only its immediate left
// and right neighbor. Clients attach to one node over UDP; chat is relayed
// to the node's other clients, and private messages for clients that live
// on a neighbor are forwarded one hop, using the client rosters neighbors
// push to each other on a timer.
//
// Module overview:
// - `registry.rs`:  Connection registry (local client sessions, neighbor
//                   rosters and endpoints) plus the routing decision
//                   (`plan_delivery`). Pure state, no I/O.
// - `server.rs`:    UDP socket and the three loops (Ingest, Dispatch,
//                   Neighbor-Sync) that drive the registry. `start_server`
//                   is the entry point.
// - `config.rs`:    `ChainTopology` (position → host/port table and the
//                   neighbor-exists predicates) and `ServerConfig`.
// - `transport.rs`: `SecondaryTransport` hook called for every relayed
//                   message; `NoopTransport` by default.
// - `client.rs`:    `ChatClient`, a UDP client speaking the same protocol.
// - `error.rs`:     `RelayError`.
//
// Dependencies: `linkchat_protocol` (message model and datagram codec).
//
// The relay runs as a standalone binary (`main.rs`) or embedded via the
// library API (`start_server`), which is how the integration tests run
// several nodes in one process.

pub mod client;
pub mod config;
pub mod error;
pub mod registry;
pub mod server;
pub mod transport;

pub use client::ChatClient;
pub use config::{ChainTopology, NodeAddress, ServerConfig};
pub use error::RelayError;
pub use registry::{Delivery, Registry, RemoteConnection, SharedRegistry, Side};
pub use server::{ServerHandle, StatsSnapshot, start_server, start_server_with_transport};
pub use transport::{NoopTransport, SecondaryTransport};
