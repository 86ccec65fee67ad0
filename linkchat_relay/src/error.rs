// Operational error taxonomy for a relay node.
//
// None of these end a loop. Ingest logs `MalformedMessage` and drops the
// datagram; Dispatch logs `TransportSendFailure` and `RoutingMiss` and moves
// on to the next message; Neighbor-Sync logs `NeighborUnreachable` and
// retries on the next tick. Only `start_server` surfaces errors to its
// caller (bind failures, bad topology).

use std::net::SocketAddr;

use linkchat_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("malformed datagram from {from}: {source}")]
    MalformedMessage {
        from: SocketAddr,
        #[source]
        source: ProtocolError,
    },

    #[error("send to {target} failed: {source}")]
    TransportSendFailure {
        target: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("neighbor {name} at {host}:{port} unreachable: {reason}")]
    NeighborUnreachable {
        name: String,
        host: String,
        port: u16,
        reason: String,
    },

    #[error("no route to {destination} (message from {source_id} dropped)")]
    RoutingMiss {
        destination: String,
        source_id: String,
    },

    #[error("topology error: {0}")]
    Topology(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
