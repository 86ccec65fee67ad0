// linkchat_protocol — wire protocol for the linkchat relay chain.
//
// This crate defines the datagram message model and its byte encoding, used
// by relay nodes (`linkchat_relay`) and by chat clients. It is shared by
// both sides and has no networking code of its own.
//
// Module overview:
// - `types.rs`:    `MessageKind`, the `BROADCAST` sentinel, `ChainPosition`.
// - `message.rs`:  The immutable `Message` value and its constructors.
// - `framing.rs`:  `encode`/`decode` between `Message` and one UDP datagram:
//                  version byte, 4-byte big-endian length, JSON payload.
// - `error.rs`:    `ProtocolError`.
//
// Design decisions:
// - **JSON payload.** Self-describing and easy to inspect with a packet
//   capture; chat datagrams are tiny, so the size overhead does not matter.
// - **Validated construction.** A `Message` cannot exist with a body that
//   disagrees with its kind, whether it was built locally or decoded.

pub mod error;
pub mod framing;
pub mod message;
pub mod types;

pub use error::ProtocolError;
pub use framing::{MAX_DATAGRAM_SIZE, PROTOCOL_VERSION, decode, encode};
pub use message::{Body, Message};
pub use types::{BROADCAST, ChainPosition, MessageKind};
