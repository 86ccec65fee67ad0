// Error type for building, encoding and decoding protocol messages.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The datagram could not be decoded into a valid `Message`.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A constructor was called with arguments that break a message
    /// invariant (empty source, wrong kind for the body).
    #[error("invalid message: {0}")]
    Invalid(String),

    /// The encoded datagram would not fit in a single UDP payload.
    #[error("message too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },
}
