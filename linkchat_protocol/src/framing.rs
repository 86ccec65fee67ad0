// Datagram framing for `Message`.
//
// Wire layout of one datagram:
//
//   +---------+----------------+-----------------------------+
//   | version | length (u32 BE)| JSON-serialized `Message`   |
//   | 1 byte  | 4 bytes        | `length` bytes              |
//   +---------+----------------+-----------------------------+
//
// UDP already delivers whole datagrams, so the length prefix is not needed
// to find message boundaries. It is there so `decode` can tell a truncated
// datagram (receive buffer too small, or a sender bug) from a complete one
// instead of handing a cut-off JSON document to serde. A datagram whose
// declared length disagrees with the bytes present in either direction is
// rejected.

use crate::error::ProtocolError;
use crate::message::Message;

/// Version byte written at the start of every datagram.
pub const PROTOCOL_VERSION: u8 = 1;

/// Version byte plus length prefix.
pub const HEADER_LEN: usize = 5;

/// Largest UDP payload over IPv4. Receive buffers are sized to this so a
/// datagram is never silently cut short by the socket.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Serialize a message into a single datagram.
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let json = serde_json::to_vec(message).map_err(|e| ProtocolError::Invalid(e.to_string()))?;
    let total = HEADER_LEN + json.len();
    if total > MAX_DATAGRAM_SIZE {
        return Err(ProtocolError::TooLarge {
            len: total,
            max: MAX_DATAGRAM_SIZE,
        });
    }
    let len = u32::try_from(json.len()).map_err(|_| ProtocolError::TooLarge {
        len: total,
        max: MAX_DATAGRAM_SIZE,
    })?;

    let mut datagram = Vec::with_capacity(total);
    datagram.push(PROTOCOL_VERSION);
    datagram.extend_from_slice(&len.to_be_bytes());
    datagram.extend_from_slice(&json);
    Ok(datagram)
}

/// Parse one datagram. Any structural problem yields
/// `ProtocolError::Malformed`; no partially-built message escapes.
pub fn decode(datagram: &[u8]) -> Result<Message, ProtocolError> {
    let Some((header, payload)) = datagram.split_first_chunk::<HEADER_LEN>() else {
        return Err(ProtocolError::Malformed(format!(
            "datagram too short: {} bytes (header is {HEADER_LEN})",
            datagram.len()
        )));
    };
    let [version, len @ ..] = *header;
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::Malformed(format!(
            "unsupported protocol version {version}"
        )));
    }

    let declared = u32::from_be_bytes(len) as usize;
    if payload.len() < declared {
        return Err(ProtocolError::Malformed(format!(
            "truncated payload: {} of {declared} bytes",
            payload.len()
        )));
    }
    if payload.len() > declared {
        return Err(ProtocolError::Malformed(format!(
            "{} trailing bytes after payload",
            payload.len() - declared
        )));
    }

    let message: Message =
        serde_json::from_slice(payload).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    message.validate().map_err(ProtocolError::Malformed)?;
    Ok(message)
}
