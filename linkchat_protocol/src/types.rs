// Core vocabulary types for the linkchat protocol.
//
// `MessageKind` is the closed set of datagram types every node and client
// understands. `ChainPosition` is a node's ordinal slot in the relay chain;
// neighbor positions are derived from it, and the topology decides whether
// a derived position actually exists.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Destination sentinel meaning "every locally connected client except the
/// sender".
pub const BROADCAST: &str = "broadcast";

/// The six datagram types of the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Client registers with a node.
    Connect,
    /// Client deregisters from a node.
    Disconnect,
    /// Free-text message, usually broadcast.
    Chat,
    /// Free-text message addressed to one client.
    PrivateMessage,
    /// Roster pushed by a node to its left neighbor.
    SyncLeft,
    /// Roster pushed by a node to its right neighbor.
    SyncRight,
}

impl MessageKind {
    /// Roster syncs are node-to-node control traffic and never relayed.
    pub fn is_sync(self) -> bool {
        matches!(self, MessageKind::SyncLeft | MessageKind::SyncRight)
    }

    /// True if messages of this kind carry a roster body rather than text.
    pub fn carries_roster(self) -> bool {
        self.is_sync()
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Connect => "connect",
            MessageKind::Disconnect => "disconnect",
            MessageKind::Chat => "chat",
            MessageKind::PrivateMessage => "private",
            MessageKind::SyncLeft => "sync-left",
            MessageKind::SyncRight => "sync-right",
        };
        f.write_str(name)
    }
}

/// Ordinal position of a relay node in the chain. Position 0 is the
/// leftmost node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainPosition(pub u8);

impl ChainPosition {
    /// Position immediately to the left, or `None` at the left edge.
    pub fn left(self) -> Option<ChainPosition> {
        self.0.checked_sub(1).map(ChainPosition)
    }

    /// Position immediately to the right. Whether a node exists there is up
    /// to the topology.
    pub fn right(self) -> Option<ChainPosition> {
        self.0.checked_add(1).map(ChainPosition)
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for ChainPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leftmost_position_has_no_left() {
        assert_eq!(ChainPosition(0).left(), None);
        assert_eq!(ChainPosition(0).right(), Some(ChainPosition(1)));
    }

    #[test]
    fn interior_position_has_both_sides() {
        assert_eq!(ChainPosition(3).left(), Some(ChainPosition(2)));
        assert_eq!(ChainPosition(3).right(), Some(ChainPosition(4)));
    }

    #[test]
    fn top_of_range_has_no_right() {
        assert_eq!(ChainPosition(u8::MAX).right(), None);
    }

    #[test]
    fn only_sync_kinds_carry_rosters() {
        assert!(MessageKind::SyncLeft.carries_roster());
        assert!(MessageKind::SyncRight.carries_roster());
        assert!(!MessageKind::Chat.carries_roster());
        assert!(!MessageKind::Connect.is_sync());
    }
}
