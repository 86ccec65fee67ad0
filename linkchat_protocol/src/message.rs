// The single datagram type exchanged between clients and relay nodes.
//
// A `Message` is an immutable value: kind, source id, destination id, and a
// body whose variant is fixed by the kind. Chat-like kinds (connect,
// disconnect, chat, private) carry free text; the two sync kinds carry the
// ordered list of client ids directly attached to the sending node.
//
// Fields are private. Every `Message` in the process came from one of the
// constructors here or from `framing::decode`, and both paths run
// `validate`, so code holding a `Message` never has to re-check that the
// body matches the kind.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{BROADCAST, MessageKind};

/// Kind-dependent payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Body {
    Text(String),
    Roster(Vec<String>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    kind: MessageKind,
    source: String,
    destination: String,
    body: Body,
}

impl Message {
    /// General constructor for the text-carrying kinds.
    pub fn text(
        kind: MessageKind,
        source: impl Into<String>,
        destination: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        let message = Self {
            kind,
            source: source.into(),
            destination: destination.into(),
            body: Body::Text(text.into()),
        };
        message.validate().map_err(ProtocolError::Invalid)?;
        Ok(message)
    }

    /// Roster sync from node `from` to neighbor `to`. `kind` must be
    /// `SyncLeft` (sent leftward) or `SyncRight` (sent rightward).
    pub fn sync(
        roster: Vec<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        kind: MessageKind,
    ) -> Result<Self, ProtocolError> {
        let message = Self {
            kind,
            source: from.into(),
            destination: to.into(),
            body: Body::Roster(roster),
        };
        message.validate().map_err(ProtocolError::Invalid)?;
        Ok(message)
    }

    pub fn connect(source: impl Into<String>) -> Result<Self, ProtocolError> {
        Self::text(MessageKind::Connect, source, BROADCAST, "")
    }

    pub fn disconnect(source: impl Into<String>) -> Result<Self, ProtocolError> {
        Self::text(MessageKind::Disconnect, source, BROADCAST, "")
    }

    /// Chat to everyone on the sender's node.
    pub fn chat(source: impl Into<String>, text: impl Into<String>) -> Result<Self, ProtocolError> {
        Self::text(MessageKind::Chat, source, BROADCAST, text)
    }

    pub fn private(
        source: impl Into<String>,
        destination: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        Self::text(MessageKind::PrivateMessage, source, destination, text)
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn source_id(&self) -> &str {
        &self.source
    }

    pub fn destination_id(&self) -> &str {
        &self.destination
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Text body, or `None` for sync messages.
    pub fn text_body(&self) -> Option<&str> {
        match &self.body {
            Body::Text(text) => Some(text),
            Body::Roster(_) => None,
        }
    }

    /// Roster body, or `None` for text-carrying messages.
    pub fn roster(&self) -> Option<&[String]> {
        match &self.body {
            Body::Roster(ids) => Some(ids),
            Body::Text(_) => None,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination == BROADCAST
    }

    /// Check the structural invariants. Returns a human-readable reason on
    /// failure; callers wrap it in the appropriate `ProtocolError` variant.
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.source.is_empty() {
            return Err("empty source id".into());
        }
        match (&self.body, self.kind.carries_roster()) {
            (Body::Roster(_), true) | (Body::Text(_), false) => Ok(()),
            (Body::Roster(_), false) => Err(format!("{} message with a roster body", self.kind)),
            (Body::Text(_), true) => Err(format!("{} message with a text body", self.kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_defaults_to_broadcast() {
        let msg = Message::chat("alice", "hi all").unwrap();
        assert_eq!(msg.kind(), MessageKind::Chat);
        assert!(msg.is_broadcast());
        assert_eq!(msg.text_body(), Some("hi all"));
        assert_eq!(msg.roster(), None);
        assert_eq!(msg.body(), &Body::Text("hi all".into()));
    }

    #[test]
    fn private_keeps_destination() {
        let msg = Message::private("alice", "bob", "psst").unwrap();
        assert_eq!(msg.destination_id(), "bob");
        assert!(!msg.is_broadcast());
    }

    #[test]
    fn sync_carries_roster_in_order() {
        let roster = vec!["carol".to_string(), "alice".to_string()];
        let msg = Message::sync(roster.clone(), "middle", "left", MessageKind::SyncLeft).unwrap();
        assert_eq!(msg.roster(), Some(roster.as_slice()));
        assert_eq!(msg.body(), &Body::Roster(roster.clone()));
        assert_eq!(msg.source_id(), "middle");
        assert_eq!(msg.destination_id(), "left");
    }

    #[test]
    fn empty_source_rejected() {
        let err = Message::chat("", "hello").unwrap_err();
        assert!(matches!(err, ProtocolError::Invalid(_)));
    }

    #[test]
    fn sync_constructor_rejects_text_kind() {
        let err = Message::sync(vec![], "middle", "left", MessageKind::Chat).unwrap_err();
        assert!(matches!(err, ProtocolError::Invalid(_)));
    }

    #[test]
    fn text_constructor_rejects_sync_kind() {
        let err = Message::text(MessageKind::SyncRight, "middle", "right", "x").unwrap_err();
        assert!(matches!(err, ProtocolError::Invalid(_)));
    }

    #[test]
    fn connect_and_disconnect_have_empty_text() {
        let connect = Message::connect("dave").unwrap();
        let disconnect = Message::disconnect("dave").unwrap();
        assert_eq!(connect.kind(), MessageKind::Connect);
        assert_eq!(disconnect.kind(), MessageKind::Disconnect);
        assert_eq!(connect.text_body(), Some(""));
        assert!(disconnect.is_broadcast());
    }
}
