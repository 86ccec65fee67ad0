// Secondary delivery channel invoked by the Dispatch loop.
//
// Every relayed message goes out over UDP and is also handed to one
// `SecondaryTransport`, independently of how the UDP send went. The relay
// ships only `NoopTransport`, a placeholder for a short-range channel
// (Bluetooth) that nodes may grow later. Implementations run on the
// Dispatch thread, so a slow `deliver` delays the relay queue.

use linkchat_protocol::Message;

use crate::error::RelayError;

pub trait SecondaryTransport: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Deliver one message. Errors are logged by the caller and never
    /// affect the UDP path.
    fn deliver(&self, message: &Message) -> Result<(), RelayError>;
}

/// Accepts everything and delivers nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTransport;

impl SecondaryTransport for NoopTransport {
    fn name(&self) -> &str {
        "bluetooth"
    }

    fn deliver(&self, _message: &Message) -> Result<(), RelayError> {
        Ok(())
    }
}
