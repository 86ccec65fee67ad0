// UDP chat client for talking to a relay node.
//
// Architecture mirrors the relay's own loops on a smaller scale:
// - `connect()` binds an ephemeral UDP socket, sends `Connect`, and spawns a
//   reader thread.
// - The reader thread calls `recv_from` with a short timeout, decodes each
//   datagram, and pushes it into an `mpsc` channel. The timeout lets it
//   notice when the client is dropped.
// - The owning thread sends directly on the socket and drains the inbox with
//   `poll()` (non-blocking) or `recv_timeout()`.
//
// The relay learns a client's address from the source of its `Connect`
// datagram, so all later traffic must go out on the same socket; the reader
// uses a clone of it.
//
// This is not an interactive program. It is the protocol half of one, used
// by the integration tests and by anything embedding a chat client.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use linkchat_protocol::{MAX_DATAGRAM_SIZE, Message, decode, encode};
use tracing::debug;

use crate::error::RelayError;

/// How long the reader thread blocks before re-checking for shutdown.
const READ_POLL: Duration = Duration::from_millis(50);

pub struct ChatClient {
    socket: UdpSocket,
    server: SocketAddr,
    username: String,
    inbox: Receiver<Message>,
    keep_running: Arc<AtomicBool>,
    reader_thread: Option<JoinHandle<()>>,
    /// Number of messages sent so far, `Connect` included.
    sent: u64,
}

impl ChatClient {
    /// Bind a local socket, register with the relay at `server`, and start
    /// listening.
    pub fn connect(server: SocketAddr, username: &str) -> Result<Self, RelayError> {
        let bind_addr: SocketAddr = if server.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_read_timeout(Some(READ_POLL))?;

        let reader_socket = socket.try_clone()?;
        let keep_running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel();

        let keep_running_reader = Arc::clone(&keep_running);
        let reader_thread = thread::Builder::new()
            .name(format!("{username}-reader"))
            .spawn(move || reader_loop(&reader_socket, &tx, &keep_running_reader))?;

        let mut client = Self {
            socket,
            server,
            username: username.to_string(),
            inbox: rx,
            keep_running,
            reader_thread: Some(reader_thread),
            sent: 0,
        };
        let hello = Message::connect(username)?;
        client.send(&hello)?;
        Ok(client)
    }

    /// Chat to everyone on the relay node.
    pub fn send_chat(&mut self, text: &str) -> Result<(), RelayError> {
        let msg = Message::chat(self.username.as_str(), text)?;
        self.send(&msg)
    }

    /// Private message to one client, wherever in the chain it is.
    pub fn send_private(&mut self, destination: &str, text: &str) -> Result<(), RelayError> {
        let msg = Message::private(self.username.as_str(), destination, text)?;
        self.send(&msg)
    }

    /// Deregister from the relay. The socket stays open, so messages already
    /// in flight can still be polled.
    pub fn disconnect(&mut self) -> Result<(), RelayError> {
        let msg = Message::disconnect(self.username.as_str())?;
        self.send(&msg)
    }

    /// Drain all queued messages (non-blocking).
    pub fn poll(&self) -> Vec<Message> {
        self.inbox.try_iter().collect()
    }

    /// Wait up to `timeout` for the next message.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Message> {
        self.inbox.recv_timeout(timeout).ok()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn sent_count(&self) -> u64 {
        self.sent
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.socket.local_addr()?)
    }

    fn send(&mut self, message: &Message) -> Result<(), RelayError> {
        let datagram = encode(message)?;
        self.socket
            .send_to(&datagram, self.server)
            .map_err(|source| RelayError::TransportSendFailure {
                target: self.server,
                source,
            })?;
        self.sent += 1;
        Ok(())
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Reader thread: decode datagrams into the inbox until the client drops.
fn reader_loop(socket: &UdpSocket, tx: &Sender<Message>, keep_running: &AtomicBool) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    while keep_running.load(Ordering::SeqCst) {
        let len = match socket.recv_from(&mut buf) {
            Ok((len, _from)) => len,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => {
                debug!(error = %e, "client receive error");
                continue;
            }
        };
        match decode(&buf[..len]) {
            Ok(msg) => {
                if tx.send(msg).is_err() {
                    break;
                }
            }
            Err(e) => debug!(error = %e, "client dropped malformed datagram"),
        }
    }
}
