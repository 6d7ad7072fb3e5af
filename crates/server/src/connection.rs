//! Line-oriented connection handles.
//!
//! A [`Connection`] is the transport adapter between a TCP socket and the
//! engine. It owns two background tasks:
//!
//! - **reader**: reads bytes, splits them into lines with
//!   [`api::try_decode_line`], and pushes each line into a bounded inbox
//! - **writer**: drains an unbounded outbox and writes each line with
//!   [`api::encode_line`]
//!
//! Engine code never touches the socket. It calls [`Sender::send_line`]
//! (non-blocking, safe to call while holding registry or broker locks) and
//! [`Connection::next_line`]. When the writer task dies the outbox closes and
//! every later send returns [`TransportError::Closed`].
//!
//! [`Connection::pair`] builds the same handle over in-memory channels, which
//! is how the engine is tested without sockets.

use crate::error::TransportError;
use api::{encode_line, try_decode_line};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Inbound lines buffered per connection before the reader applies backpressure.
const INBOX_CAPACITY: usize = 64;

/// Something that can receive a line of text.
pub trait Sender {
    fn send_line(&self, line: &str) -> Result<(), TransportError>;
}

/// Something bound to a username.
pub trait Identified {
    fn username(&self) -> &str;
}

/// Items queued for the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Line(String),
    /// Flush everything queued so far, then shut the socket down.
    Close,
}

/// The far side of an in-memory [`Connection`].
pub struct ConnectionIo {
    /// Lines the engine sent to this connection.
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    /// Feed lines to the engine as if the peer had typed them.
    pub inbound: mpsc::Sender<String>,
}

impl ConnectionIo {
    /// Take every line sent so far without waiting.
    pub fn drain(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(item) = self.outbound.try_recv() {
            if let Outbound::Line(line) = item {
                lines.push(line);
            }
        }
        lines
    }
}

/// A connected peer's socket, as seen by the engine.
#[derive(Debug)]
pub struct Connection {
    remote: SocketAddr,
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: Mutex<mpsc::Receiver<String>>,
    closing: AtomicBool,
    closed: CancellationToken,
}

impl Connection {
    fn new(
        remote: SocketAddr,
        outbound: mpsc::UnboundedSender<Outbound>,
        inbound: mpsc::Receiver<String>,
    ) -> Self {
        Self {
            remote,
            outbound,
            inbound: Mutex::new(inbound),
            closing: AtomicBool::new(false),
            closed: CancellationToken::new(),
        }
    }

    /// Build a connection over in-memory channels.
    pub fn pair(remote: SocketAddr) -> (Self, ConnectionIo) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(INBOX_CAPACITY);
        (
            Self::new(remote, out_tx, in_rx),
            ConnectionIo {
                outbound: out_rx,
                inbound: in_tx,
            },
        )
    }

    /// Wrap a TCP stream, spawning its reader and writer tasks.
    pub fn spawn(stream: TcpStream, max_line_length: usize) -> Result<Self, TransportError> {
        let remote = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(INBOX_CAPACITY);
        let connection = Self::new(remote, out_tx, in_rx);

        tokio::spawn(read_loop(
            read_half,
            in_tx,
            connection.closed.clone(),
            max_line_length,
            remote,
        ));
        tokio::spawn(write_loop(write_half, out_rx, remote));

        Ok(connection)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Wait for the next line from the peer.
    ///
    /// Returns `None` once the peer hung up or the connection was closed
    /// locally. Cancel-safe: dropping the future never loses a line.
    pub async fn next_line(&self) -> Option<String> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            line = inbound.recv() => line,
        }
    }

    /// Close the connection. Returns `false` if it was already closing.
    pub fn close(&self) -> bool {
        if self.closing.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.closed.cancel();
        let _ = self.outbound.send(Outbound::Close);
        debug!(remote = %self.remote, "connection closed locally");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }
}

impl Sender for Connection {
    fn send_line(&self, line: &str) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(Outbound::Line(line.to_string()))
            .map_err(|_| TransportError::Closed)
    }
}

/// Reader task: split the byte stream into lines and queue them.
async fn read_loop(
    mut reader: OwnedReadHalf,
    inbox: mpsc::Sender<String>,
    closed: CancellationToken,
    max_line_length: usize,
    remote: SocketAddr,
) {
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        let mut chunk = [0u8; 1024];
        let read = tokio::select! {
            _ = closed.cancelled() => break,
            read = reader.read(&mut chunk) => read,
        };

        match read {
            Ok(0) => {
                debug!(%remote, "stream closed by peer");
                break;
            }
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                loop {
                    match try_decode_line(&mut buf, max_line_length) {
                        Ok(Some(line)) => {
                            let queued = tokio::select! {
                                _ = closed.cancelled() => return,
                                queued = inbox.send(line) => queued,
                            };
                            if queued.is_err() {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(%remote, "dropping connection: {e}");
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                debug!(%remote, "stream read error (likely disconnect): {e:?}");
                break;
            }
        }
    }
}

/// Writer task: the only place that writes to the socket.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbox: mpsc::UnboundedReceiver<Outbound>,
    remote: SocketAddr,
) {
    while let Some(item) = outbox.recv().await {
        match item {
            Outbound::Line(line) => {
                if let Err(e) = writer.write_all(&encode_line(&line)).await {
                    debug!(%remote, "stream write error: {e:?}");
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = writer.shutdown().await;
}
