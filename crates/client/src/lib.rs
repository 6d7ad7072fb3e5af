//! Parlor client library.
//!
//! A small line-oriented client for the Parlor server. The terminal binary
//! uses it to talk to a server interactively; the server's integration tests
//! use it to script whole conversations with per-line timeouts.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use std::time::Duration;
//!
//! let mut alice = client::Client::login("127.0.0.1:12345", "alice").await?;
//! alice.send("play bob").await?;
//! let reply = alice
//!     .expect_line(|l| l.contains("Challenge sent"), Duration::from_secs(2))
//!     .await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result, anyhow, bail};
use api::{DEFAULT_MAX_LINE_LENGTH, USERNAME_PROMPT, encode_line, try_decode_line};
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::{Instant, timeout};
use tracing::debug;

/// How long [`Client::login`] waits for each server reply.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Sending half of a connection.
pub struct ClientWriter {
    inner: OwnedWriteHalf,
}

impl ClientWriter {
    /// Send one line; the delimiter is added here.
    pub async fn send(&mut self, line: &str) -> Result<()> {
        self.inner
            .write_all(&encode_line(line))
            .await
            .context("failed to send line")
    }

    /// Half-close the connection.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Receiving half of a connection.
pub struct ClientReader {
    inner: OwnedReadHalf,
    buf: BytesMut,
}

impl ClientReader {
    /// Next line from the server, or `None` once it hung up.
    ///
    /// Cancel-safe: bytes already read stay buffered.
    pub async fn recv(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = try_decode_line(&mut self.buf, DEFAULT_MAX_LINE_LENGTH)? {
                return Ok(Some(line));
            }
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                return Ok(None);
            }
        }
    }
}

/// A connection to a Parlor server.
pub struct Client {
    writer: ClientWriter,
    reader: ClientReader,
}

impl Client {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .context("failed to connect to server")?;
        debug!(peer = ?stream.peer_addr().ok(), "connected");
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            writer: ClientWriter { inner: write_half },
            reader: ClientReader {
                inner: read_half,
                buf: BytesMut::with_capacity(1024),
            },
        })
    }

    /// Connect and claim `username`, waiting for the welcome line.
    pub async fn login(addr: impl ToSocketAddrs, username: &str) -> Result<Self> {
        let mut client = Self::connect(addr).await?;
        client
            .expect_line(|l| l.contains(USERNAME_PROMPT), LOGIN_TIMEOUT)
            .await?;
        client.send(username).await?;
        client
            .expect_line(|l| l.contains("Welcome"), LOGIN_TIMEOUT)
            .await
            .with_context(|| format!("login as {username} failed"))?;
        Ok(client)
    }

    pub async fn send(&mut self, line: &str) -> Result<()> {
        self.writer.send(line).await
    }

    pub async fn recv(&mut self) -> Result<Option<String>> {
        self.reader.recv().await
    }

    /// Next line within `wait`. Errors on timeout or hang-up.
    pub async fn next_line(&mut self, wait: Duration) -> Result<String> {
        match timeout(wait, self.reader.recv()).await {
            Ok(Ok(Some(line))) => Ok(line),
            Ok(Ok(None)) => bail!("server closed the connection"),
            Ok(Err(e)) => Err(e),
            Err(_) => bail!("no line within {wait:?}"),
        }
    }

    /// Read until a line matches `pred`, skipping the rest.
    pub async fn expect_line<F>(&mut self, mut pred: F, wait: Duration) -> Result<String>
    where
        F: FnMut(&str) -> bool,
    {
        let deadline = Instant::now() + wait;
        let mut skipped = Vec::new();
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let line = match timeout(left, self.reader.recv()).await {
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => {
                    return Err(anyhow!("server closed the connection; saw {skipped:?}"));
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(anyhow!("no matching line within {wait:?}; saw {skipped:?}")),
            };
            if pred(&line) {
                return Ok(line);
            }
            skipped.push(line);
        }
    }

    /// Read lines until none arrives for `quiet`.
    pub async fn drain(&mut self, quiet: Duration) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(Ok(Some(line))) = timeout(quiet, self.reader.recv()).await {
            lines.push(line);
        }
        lines
    }

    /// Wait for the server to hang up, returning whatever arrived before.
    pub async fn expect_closed(&mut self, wait: Duration) -> Result<Vec<String>> {
        let deadline = Instant::now() + wait;
        let mut lines = Vec::new();
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match timeout(left, self.reader.recv()).await {
                Ok(Ok(Some(line))) => lines.push(line),
                Ok(Ok(None)) => return Ok(lines),
                // A reset counts as closed.
                Ok(Err(_)) => return Ok(lines),
                Err(_) => bail!("connection still open after {wait:?}; saw {lines:?}"),
            }
        }
    }

    /// Split into independently owned halves.
    pub fn split(self) -> (ClientWriter, ClientReader) {
        (self.writer, self.reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    /// A one-shot fake server that runs `script` against the accepted socket.
    async fn fake_server<F, Fut>(script: F) -> std::net::SocketAddr
    where
        F: FnOnce(TcpStream) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            script(stream).await;
        });
        addr
    }

    #[tokio::test]
    async fn test_login_handshake() {
        let addr = fake_server(|stream| async move {
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            write.write_all(b"Server << Enter your username:\n").await.unwrap();
            assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("alice"));
            write.write_all(b"Server << Welcome alice :)\n").await.unwrap();
            write.write_all(b"bob << hi\n").await.unwrap();
        })
        .await;

        let mut client = Client::login(addr, "alice").await.unwrap();
        assert_eq!(
            client.next_line(Duration::from_secs(2)).await.unwrap(),
            "bob << hi"
        );
        assert!(client.expect_closed(Duration::from_secs(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expect_line_times_out() {
        let addr = fake_server(|stream| async move {
            let mut stream = stream;
            stream.write_all(b"Server << one\nServer << two\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;

        let mut client = Client::connect(addr).await.unwrap();
        let err = client
            .expect_line(|l| l.contains("three"), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Server << two"));
    }

    #[tokio::test]
    async fn test_split_halves() {
        let addr = fake_server(|stream| async move {
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                write.write_all(format!("echo << {line}\n").as_bytes()).await.unwrap();
            }
        })
        .await;

        let (mut writer, mut reader) = Client::connect(addr).await.unwrap().split();
        writer.send("ping").await.unwrap();
        assert_eq!(reader.recv().await.unwrap().as_deref(), Some("echo << ping"));
        writer.shutdown().await.unwrap();
        assert_eq!(reader.recv().await.unwrap(), None);
    }
}
