//! Smoke tests for the `parlor-server` binary.
//!
//! These start the real executable on a fresh port and talk to it over TCP.

use api::server_notice;
use client::Client;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

/// Guard that kills the server process on drop.
struct ChildGuard(Option<Child>);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(mut c) = self.0.take() {
            let _ = c.kill();
            let _ = c.wait();
        }
    }
}

/// Atomic counter for unique test ports to avoid collisions between parallel tests.
static PORT_COUNTER: AtomicU16 = AtomicU16::new(57000);

fn next_test_port() -> u16 {
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Start a server instance on the given port and return the guard.
/// Pipes stderr to test output for diagnostics.
fn start_server(port: u16) -> ChildGuard {
    let mut child = Command::new(env!("CARGO_BIN_EXE_parlor-server"))
        .arg("--no-console")
        .env("RUST_LOG", "debug")
        .env("PARLOR_NO_CONFIG", "1")
        .env("PARLOR_PORT", port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to start server binary");

    for (stream, label) in [
        (child.stdout.take().map(|s| Box::new(s) as Box<dyn std::io::Read + Send>), "stdout"),
        (child.stderr.take().map(|s| Box::new(s) as Box<dyn std::io::Read + Send>), "stderr"),
    ] {
        if let Some(stream) = stream {
            std::thread::spawn(move || {
                for line in BufReader::new(stream).lines().map_while(Result::ok) {
                    eprintln!("[server:{port} {label}] {line}");
                }
            });
        }
    }

    ChildGuard(Some(child))
}

/// Retry logging in until the server has bound its port.
async fn login_when_ready(port: u16, name: &str) -> Client {
    let addr = format!("127.0.0.1:{port}");
    for _ in 0..100 {
        if let Ok(client) = Client::login(addr.as_str(), name).await {
            return client;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("server on port {port} never accepted {name}");
}

#[tokio::test]
async fn test_binary_serves_chat() {
    let port = next_test_port();
    let _server = start_server(port);

    let mut alice = login_when_ready(port, "alice").await;
    let mut bob = login_when_ready(port, "bob").await;
    alice
        .expect_line(|l| l == server_notice("bob joined the chatroom"), Duration::from_secs(3))
        .await
        .unwrap();

    bob.send("hi alice").await.unwrap();
    alice
        .expect_line(|l| l == "bob << hi alice", Duration::from_secs(3))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_binary_plays_a_round() {
    let port = next_test_port();
    let _server = start_server(port);
    let wait = Duration::from_secs(3);

    let mut alice = login_when_ready(port, "alice").await;
    let mut bob = login_when_ready(port, "bob").await;

    alice.send("play bob").await.unwrap();
    bob.expect_line(|l| l.contains("is requesting to play"), wait)
        .await
        .unwrap();
    bob.send("accept").await.unwrap();
    alice
        .expect_line(|l| l.contains("Make your choice"), wait)
        .await
        .unwrap();
    bob.expect_line(|l| l.contains("Make your choice"), wait)
        .await
        .unwrap();

    alice.send("2").await.unwrap();
    bob.send("1").await.unwrap();
    alice
        .expect_line(|l| l.contains("You win!! Paper beats Rock"), wait)
        .await
        .unwrap();

    bob.send("quit").await.unwrap();
    alice
        .expect_line(|l| l.contains("<bob> left the game"), wait)
        .await
        .unwrap();
}
