// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests
//!
//! `FakeServer` is a small in-process RESP server that speaks just enough of the
//! protocol for the connection lifecycle: the handshake commands, `INFO`, `PING`,
//! `SCRIPT LOAD` and `QUIT`.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use spinelq::config::{ClientOptions, RetryStrategy};
use spinelq::core::protocol::{RespFrame, RespFrameCodec};
use spinelq::core::scripts::script_sha1;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Upper bound for any single wait in these tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Sets up minimal tracing for tests (ignores the error if already initialized).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_test_writer()
        .try_init();
}

/// Awaits `future`, failing the test if it takes longer than `TEST_TIMEOUT`.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .expect("operation timed out")
}

/// Client options for `addr` that retry quickly, so tests do not wait on backoff.
pub fn fast_options(addr: SocketAddr) -> ClientOptions {
    let mut options = ClientOptions::new(addr.ip().to_string(), addr.port());
    options.retry_strategy = RetryStrategy::fixed(Duration::from_millis(20));
    options.connect_timeout = Duration::from_secs(1);
    options.command_timeout = Duration::from_secs(1);
    options
}

/// Returns an address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

#[derive(Debug, Clone)]
pub struct FakeServerConfig {
    pub version: String,
    pub password: Option<String>,
}

impl Default for FakeServerConfig {
    fn default() -> Self {
        Self {
            version: "7.2.4".to_string(),
            password: None,
        }
    }
}

pub struct FakeServer {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<Vec<String>>>>,
    shutdown: CancellationToken,
}

impl FakeServer {
    pub async fn start() -> Self {
        Self::with_config(FakeServerConfig::default()).await
    }

    pub async fn with_config(config: FakeServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener, config)
    }

    /// Starts listening on a specific address, e.g. one a client is already retrying.
    pub async fn bind(addr: SocketAddr, config: FakeServerConfig) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        Self::serve(listener, config)
    }

    fn serve(listener: TcpListener, config: FakeServerConfig) -> Self {
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let shutdown = CancellationToken::new();

        let accept_received = Arc::clone(&received);
        let accept_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    _ = accept_shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => stream,
                        Err(_) => break,
                    },
                };
                tokio::spawn(handle_connection(
                    stream,
                    config.clone(),
                    Arc::clone(&accept_received),
                    accept_shutdown.child_token(),
                ));
            }
        });

        Self {
            addr,
            received,
            shutdown,
        }
    }

    /// Every command received so far, as upper-cased name followed by arguments.
    pub fn received(&self) -> Vec<Vec<String>> {
        self.received.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.received()
            .iter()
            .filter(|cmd| cmd.first().is_some_and(|n| n == name))
            .count()
    }

    pub fn find(&self, name: &str) -> Option<Vec<String>> {
        self.received()
            .into_iter()
            .find(|cmd| cmd.first().is_some_and(|n| n == name))
    }

    /// Stops accepting and drops every open connection.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn handle_connection(
    stream: TcpStream,
    config: FakeServerConfig,
    received: Arc<Mutex<Vec<Vec<String>>>>,
    shutdown: CancellationToken,
) {
    let mut framed = Framed::new(stream, RespFrameCodec);
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => return,
            frame = framed.next() => match frame {
                Some(Ok(frame)) => frame,
                _ => return,
            },
        };

        let args: Vec<Bytes> = match frame {
            RespFrame::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    RespFrame::BulkString(b) => Some(b),
                    _ => None,
                })
                .collect(),
            _ => return,
        };
        let mut text: Vec<String> = args
            .iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect();
        if let Some(name) = text.first_mut() {
            *name = name.to_uppercase();
        }
        received.lock().push(text.clone());

        let name = text.first().cloned().unwrap_or_default();
        let reply = match name.as_str() {
            "AUTH" => match (&config.password, text.last()) {
                (Some(expected), Some(given)) if expected == given => ok(),
                _ => RespFrame::Error(
                    "WRONGPASS invalid username-password pair or user is disabled.".into(),
                ),
            },
            "SELECT" | "CLIENT" => ok(),
            "PING" => RespFrame::SimpleString("PONG".into()),
            "INFO" => RespFrame::BulkString(Bytes::from(format!(
                "# Server\r\nredis_version:{}\r\nredis_mode:standalone\r\n",
                config.version
            ))),
            "SCRIPT" => {
                let source = args.get(2).cloned().unwrap_or_default();
                RespFrame::BulkString(Bytes::from(script_sha1(&source)))
            }
            "QUIT" => {
                let _ = framed.send(ok()).await;
                return;
            }
            other => RespFrame::Error(format!("ERR unknown command '{other}'")),
        };

        if framed.send(reply).await.is_err() {
            return;
        }
    }
}

fn ok() -> RespFrame {
    RespFrame::SimpleString("OK".into())
}
