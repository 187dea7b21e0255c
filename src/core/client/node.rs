// src/core/client/node.rs

//! A client for a single store node.
//!
//! Each `connect` spawns a driver task that owns the connection lifecycle: it opens the
//! transport, performs the handshake, publishes `ready`, and then waits until the
//! connection is lost or a shutdown is requested. Failed attempts are retried according
//! to the configured `RetryStrategy`. Commands share the live connection through a mutex,
//! one request/reply round trip at a time.

use super::stream::NodeStream;
use super::{ClientEvent, ClientStatus, EVENT_CHANNEL_CAPACITY, StoreClient};
use crate::config::ClientOptions;
use crate::core::SpinelQError;
use crate::core::protocol::{RespFrame, RespFrameCodec};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type NodeFramed = Framed<NodeStream, RespFrameCodec>;

/// The live connection, present only while the client is `ready`.
struct ActiveConnection {
    framed: NodeFramed,
    /// Cancelled by a command that hit a transport failure; wakes the driver.
    lost: CancellationToken,
}

/// A reconnecting client for one store node.
pub struct NodeClient {
    options: ClientOptions,
    status: Mutex<ClientStatus>,
    events: broadcast::Sender<ClientEvent>,
    connection: tokio::sync::Mutex<Option<ActiveConnection>>,
    /// The shutdown token of the running driver. `None` when no driver runs.
    driver: Mutex<Option<CancellationToken>>,
    this: Weak<NodeClient>,
}

impl NodeClient {
    /// Creates a client in the `wait` status without connecting.
    pub fn new(options: ClientOptions) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new_cyclic(|this| Self {
            options,
            status: Mutex::new(ClientStatus::Wait),
            events,
            connection: tokio::sync::Mutex::new(None),
            driver: Mutex::new(None),
            this: this.clone(),
        })
    }

    /// Creates a client and immediately starts connecting in the background.
    /// Must be called from within a Tokio runtime.
    pub fn open(options: ClientOptions) -> Arc<Self> {
        let client = Self::new(options);
        client.start();
        client
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Returns true while a driver task owns this client's connection lifecycle.
    pub(crate) fn is_running(&self) -> bool {
        self.driver.lock().is_some()
    }

    /// Spawns a driver unless one is already running. Returns whether one was spawned.
    pub(crate) fn start(self: &Arc<Self>) -> bool {
        let shutdown = {
            let mut driver = self.driver.lock();
            if driver.is_some() {
                return false;
            }
            let token = CancellationToken::new();
            *driver = Some(token.clone());
            token
        };
        tokio::spawn(Arc::clone(self).drive(shutdown));
        true
    }

    fn set_status(&self, status: ClientStatus) {
        let mut current = self.status.lock();
        *current = status;
        if let Some(event) = ClientEvent::for_status(status) {
            // No subscribers is fine; the status itself is still recorded.
            let _ = self.events.send(event);
        }
    }

    fn emit_error(&self, error: SpinelQError) {
        let _ = self.events.send(ClientEvent::Error(error));
    }

    async fn drive(self: Arc<Self>, shutdown: CancellationToken) {
        let addr = self.options.addr();
        let mut attempt: u32 = 0;

        loop {
            self.set_status(ClientStatus::Connecting);
            debug!("Connecting to {}", addr);

            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                outcome = self.establish() => outcome,
            };

            match outcome {
                Ok(framed) => {
                    attempt = 0;
                    let lost = shutdown.child_token();
                    *self.connection.lock().await = Some(ActiveConnection {
                        framed,
                        lost: lost.clone(),
                    });
                    self.set_status(ClientStatus::Ready);
                    info!("Connection to {} is ready", addr);

                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = lost.cancelled() => warn!("Connection to {} was lost", addr),
                    }
                    self.connection.lock().await.take();
                }
                Err(e) => {
                    if e.is_connection_refused() {
                        debug!("Connection to {} refused", addr);
                    } else {
                        warn!("Failed to connect to {}: {}", addr, e);
                    }
                    self.emit_error(e);
                }
            }

            self.set_status(ClientStatus::Close);
            attempt = attempt.saturating_add(1);
            let Some(delay) = self.options.retry_strategy.delay_for(attempt) else {
                info!(
                    "Retry strategy stopped reconnecting to {} after attempt {}",
                    addr, attempt
                );
                break;
            };
            debug!("Reconnecting to {} in {:?} (attempt {})", addr, delay, attempt);

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.connection.lock().await.take();
        {
            // Both under the driver lock: whoever observes `end` can start a new driver.
            let mut driver = self.driver.lock();
            self.set_status(ClientStatus::End);
            *driver = None;
        }
        info!("Connection to {} ended", addr);
    }

    /// Opens the transport and runs the handshake.
    async fn establish(&self) -> Result<NodeFramed, SpinelQError> {
        let stream = NodeStream::open(&self.options).await?;
        self.set_status(ClientStatus::Connect);
        let mut framed = Framed::new(stream, RespFrameCodec);
        self.handshake(&mut framed).await?;
        Ok(framed)
    }

    async fn handshake(&self, framed: &mut NodeFramed) -> Result<(), SpinelQError> {
        let timeout = self.options.command_timeout;

        if let Some(password) = &self.options.password {
            let mut args = vec![Bytes::from_static(b"AUTH")];
            if let Some(username) = &self.options.username {
                args.push(Bytes::from(username.clone()));
            }
            args.push(Bytes::from(password.clone()));
            expect_ok(framed, args, timeout, "AUTH").await?;
        }

        if self.options.db != 0 {
            let args = vec![
                Bytes::from_static(b"SELECT"),
                Bytes::from(self.options.db.to_string()),
            ];
            expect_ok(framed, args, timeout, "SELECT").await?;
        }

        if let Some(name) = &self.options.connection_name {
            let args = vec![
                Bytes::from_static(b"CLIENT"),
                Bytes::from_static(b"SETNAME"),
                Bytes::from(name.clone()),
            ];
            expect_ok(framed, args, timeout, "CLIENT SETNAME").await?;
        }

        Ok(())
    }

    async fn wait_for_end(&self, events: &mut broadcast::Receiver<ClientEvent>) {
        loop {
            if self.status() == ClientStatus::End {
                return;
            }
            match events.recv().await {
                Ok(ClientEvent::End) | Err(broadcast::error::RecvError::Closed) => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            }
        }
    }
}

/// Sends one frame and reads one reply, bounded by `timeout`.
async fn round_trip(
    framed: &mut NodeFramed,
    frame: RespFrame,
    timeout: Duration,
    command: &str,
) -> Result<RespFrame, SpinelQError> {
    let exchange = async {
        framed.send(frame).await?;
        framed
            .next()
            .await
            .unwrap_or(Err(SpinelQError::ConnectionClosed))
    };
    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| SpinelQError::Timeout(format!("waiting for reply to {command}")))?
}

async fn expect_ok(
    framed: &mut NodeFramed,
    args: Vec<Bytes>,
    timeout: Duration,
    command: &str,
) -> Result<(), SpinelQError> {
    match round_trip(framed, RespFrame::command(args), timeout, command).await? {
        reply if reply.is_ok() => Ok(()),
        RespFrame::Error(msg) => Err(SpinelQError::Server(msg)),
        other => Err(SpinelQError::UnexpectedReply {
            command: command.to_string(),
            reply: format!("{other:?}"),
        }),
    }
}

#[async_trait]
impl StoreClient for NodeClient {
    fn status(&self) -> ClientStatus {
        *self.status.lock()
    }

    fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    async fn connect(&self) -> Result<(), SpinelQError> {
        let this = self
            .this
            .upgrade()
            .ok_or_else(|| SpinelQError::Internal("node client already dropped".into()))?;
        if this.start() {
            Ok(())
        } else {
            Err(SpinelQError::AlreadyConnecting)
        }
    }

    fn disconnect(&self) {
        let driver = self.driver.lock().clone();
        match driver {
            Some(shutdown) => {
                debug!("Disconnecting from {}", self.options.addr());
                shutdown.cancel();
            }
            // Never started: end right away so waiters see `end`.
            None if self.status() != ClientStatus::End => self.set_status(ClientStatus::End),
            None => {}
        }
    }

    async fn quit(&self) -> Result<(), SpinelQError> {
        let mut events = self.events.subscribe();
        let driver = self.driver.lock().clone();
        let Some(shutdown) = driver else {
            if self.status() != ClientStatus::End {
                self.set_status(ClientStatus::End);
            }
            return Ok(());
        };

        let result = {
            let mut guard = self.connection.lock().await;
            match guard.as_mut() {
                Some(active) => {
                    let quit = RespFrame::command(["QUIT"]);
                    let timeout = self.options.command_timeout;
                    let reply = round_trip(&mut active.framed, quit, timeout, "QUIT").await;
                    match reply {
                        Ok(reply) if reply.is_ok() => Ok(()),
                        Ok(RespFrame::Error(msg)) => Err(SpinelQError::Server(msg)),
                        Ok(other) => Err(SpinelQError::UnexpectedReply {
                            command: "QUIT".into(),
                            reply: format!("{other:?}"),
                        }),
                        // The server may hang up before the reply is read.
                        Err(SpinelQError::ConnectionClosed) => Ok(()),
                        Err(e) => Err(e),
                    }
                }
                None => Ok(()),
            }
        };

        shutdown.cancel();
        self.wait_for_end(&mut events).await;
        debug!("Quit connection to {}", self.options.addr());
        result
    }

    async fn command(&self, args: Vec<Bytes>) -> Result<RespFrame, SpinelQError> {
        let name = args
            .first()
            .map(|a| String::from_utf8_lossy(a).to_uppercase())
            .unwrap_or_default();

        let mut guard = self.connection.lock().await;
        let Some(active) = guard.as_mut() else {
            return Err(SpinelQError::NotConnected(self.status().to_string()));
        };

        let timeout = self.options.command_timeout;
        let reply = round_trip(&mut active.framed, RespFrame::command(args), timeout, &name).await;
        match reply {
            Ok(RespFrame::Error(msg)) => Err(SpinelQError::Server(msg)),
            Ok(reply) => Ok(reply),
            Err(e) if e.is_transport_failure() => {
                // The stream may be out of sync now; hand it back to the driver.
                if let Some(active) = guard.take() {
                    active.lost.cancel();
                }
                drop(guard);
                warn!(
                    "{} on {} failed: {}. Reconnecting.",
                    name,
                    self.options.addr(),
                    e
                );
                self.emit_error(e.clone());
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for NodeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeClient")
            .field("addr", &self.options.addr())
            .field("status", &self.status())
            .finish()
    }
}
