// tests/integration/fixtures.rs

//! Common test fixtures
//!
//! `MockClient` is a scripted, in-memory `StoreClient`. Tests drive its status and
//! notifications by hand and read back how often each operation was invoked.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use spinelq::SpinelQError;
use spinelq::core::client::{ClientEvent, ClientStatus, StoreClient};
use spinelq::core::protocol::RespFrame;
use spinelq::core::scripts::script_sha1;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

/// The `INFO` payload from the reference scenario.
pub const INFO_6_2_5: &str = "redis_version:6.2.5\r\nother:field\r\n";

/// An `INFO` payload from a server too old for the queue.
pub const INFO_4_0_0: &str = "# Server\r\nredis_version:4.0.0\r\nredis_mode:standalone\r\n";

/// An `INFO` payload without any version line.
pub const INFO_WITHOUT_VERSION: &str = "# Server\r\nredis_mode:standalone\r\n";

/// A connection-refused error as the node client reports it.
pub fn refused_error() -> SpinelQError {
    SpinelQError::from(io::Error::new(
        io::ErrorKind::ConnectionRefused,
        "Connection refused (os error 111)",
    ))
}

/// What `MockClient::disconnect` does when called.
#[derive(Debug, Clone)]
pub enum DisconnectBehavior {
    /// Moves to `end` and announces it.
    End,
    /// Reports this error and stays where it is.
    Fail(SpinelQError),
}

#[derive(Debug)]
pub struct MockClient {
    status: Mutex<ClientStatus>,
    events: broadcast::Sender<ClientEvent>,
    info: Mutex<String>,
    disconnect_behavior: Mutex<DisconnectBehavior>,
    commands: Mutex<Vec<Vec<Bytes>>>,
    pub connect_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    pub quit_calls: AtomicUsize,
}

impl MockClient {
    pub fn new(status: ClientStatus) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            status: Mutex::new(status),
            events,
            info: Mutex::new(INFO_6_2_5.to_string()),
            disconnect_behavior: Mutex::new(DisconnectBehavior::End),
            commands: Mutex::new(Vec::new()),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            quit_calls: AtomicUsize::new(0),
        })
    }

    /// A client that is already `ready` and reports version 6.2.5.
    pub fn ready() -> Arc<Self> {
        Self::new(ClientStatus::Ready)
    }

    pub fn store(self: &Arc<Self>) -> Arc<dyn StoreClient> {
        Arc::clone(self) as Arc<dyn StoreClient>
    }

    pub fn set_info(&self, info: &str) {
        *self.info.lock() = info.to_string();
    }

    pub fn set_disconnect_behavior(&self, behavior: DisconnectBehavior) {
        *self.disconnect_behavior.lock() = behavior;
    }

    pub fn set_status(&self, status: ClientStatus) {
        *self.status.lock() = status;
    }

    pub fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    pub fn become_ready(&self) {
        self.set_status(ClientStatus::Ready);
        self.emit(ClientEvent::Ready);
    }

    pub fn end(&self) {
        self.set_status(ClientStatus::End);
        self.emit(ClientEvent::End);
    }

    /// Number of live notification receivers.
    pub fn subscribers(&self) -> usize {
        self.events.receiver_count()
    }

    /// Waits until at least `count` receivers are subscribed.
    pub async fn wait_for_subscribers(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.subscribers() < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("subscriber never appeared");
    }

    /// Names of every command sent so far, upper-cased.
    pub fn command_names(&self) -> Vec<String> {
        self.commands
            .lock()
            .iter()
            .filter_map(|args| args.first())
            .map(|name| String::from_utf8_lossy(name).to_uppercase())
            .collect()
    }

    pub fn count_command(&self, name: &str) -> usize {
        self.command_names().iter().filter(|n| *n == name).count()
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreClient for MockClient {
    fn status(&self) -> ClientStatus {
        *self.status.lock()
    }

    fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    async fn connect(&self) -> Result<(), SpinelQError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.set_status(ClientStatus::Connecting);
        self.emit(ClientEvent::Connecting);
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.disconnect_behavior.lock().clone();
        match behavior {
            DisconnectBehavior::End => self.end(),
            DisconnectBehavior::Fail(e) => self.emit(ClientEvent::Error(e)),
        }
    }

    async fn quit(&self) -> Result<(), SpinelQError> {
        self.quit_calls.fetch_add(1, Ordering::SeqCst);
        self.end();
        Ok(())
    }

    async fn command(&self, args: Vec<Bytes>) -> Result<RespFrame, SpinelQError> {
        self.commands.lock().push(args.clone());
        let name = args
            .first()
            .map(|a| String::from_utf8_lossy(a).to_uppercase())
            .unwrap_or_default();

        match name.as_str() {
            "INFO" => Ok(RespFrame::BulkString(Bytes::from(self.info.lock().clone()))),
            "PING" => Ok(RespFrame::SimpleString("PONG".into())),
            "SCRIPT" => {
                let source = args.get(2).cloned().unwrap_or_default();
                Ok(RespFrame::BulkString(Bytes::from(script_sha1(&source))))
            }
            _ => Err(SpinelQError::Server(format!("ERR unknown command '{name}'"))),
        }
    }
}
