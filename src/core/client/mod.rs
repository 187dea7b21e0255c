// src/core/client/mod.rs

//! The store client capability the connection lifecycle is built on, plus the two
//! concrete clients SpinelQ ships: a single-node client and a cluster routing client.

use crate::core::SpinelQError;
use crate::core::protocol::RespFrame;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use strum_macros::{Display, EnumString};
use tokio::sync::broadcast;

pub mod cluster;
pub mod node;
mod stream;

pub use cluster::ClusterClient;
pub use node::NodeClient;

/// Capacity of each client's notification channel.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The connection status of a store client.
///
/// The tokens match the vocabulary of common Redis clients so monitoring
/// built around them reads the same values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ClientStatus {
    /// Created, no connection attempted yet.
    Wait,
    /// Opening the transport.
    Connecting,
    /// Transport open, handshake in progress.
    Connect,
    /// Handshake done; commands are accepted.
    Ready,
    /// Connection lost or failed; a reconnect may follow.
    Close,
    /// No further reconnects will happen.
    End,
}

/// A notification published by a store client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connecting,
    Connect,
    Ready,
    Error(SpinelQError),
    Close,
    End,
}

impl ClientEvent {
    /// The notification announcing a move into `status`, if there is one.
    pub fn for_status(status: ClientStatus) -> Option<Self> {
        match status {
            ClientStatus::Wait => None,
            ClientStatus::Connecting => Some(ClientEvent::Connecting),
            ClientStatus::Connect => Some(ClientEvent::Connect),
            ClientStatus::Ready => Some(ClientEvent::Ready),
            ClientStatus::Close => Some(ClientEvent::Close),
            ClientStatus::End => Some(ClientEvent::End),
        }
    }
}

/// One logical connection to the backing store.
///
/// Status changes and errors are published on a broadcast channel; every
/// `subscribe()` call gets an independent receiver, and dropping it detaches
/// the listener.
#[async_trait]
pub trait StoreClient: Send + Sync + fmt::Debug {
    fn status(&self) -> ClientStatus;

    fn subscribe(&self) -> broadcast::Receiver<ClientEvent>;

    /// Starts connecting. Does not wait for the client to become ready.
    async fn connect(&self) -> Result<(), SpinelQError>;

    /// Drops the connection immediately and stops reconnecting.
    /// Completion is announced by an `End` notification.
    fn disconnect(&self);

    /// Gracefully terminates the connection and waits until it has ended.
    async fn quit(&self) -> Result<(), SpinelQError>;

    /// Sends one command and returns the reply. Error replies are returned
    /// as `SpinelQError::Server`.
    async fn command(&self, args: Vec<Bytes>) -> Result<RespFrame, SpinelQError>;

    /// Runs a command that prepares the store for use, such as `SCRIPT LOAD`, on
    /// every node that is ready and returns one reply per node.
    ///
    /// Clients spanning several nodes keep the command and run it again on each
    /// node that becomes ready later.
    async fn setup_command(&self, args: Vec<Bytes>) -> Result<Vec<RespFrame>, SpinelQError> {
        Ok(vec![self.command(args).await?])
    }

    /// Runs `INFO` and returns the raw text.
    async fn info(&self) -> Result<String, SpinelQError> {
        let reply = self.command(vec![Bytes::from_static(b"INFO")]).await?;
        match reply {
            RespFrame::BulkString(bs) => Ok(String::from_utf8(bs.to_vec())?),
            other => Err(SpinelQError::UnexpectedReply {
                command: "INFO".into(),
                reply: format!("{other:?}"),
            }),
        }
    }

    fn is_cluster(&self) -> bool {
        false
    }
}
