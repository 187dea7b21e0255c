// src/core/client/cluster.rs

//! A routing client over the nodes of a clustered deployment.
//!
//! Every configured node gets its own `NodeClient`. An aggregator task listens to all of
//! them, derives one status for the cluster as a whole, and republishes node errors.
//! Setup commands are kept and replayed on every node that becomes ready.

use super::{ClientEvent, ClientStatus, EVENT_CHANNEL_CAPACITY, NodeClient, StoreClient};
use crate::config::{ClientOptions, NodeAddr};
use crate::core::SpinelQError;
use crate::core::protocol::RespFrame;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::future::join_all;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Folds node statuses into the status of the cluster.
///
/// The cluster is ready as soon as one node is, and ended only once every node has.
pub fn aggregate_status(statuses: &[ClientStatus]) -> ClientStatus {
    let any = |status: ClientStatus| statuses.contains(&status);
    if any(ClientStatus::Ready) {
        ClientStatus::Ready
    } else if any(ClientStatus::Connect) {
        ClientStatus::Connect
    } else if any(ClientStatus::Connecting) {
        ClientStatus::Connecting
    } else if any(ClientStatus::Close) {
        ClientStatus::Close
    } else if !statuses.is_empty() && statuses.iter().all(|s| *s == ClientStatus::End) {
        ClientStatus::End
    } else {
        ClientStatus::Wait
    }
}

pub struct ClusterClient {
    addrs: Vec<NodeAddr>,
    options: ClientOptions,
    nodes: Vec<Arc<NodeClient>>,
    status: Mutex<ClientStatus>,
    events: broadcast::Sender<ClientEvent>,
    /// Shutdown token of the running aggregator, if any.
    aggregator: Mutex<Option<CancellationToken>>,
    /// Commands every node runs once it is ready, in registration order.
    setup: Mutex<Vec<Vec<Bytes>>>,
    this: Weak<ClusterClient>,
}

impl ClusterClient {
    /// Creates a cluster client in the `wait` status. Each node is reached at its
    /// own address with every other setting taken from `options`.
    pub fn new(addrs: Vec<NodeAddr>, options: ClientOptions) -> Arc<Self> {
        let nodes = addrs
            .iter()
            .map(|addr| {
                NodeClient::new(ClientOptions {
                    host: addr.host.clone(),
                    port: addr.port,
                    ..options.clone()
                })
            })
            .collect();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new_cyclic(|this| Self {
            addrs,
            options,
            nodes,
            status: Mutex::new(ClientStatus::Wait),
            events,
            aggregator: Mutex::new(None),
            setup: Mutex::new(Vec::new()),
            this: this.clone(),
        })
    }

    /// Creates a cluster client and starts connecting every node in the background.
    /// Must be called from within a Tokio runtime.
    pub fn open(addrs: Vec<NodeAddr>, options: ClientOptions) -> Arc<Self> {
        let client = Self::new(addrs, options);
        client.start();
        client
    }

    pub fn nodes(&self) -> &[Arc<NodeClient>] {
        &self.nodes
    }

    pub fn addrs(&self) -> &[NodeAddr] {
        &self.addrs
    }

    /// The shared node options, before each node's address is filled in.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Starts the aggregator and every idle node. Returns how many nodes were started.
    fn start(self: &Arc<Self>) -> usize {
        // Held across the node starts so the aggregator cannot retire in between.
        let mut aggregator = self.aggregator.lock();
        if aggregator.is_none() {
            // Subscribe before any node starts so no transition is missed.
            let receivers = self.nodes.iter().map(|node| node.subscribe()).collect();
            let shutdown = CancellationToken::new();
            *aggregator = Some(shutdown.clone());
            tokio::spawn(Arc::clone(self).aggregate(receivers, shutdown));
        }
        let started = self.nodes.iter().filter(|node| node.start()).count();
        drop(aggregator);

        info!(
            "Cluster client starting {} of {} node connection(s)",
            started,
            self.nodes.len()
        );
        started
    }

    async fn aggregate(
        self: Arc<Self>,
        receivers: Vec<broadcast::Receiver<ClientEvent>>,
        shutdown: CancellationToken,
    ) {
        let mut merged = futures::stream::select_all(
            receivers
                .into_iter()
                .enumerate()
                .map(|(index, rx)| BroadcastStream::new(rx).map(move |event| (index, event))),
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = merged.next() => next,
            };
            let Some((index, event)) = next else {
                break;
            };

            match event {
                Ok(ClientEvent::Error(e)) => {
                    debug!("Cluster node {} reported: {}", self.addrs[index], e);
                    let _ = self.events.send(ClientEvent::Error(e));
                }
                Ok(ClientEvent::Ready) => self.replay_setup(index),
                _ => {}
            }

            if self.refresh_status() == ClientStatus::End {
                let mut aggregator = self.aggregator.lock();
                if !self.nodes.iter().any(|node| node.is_running()) {
                    *aggregator = None;
                    break;
                }
            }
        }

        debug!("Cluster status aggregator stopped");
    }

    /// Runs the registered setup commands on a node that just became ready.
    fn replay_setup(&self, index: usize) {
        let commands = self.setup.lock().clone();
        if commands.is_empty() {
            return;
        }
        let node = Arc::clone(&self.nodes[index]);
        let addr = self.addrs[index].clone();
        let events = self.events.clone();
        debug!(
            "Replaying {} setup command(s) on cluster node {}",
            commands.len(),
            addr
        );
        tokio::spawn(async move {
            for args in commands {
                if let Err(e) = node.command(args).await {
                    warn!("Setup command failed on cluster node {}: {}", addr, e);
                    let _ = events.send(ClientEvent::Error(e));
                }
            }
        });
    }

    /// Recomputes the cluster status from the nodes and publishes it if it changed.
    fn refresh_status(&self) -> ClientStatus {
        let statuses: Vec<ClientStatus> = self.nodes.iter().map(|n| n.status()).collect();
        let next = aggregate_status(&statuses);

        let mut current = self.status.lock();
        if *current != next {
            debug!("Cluster status {} -> {}", *current, next);
            *current = next;
            if let Some(event) = ClientEvent::for_status(next) {
                let _ = self.events.send(event);
            }
        }
        next
    }
}

#[async_trait]
impl StoreClient for ClusterClient {
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
            .ok_or_else(|| SpinelQError::Internal("cluster client already dropped".into()))?;
        if this.start() == 0 {
            return Err(SpinelQError::AlreadyConnecting);
        }
        Ok(())
    }

    fn disconnect(&self) {
        for node in &self.nodes {
            node.disconnect();
        }
        // Nodes that never started end synchronously, with no aggregator to notice.
        self.refresh_status();
    }

    async fn quit(&self) -> Result<(), SpinelQError> {
        let results = join_all(self.nodes.iter().map(|node| node.quit())).await;
        self.refresh_status();

        let mut first_error = None;
        for (addr, result) in self.addrs.iter().zip(results) {
            if let Err(e) = result {
                warn!("Failed to quit cluster node {}: {}", addr, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn command(&self, args: Vec<Bytes>) -> Result<RespFrame, SpinelQError> {
        let node = self
            .nodes
            .iter()
            .find(|node| node.status() == ClientStatus::Ready)
            .ok_or_else(|| SpinelQError::NotConnected(self.status().to_string()))?;
        node.command(args).await
    }

    async fn setup_command(&self, args: Vec<Bytes>) -> Result<Vec<RespFrame>, SpinelQError> {
        // Registered before the ready nodes are picked: a node that turns ready
        // afterwards gets it from the aggregator.
        {
            let mut setup = self.setup.lock();
            if !setup.contains(&args) {
                setup.push(args.clone());
            }
        }

        let ready: Vec<&Arc<NodeClient>> = self
            .nodes
            .iter()
            .filter(|node| node.status() == ClientStatus::Ready)
            .collect();
        let result: Result<Vec<RespFrame>, SpinelQError> = if ready.is_empty() {
            Err(SpinelQError::NotConnected(self.status().to_string()))
        } else {
            join_all(ready.iter().map(|node| node.command(args.clone())))
                .await
                .into_iter()
                .collect()
        };

        if result.is_err() {
            self.setup.lock().retain(|registered| *registered != args);
        }
        result
    }

    fn is_cluster(&self) -> bool {
        true
    }
}

impl fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterClient")
            .field("nodes", &self.addrs)
            .field("status", &self.status())
            .finish()
    }
}
