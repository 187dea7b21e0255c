// src/core/connection.rs

//! The queue connection: one store client, initialized once, shared by every consumer.
//!
//! Construction resolves the client and starts initialization in the background:
//! wait for readiness, load the queue scripts, then check the server version. The
//! outcome is published through a single shared future, so every consumer observes the
//! same client or the same failure and initialization never runs twice. Once it settles,
//! errors reported by the client are relayed to `subscribe_errors` receivers, and so is
//! an initialization failure.

use crate::config::{GlobalConfig, global_config};
use crate::core::SpinelQError;
use crate::core::client::{ClientEvent, ClientStatus, StoreClient};
use crate::core::readiness::wait_until_ready;
use crate::core::scripts::{ScriptBundle, ScriptLoader};
use crate::core::topology::{self, ConnectionSource, Ownership, ResolvedClient};
use crate::core::version::{MINIMUM_REDIS_VERSION, enforce_minimum_version};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use strum_macros::Display;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the relayed error channel.
const ERROR_CHANNEL_CAPACITY: usize = 128;

/// The shared initialization result. Cloning it does not restart initialization.
pub type InitFuture = Shared<BoxFuture<'static, Result<Arc<dyn StoreClient>, SpinelQError>>>;

/// The coarse lifecycle of a queue connection. The client's own status is finer grained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum LifecycleState {
    Constructed,
    Initializing,
    Ready,
    Failed,
    Closing,
    Closed,
}

/// State shared between the connection handle and its background tasks.
struct Lifecycle {
    state: Mutex<LifecycleState>,
    /// Set by the first `close`. Checked before the version check runs.
    closing: AtomicBool,
    version: Mutex<Option<String>>,
    errors: broadcast::Sender<SpinelQError>,
    relay_shutdown: CancellationToken,
}

impl Lifecycle {
    /// Records an initialization outcome unless a close has already taken over.
    fn settle(&self, next: LifecycleState) {
        let mut state = self.state.lock();
        if !matches!(*state, LifecycleState::Closing | LifecycleState::Closed) {
            *state = next;
        }
    }

    fn set(&self, next: LifecycleState) {
        *self.state.lock() = next;
    }

    fn publish_error(&self, error: SpinelQError) {
        if self.errors.send(error).is_err() {
            debug!("No subscribers for relayed queue connection error");
        }
    }
}

/// A managed connection to the store backing a job queue.
pub struct QueueConnection {
    client: Arc<dyn StoreClient>,
    ownership: Ownership,
    initializing: InitFuture,
    lifecycle: Arc<Lifecycle>,
}

impl QueueConnection {
    /// Connects using the global topology and no queue scripts.
    pub fn new(source: impl Into<ConnectionSource>) -> Self {
        Self::with_script_loader(source, Arc::new(ScriptBundle::new()))
    }

    /// Connects using the global topology, loading scripts through `loader`.
    pub fn with_script_loader(
        source: impl Into<ConnectionSource>,
        loader: Arc<dyn ScriptLoader>,
    ) -> Self {
        Self::with_config(&global_config(), source, loader)
    }

    /// Connects using an explicit topology instead of the global one.
    pub fn with_config(
        config: &GlobalConfig,
        source: impl Into<ConnectionSource>,
        loader: Arc<dyn ScriptLoader>,
    ) -> Self {
        Self::from_resolved(topology::resolve(config, source.into()), loader)
    }

    /// Wraps an already resolved client and starts initializing it.
    /// Must be called from within a Tokio runtime.
    pub fn from_resolved(resolved: ResolvedClient, loader: Arc<dyn ScriptLoader>) -> Self {
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        let lifecycle = Arc::new(Lifecycle {
            state: Mutex::new(LifecycleState::Constructed),
            closing: AtomicBool::new(false),
            version: Mutex::new(None),
            errors,
            relay_shutdown: CancellationToken::new(),
        });

        let initializing = initialize(
            Arc::clone(&resolved.client),
            loader,
            Arc::clone(&lifecycle),
            resolved.skip_version_check,
        )
        .boxed()
        .shared();

        // Drives initialization without the caller awaiting it, then relays errors.
        tokio::spawn(relay_errors(initializing.clone(), Arc::clone(&lifecycle)));

        Self {
            client: resolved.client,
            ownership: resolved.ownership,
            initializing,
            lifecycle,
        }
    }

    /// The shared initialization future. Resolves to the ready client.
    pub fn client(&self) -> InitFuture {
        self.initializing.clone()
    }

    /// The server version recorded by the version check, if it ran.
    pub fn redis_version(&self) -> Option<String> {
        self.lifecycle.version.lock().clone()
    }

    /// Receives every error the client reports after initialization settles,
    /// plus the initialization failure if there is one.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<SpinelQError> {
        self.lifecycle.errors.subscribe()
    }

    pub fn state(&self) -> LifecycleState {
        *self.lifecycle.state.lock()
    }

    /// True if the client was supplied by the caller rather than built here.
    pub fn is_externally_owned(&self) -> bool {
        self.ownership == Ownership::External
    }

    /// Drops the underlying connection and waits until the client has ended.
    pub async fn disconnect(&self) -> Result<(), SpinelQError> {
        let client = self.client().await?;
        // Dropped on return, which detaches the listener on both outcomes.
        let mut events = client.subscribe();
        if client.status() == ClientStatus::End {
            return Ok(());
        }

        info!("Disconnecting queue connection");
        client.disconnect();
        loop {
            match events.recv().await {
                Ok(ClientEvent::End) => return Ok(()),
                Ok(ClientEvent::Error(e)) => return Err(e),
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {
                    if client.status() == ClientStatus::End {
                        return Ok(());
                    }
                }
                Err(RecvError::Closed) => return Err(SpinelQError::ConnectionClosed),
            }
        }
    }

    /// Asks the client to connect again. Does not wait for readiness.
    pub async fn reconnect(&self) -> Result<(), SpinelQError> {
        let client = self.client().await?;
        info!("Reconnecting queue connection");
        client.connect().await
    }

    /// Closes the connection. Only the first call does anything.
    ///
    /// A client built by this connection is terminated gracefully; a caller-supplied
    /// client is left open. A close that arrives during initialization also skips the
    /// version check.
    pub async fn close(&self) -> Result<(), SpinelQError> {
        if self.lifecycle.closing.swap(true, Ordering::SeqCst) {
            debug!("Queue connection already closing");
            return Ok(());
        }
        self.lifecycle.set(LifecycleState::Closing);

        let result = match self.ownership {
            Ownership::Owned => {
                info!("Closing queue connection");
                self.client.quit().await
            }
            Ownership::External => {
                debug!("Leaving caller-owned store client open");
                Ok(())
            }
        };

        self.lifecycle.relay_shutdown.cancel();
        self.lifecycle.set(LifecycleState::Closed);
        if let Err(e) = &result {
            warn!("Store client did not quit cleanly: {}", e);
        }
        result
    }
}

impl Drop for QueueConnection {
    fn drop(&mut self) {
        self.lifecycle.relay_shutdown.cancel();
        if !self.lifecycle.closing.swap(true, Ordering::SeqCst)
            && self.ownership == Ownership::Owned
        {
            debug!("Queue connection dropped without close; disconnecting its client");
            self.client.disconnect();
        }
    }
}

async fn initialize(
    client: Arc<dyn StoreClient>,
    loader: Arc<dyn ScriptLoader>,
    lifecycle: Arc<Lifecycle>,
    skip_version_check: bool,
) -> Result<Arc<dyn StoreClient>, SpinelQError> {
    lifecycle.settle(LifecycleState::Initializing);

    let outcome = async {
        wait_until_ready(client.as_ref()).await?;
        loader.load_scripts(&client).await?;

        if skip_version_check {
            debug!("Version check skipped by configuration");
        } else if lifecycle.closing.load(Ordering::SeqCst) {
            debug!("Close requested during initialization; skipping version check");
        } else {
            let version = enforce_minimum_version(client.as_ref(), MINIMUM_REDIS_VERSION).await?;
            *lifecycle.version.lock() = Some(version);
        }
        Ok::<(), SpinelQError>(())
    }
    .await;

    match outcome {
        Ok(()) => {
            lifecycle.settle(LifecycleState::Ready);
            info!("Queue connection initialized");
            Ok(client)
        }
        Err(e) => {
            lifecycle.settle(LifecycleState::Failed);
            error!("Queue connection failed to initialize: {}", e);
            Err(e)
        }
    }
}

async fn relay_errors(initializing: InitFuture, lifecycle: Arc<Lifecycle>) {
    let client = match initializing.await {
        Ok(client) => client,
        Err(e) => {
            // After a close the failure is the expected consequence of tearing down.
            if lifecycle.closing.load(Ordering::SeqCst) {
                debug!("Initialization ended by close: {}", e);
            } else {
                lifecycle.publish_error(e);
            }
            return;
        }
    };

    let mut events = client.subscribe();
    loop {
        tokio::select! {
            biased;
            _ = lifecycle.relay_shutdown.cancelled() => break,
            event = events.recv() => match event {
                Ok(ClientEvent::Error(e)) => lifecycle.publish_error(e),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Error relay skipped {} client notifications", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("Queue connection error relay stopped");
}
