// src/core/readiness.rs

//! Waits for a store client to finish its handshake.

use crate::core::SpinelQError;
use crate::core::client::{ClientEvent, ClientStatus, StoreClient};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Resolves once `client` is `ready`.
///
/// Connection-refused errors are expected while the server is still coming up and are
/// skipped. Any other error fails the wait with that error, and so does the client
/// ending, since an ended client never becomes ready. The subscription is dropped on
/// every exit path.
pub async fn wait_until_ready(client: &dyn StoreClient) -> Result<(), SpinelQError> {
    // Subscribe before reading the status so a transition in between is not lost.
    let mut events = client.subscribe();

    match client.status() {
        ClientStatus::Ready => return Ok(()),
        ClientStatus::End => return Err(SpinelQError::ConnectionClosed),
        _ => {}
    }

    loop {
        match events.recv().await {
            Ok(ClientEvent::Ready) => {
                debug!("Store client is ready");
                return Ok(());
            }
            Ok(ClientEvent::Error(e)) if e.is_connection_refused() => {
                debug!("Ignoring refused connection while waiting for readiness");
            }
            Ok(ClientEvent::Error(e)) => return Err(e),
            Ok(ClientEvent::End) => return Err(SpinelQError::ConnectionClosed),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!("Readiness wait skipped {} client notifications", skipped);
                match client.status() {
                    ClientStatus::Ready => return Ok(()),
                    ClientStatus::End => return Err(SpinelQError::ConnectionClosed),
                    _ => {}
                }
            }
            Err(RecvError::Closed) => return Err(SpinelQError::ConnectionClosed),
        }
    }
}
