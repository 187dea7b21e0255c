// src/core/topology.rs

//! Decides which store client a queue connection uses: one it builds from the
//! configured topology, or one the caller hands over.

use crate::config::{ConnectionOptions, GlobalConfig};
use crate::core::client::{ClusterClient, NodeClient, StoreClient};
use std::sync::Arc;
use tracing::info;

/// Where a queue connection gets its store client from.
#[derive(Debug, Clone)]
pub enum ConnectionSource {
    /// Build a client from the global topology and these options.
    Options(ConnectionOptions),
    /// Use this client as-is. It stays owned by the caller.
    Client(Arc<dyn StoreClient>),
}

impl Default for ConnectionSource {
    fn default() -> Self {
        ConnectionSource::Options(ConnectionOptions::default())
    }
}

impl From<ConnectionOptions> for ConnectionSource {
    fn from(options: ConnectionOptions) -> Self {
        ConnectionSource::Options(options)
    }
}

impl From<Arc<dyn StoreClient>> for ConnectionSource {
    fn from(client: Arc<dyn StoreClient>) -> Self {
        ConnectionSource::Client(client)
    }
}

/// Who is responsible for terminating a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Built by the queue connection, which terminates it on close.
    Owned,
    /// Supplied by the caller. Closing the queue connection leaves it running.
    External,
}

/// The outcome of topology resolution.
#[derive(Debug, Clone)]
pub struct ResolvedClient {
    pub client: Arc<dyn StoreClient>,
    pub ownership: Ownership,
    pub skip_version_check: bool,
}

/// Produces the store client for a new queue connection.
///
/// A supplied client is adopted without touching it. Otherwise a client is built from
/// `config`: in cluster mode the per-connection overrides are merged over the cluster
/// options, in single mode the global single-node options are used as they are.
/// Built clients start connecting right away, so this must run inside a Tokio runtime.
pub fn resolve(config: &GlobalConfig, source: ConnectionSource) -> ResolvedClient {
    match source {
        ConnectionSource::Client(client) => {
            info!("Adopting caller-supplied store client {:?}", client);
            ResolvedClient {
                client,
                ownership: Ownership::External,
                skip_version_check: false,
            }
        }
        ConnectionSource::Options(options) => {
            let client: Arc<dyn StoreClient> = match config {
                GlobalConfig::Single(single) => {
                    info!("Connecting to single store node at {}", single.addr());
                    NodeClient::open(single.clone())
                }
                GlobalConfig::Cluster {
                    nodes,
                    options: cluster_options,
                } => {
                    info!("Connecting to store cluster with {} seed node(s)", nodes.len());
                    let merged = options.overrides.apply(cluster_options);
                    ClusterClient::open(nodes.clone(), merged)
                }
            };
            ResolvedClient {
                client,
                ownership: Ownership::Owned,
                skip_version_check: options.skip_version_check,
            }
        }
    }
}
