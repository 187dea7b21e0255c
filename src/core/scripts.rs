// src/core/scripts.rs

//! Loading the queue's server-side Lua scripts onto the store during initialization.

use crate::core::SpinelQError;
use crate::core::client::StoreClient;
use async_trait::async_trait;
use bytes::Bytes;
use sha1::{Digest, Sha1};
use std::sync::Arc;
use tracing::{debug, info};

/// Installs whatever server-side extensions the queue needs before it can run.
#[async_trait]
pub trait ScriptLoader: Send + Sync {
    async fn load_scripts(&self, client: &Arc<dyn StoreClient>) -> Result<(), SpinelQError>;
}

/// A named Lua script and its SHA-1 digest.
#[derive(Debug, Clone)]
pub struct Script {
    pub name: String,
    pub source: Bytes,
    pub sha1: String,
}

impl Script {
    pub fn new(name: impl Into<String>, source: impl Into<Bytes>) -> Self {
        let source = source.into();
        let sha1 = script_sha1(&source);
        Self {
            name: name.into(),
            source,
            sha1,
        }
    }
}

/// The hex SHA-1 digest the server uses to address a script body.
pub fn script_sha1(source: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source);
    hex::encode(hasher.finalize())
}

/// A set of Lua scripts loaded with `SCRIPT LOAD`.
///
/// Each digest returned by the server is checked against the locally computed one,
/// so later `EVALSHA` calls are known to reach the intended script. On a cluster
/// the bundle is loaded onto every ready node, and nodes that connect later get it
/// from the cluster client.
#[derive(Debug, Clone, Default)]
pub struct ScriptBundle {
    scripts: Vec<Script>,
}

impl ScriptBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a script, replacing any earlier one with the same name.
    pub fn with_script(mut self, name: impl Into<String>, source: impl Into<Bytes>) -> Self {
        let script = Script::new(name, source);
        self.scripts.retain(|s| s.name != script.name);
        self.scripts.push(script);
        self
    }

    pub fn sha(&self, name: &str) -> Option<&str> {
        self.scripts
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.sha1.as_str())
    }

    pub fn scripts(&self) -> &[Script] {
        &self.scripts
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }
}

#[async_trait]
impl ScriptLoader for ScriptBundle {
    async fn load_scripts(&self, client: &Arc<dyn StoreClient>) -> Result<(), SpinelQError> {
        for script in &self.scripts {
            let replies = client
                .setup_command(vec![
                    Bytes::from_static(b"SCRIPT"),
                    Bytes::from_static(b"LOAD"),
                    script.source.clone(),
                ])
                .await
                .map_err(|e| SpinelQError::Script(format!("loading '{}': {e}", script.name)))?;

            for reply in &replies {
                let loaded = reply.as_text().ok_or_else(|| {
                    SpinelQError::Script(format!(
                        "unexpected reply while loading '{}': {reply:?}",
                        script.name
                    ))
                })?;
                if !loaded.eq_ignore_ascii_case(&script.sha1) {
                    return Err(SpinelQError::Script(format!(
                        "digest mismatch for '{}': expected {}, server returned {}",
                        script.name, script.sha1, loaded
                    )));
                }
            }
            debug!("Loaded script '{}' as {}", script.name, script.sha1);
        }

        if !self.scripts.is_empty() {
            info!("Loaded {} queue script(s)", self.scripts.len());
        }
        Ok(())
    }
}
