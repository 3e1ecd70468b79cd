//! The Node: one device on the network.
//!
//! Owns the sync engine and the background tasks that feed it, and reacts
//! to connectivity changes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use lanlog_core::{HandshakeMessage, LogId, SyncRecord, UserId};
use lanlog_store::{LogStore, SqliteStore};
use lanlog_sync::{
    Dispatcher, EngineEvent, SyncEngine, Transport, UdpMulticastTransport, WireMessage,
};

use crate::config::NodeConfig;
use crate::error::Result;

#[derive(Default)]
struct Runtime {
    dispatcher: Option<Dispatcher>,
    pending_change: Option<JoinHandle<()>>,
    /// Bumped on every connectivity change.
    generation: u64,
}

struct NodeInner<S, T> {
    engine: SyncEngine<S, T>,
    config: NodeConfig,
    runtime: Mutex<Runtime>,
    lifecycle: tokio::sync::Mutex<()>,
}

/// A running (or stoppable) device.
///
/// Cheap to clone; all clones control the same device.
pub struct Node<S, T> {
    inner: Arc<NodeInner<S, T>>,
}

impl<S, T> Clone for Node<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Node<SqliteStore, UdpMulticastTransport> {
    /// Open the configured SQLite database and multicast group.
    pub fn open(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let store = match &config.database {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                SqliteStore::open(path)?
            }
            None => SqliteStore::open_memory()?,
        };
        let transport = UdpMulticastTransport::new(config.multicast_group, config.interface);
        Ok(Self::new(config, store, transport))
    }
}

impl<S: LogStore + 'static, T: Transport + 'static> Node<S, T> {
    /// Create a node. Nothing touches the network until [`Node::start`].
    pub fn new(config: NodeConfig, store: S, transport: T) -> Self {
        let engine = SyncEngine::new(
            config.identity(),
            Arc::new(store),
            Arc::new(transport),
            config.sync.clone(),
        );
        Self {
            inner: Arc::new(NodeInner {
                engine,
                config,
                runtime: Mutex::new(Runtime::default()),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn engine(&self) -> &SyncEngine<S, T> {
        &self.inner.engine
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.engine.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.runtime().dispatcher.is_some()
    }

    fn runtime(&self) -> MutexGuard<'_, Runtime> {
        self.inner
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Start the engine and the receive loop. A no-op if already running.
    pub async fn start(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        if self.is_running() {
            return Ok(());
        }

        self.inner.engine.start().await?;
        let dispatcher = Dispatcher::spawn(self.inner.engine.clone());
        self.runtime().dispatcher = Some(dispatcher);
        Ok(())
    }

    /// Stop the receive loop and the engine. A no-op if not running.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        let dispatcher = self.runtime().dispatcher.take();
        let Some(dispatcher) = dispatcher else {
            return Ok(());
        };

        dispatcher.shutdown();
        self.inner.engine.stop().await?;
        Ok(())
    }

    /// Report a connectivity change.
    ///
    /// The node stops `stop_delay` after the network goes away and starts
    /// `start_delay` after it comes back. A change cancels any change still
    /// waiting out its delay, so a flapping link causes no restarts.
    pub fn network_changed(&self, connected: bool) {
        let delay = if connected {
            self.inner.config.start_delay()
        } else {
            self.inner.config.stop_delay()
        };
        tracing::debug!(connected, delay_ms = delay.as_millis() as u64, "network changed");

        let mut runtime = self.runtime();
        runtime.generation += 1;
        let generation = runtime.generation;

        let node = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut runtime = node.runtime();
                if runtime.generation != generation {
                    return;
                }
                // From here on a newer change must not abort us halfway.
                runtime.pending_change = None;
            }
            let result = if connected {
                node.start().await
            } else {
                node.stop().await
            };
            if let Err(e) = result {
                tracing::warn!(connected, error = %e, "connectivity change failed");
            }
        });

        if let Some(previous) = runtime.pending_change.replace(task) {
            previous.abort();
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Messaging
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a chat message to this device's log and broadcast it.
    pub async fn send_chat(
        &self,
        text: impl Into<String>,
        recipient: Option<UserId>,
    ) -> Result<SyncRecord> {
        Ok(self.inner.engine.author(text, recipient).await?)
    }

    /// Append a profile photo to this device's log and broadcast it.
    pub async fn send_profile(&self, payload: impl Into<String>) -> Result<SyncRecord> {
        Ok(self.inner.engine.author_profile(payload).await?)
    }

    /// This device's handshake, as it would be sent.
    pub async fn handshake(&self) -> Result<HandshakeMessage> {
        Ok(self.inner.engine.handshake_message(false).await?)
    }

    /// This device's handshake as wire JSON.
    pub async fn handshake_json(&self) -> Result<String> {
        let msg = self.handshake().await?;
        Ok(WireMessage::from(msg).encode()?)
    }

    /// Every slot of one log, placeholders included, in sequence order.
    pub async fn records(&self, log: &LogId) -> Result<Vec<SyncRecord>> {
        let store = self.inner.engine.store();
        let head = store.latest_sequence(log).await?;
        if head == 0 {
            return Ok(Vec::new());
        }
        Ok(store.range_lookup(log, 1, head).await?)
    }

    /// Every log this device holds a record for.
    pub async fn logs(&self) -> Result<Vec<LogId>> {
        Ok(self.inner.engine.store().logs().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanlog_store::MemoryStore;
    use lanlog_sync::{MemoryNetwork, MemoryTransport};
    use std::time::Duration;

    async fn node(network: &Arc<MemoryNetwork>, user: &str) -> Node<MemoryStore, MemoryTransport> {
        let config = NodeConfig {
            user_id: user.to_string(),
            device_id: format!("{user}-device"),
            database: None,
            ..NodeConfig::default()
        };
        let transport = network.create_transport(config.device_id.clone()).await;
        Node::new(config, MemoryStore::new(), transport)
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let network = MemoryNetwork::new();
        let node = node(&network, "A").await;

        node.start().await.unwrap();
        node.start().await.unwrap();
        assert!(node.is_running());

        node.stop().await.unwrap();
        node.stop().await.unwrap();
        assert!(!node.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_changes_are_debounced() {
        let network = MemoryNetwork::new();
        let node = node(&network, "A").await;

        node.network_changed(true);
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert!(!node.is_running());

        // Drops before the start delay ran out: the start is cancelled.
        node.network_changed(false);
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert!(!node.is_running());

        node.network_changed(true);
        tokio::time::sleep(Duration::from_millis(3_100)).await;
        assert!(node.is_running());

        node.network_changed(false);
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(!node.is_running());
    }

    #[tokio::test]
    async fn test_records_and_handshake_json() {
        let network = MemoryNetwork::new();
        let node = node(&network, "A").await;
        node.start().await.unwrap();

        node.send_chat("hello", None).await.unwrap();
        node.send_chat("again", Some(UserId::from("B"))).await.unwrap();

        let log = node.config().identity().log_id();
        let records = node.records(&log).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].recipient_user_id, Some(UserId::from("B")));
        assert_eq!(node.logs().await.unwrap(), vec![log]);

        let json = node.handshake_json().await.unwrap();
        assert!(json.contains("\"message_type\":\"handshaking\""));
        assert!(json.contains("\"from\":\"A-device\""));

        node.stop().await.unwrap();
    }
}
