//! Several engines on one in-memory network, driven by hand.
//!
//! Nothing runs in the background: payloads sit in each transport's queue
//! until [`TestMesh::pump`] delivers them, and rounds close only when
//! [`TestMesh::close_rounds`] is called. Scenarios are therefore
//! deterministic.

use std::sync::Arc;

use lanlog_store::MemoryStore;
use lanlog_sync::{
    LocalIdentity, MemoryNetwork, MemoryTransport, SyncConfig, SyncEngine, SyncError, Transport,
};

use crate::fixtures::device;

/// Engine type used by the mesh.
pub type MeshEngine = SyncEngine<MemoryStore, MemoryTransport>;

/// Upper bound on round trips in [`TestMesh::settle`].
const MAX_SETTLE_ROUNDS: usize = 32;

/// A hand-driven group of devices.
pub struct TestMesh {
    network: Arc<MemoryNetwork>,
    engines: Vec<MeshEngine>,
    config: SyncConfig,
}

impl TestMesh {
    /// A mesh whose round timers never fire on their own.
    pub fn new() -> Self {
        Self::with_config(SyncConfig {
            round_window_ms: 24 * 60 * 60 * 1000,
            ..SyncConfig::default()
        })
    }

    pub fn with_config(config: SyncConfig) -> Self {
        Self {
            network: MemoryNetwork::new(),
            engines: Vec::new(),
            config,
        }
    }

    /// Add a device for `user` writing from `{user}-device`. Returns its index.
    pub async fn add_device(&mut self, user: &str) -> usize {
        let device = device(user);
        let transport = self.network.create_transport(device.as_str()).await;
        let engine = SyncEngine::new(
            LocalIdentity::new(user, device),
            Arc::new(MemoryStore::new()),
            Arc::new(transport),
            self.config.clone(),
        );
        self.engines.push(engine);
        self.engines.len() - 1
    }

    pub fn engine(&self, idx: usize) -> &MeshEngine {
        &self.engines[idx]
    }

    pub fn store(&self, idx: usize) -> &MemoryStore {
        self.engines[idx].store()
    }

    pub fn engines(&self) -> &[MeshEngine] {
        &self.engines
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Join every device, then start each one in index order.
    ///
    /// # Panics
    /// If any engine fails to start.
    pub async fn start_all(&self) {
        for engine in &self.engines {
            engine.transport().join().await.expect("join failed");
        }
        for engine in &self.engines {
            engine.start().await.expect("start failed");
        }
    }

    /// Deliver queued payloads until every queue is empty.
    /// Returns how many were delivered.
    ///
    /// # Panics
    /// If an engine fails on anything but a malformed payload.
    pub async fn pump(&self) -> usize {
        let mut delivered = 0;
        loop {
            let mut progressed = false;
            for engine in &self.engines {
                while let Some(inbound) = engine.transport().try_recv() {
                    progressed = true;
                    delivered += 1;
                    match engine.handle_payload(&inbound.payload, &inbound.sender).await {
                        Ok(_) | Err(SyncError::MalformedPayload(_)) => {}
                        Err(e) => panic!("{} failed to handle payload: {e}", engine.device_id()),
                    }
                }
            }
            if !progressed {
                return delivered;
            }
        }
    }

    /// Close the open round on every device. Returns the requests sent.
    ///
    /// # Panics
    /// If reconciliation fails.
    pub async fn close_rounds(&self) -> usize {
        let mut requests = 0;
        for engine in &self.engines {
            requests += engine.close_round().await.expect("close round failed").requests;
        }
        requests
    }

    /// Alternate pumping and closing rounds until a round asks for nothing.
    /// Returns the number of rounds that sent requests.
    pub async fn settle(&self) -> usize {
        let mut busy_rounds = 0;
        for _ in 0..MAX_SETTLE_ROUNDS {
            self.pump().await;
            let requests = self.close_rounds().await;
            let delivered = self.pump().await;
            if requests == 0 && delivered == 0 {
                break;
            }
            busy_rounds += 1;
        }
        busy_rounds
    }
}

impl Default for TestMesh {
    fn default() -> Self {
        Self::new()
    }
}
