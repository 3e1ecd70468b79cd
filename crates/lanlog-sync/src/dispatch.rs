//! Receive loop and dispatch worker.
//!
//! The receive loop only moves payloads from the transport into a FIFO
//! queue; the worker drains the queue into the engine one payload at a
//! time. A slow store therefore never stalls the socket.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use lanlog_store::LogStore;

use crate::engine::SyncEngine;
use crate::error::SyncError;
use crate::transport::{Inbound, Transport};

/// Handles to the two background tasks feeding an engine.
#[derive(Debug)]
pub struct Dispatcher {
    receive: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl Dispatcher {
    /// Spawn both tasks on the current runtime.
    pub fn spawn<S, T>(engine: SyncEngine<S, T>) -> Self
    where
        S: LogStore + 'static,
        T: Transport + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Inbound>(engine.config().dispatch_queue.max(1));

        let transport = std::sync::Arc::clone(engine.transport());
        let receive = tokio::spawn(async move {
            loop {
                match transport.recv().await {
                    Ok(inbound) => {
                        if tx.send(inbound).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "receive failed, stopping receive loop");
                        break;
                    }
                }
            }
        });

        let worker = tokio::spawn(async move {
            while let Some(inbound) = rx.recv().await {
                match engine.handle_payload(&inbound.payload, &inbound.sender).await {
                    Ok(_) => {}
                    Err(SyncError::MalformedPayload(e)) => {
                        tracing::debug!(sender = %inbound.sender, error = %e, "dropping malformed payload");
                    }
                    Err(e) => {
                        tracing::warn!(sender = %inbound.sender, error = %e, "failed to handle payload");
                    }
                }
            }
        });

        Self { receive, worker }
    }

    /// Whether either task has exited.
    pub fn is_finished(&self) -> bool {
        self.receive.is_finished() || self.worker.is_finished()
    }

    /// Abort both tasks. Payloads still queued are dropped.
    pub fn shutdown(self) {
        self.receive.abort();
        self.worker.abort();
    }
}
