//! Work Queue Module
//!
//! Transport that carries message ids from the ingress to the worker pool.
//! The core only needs publish semantics; the in-process implementation is
//! an unbounded channel drained by a fixed set of worker tasks.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};

use crate::processor::Processor;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue closed")]
    Closed,
}

/// Publish side of the work queue.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish(&self, message_id: &str) -> Result<(), QueueError>;
}

/// In-process queue backed by an unbounded channel.
pub struct InMemoryQueue {
    sender: mpsc::UnboundedSender<String>,
}

impl InMemoryQueue {
    /// Creates the queue and hands back the receive side for the workers.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn publish(&self, message_id: &str) -> Result<(), QueueError> {
        self.sender
            .send(message_id.to_string())
            .map_err(|_| QueueError::Closed)
    }
}

/// Spawns the worker pool. Each worker drains one id at a time and runs it
/// through the processor; operational errors are logged and the worker
/// moves on, so one poisoned message cannot stall the pool.
pub fn spawn_workers(
    processor: Arc<Processor>,
    receiver: mpsc::UnboundedReceiver<String>,
    workers: usize,
) -> Vec<tokio::task::JoinHandle<()>> {
    let receiver = Arc::new(Mutex::new(receiver));
    (0..workers)
        .map(|worker| {
            let processor = processor.clone();
            let receiver = receiver.clone();
            tokio::spawn(async move {
                info!(worker, "worker started");
                loop {
                    let next = { receiver.lock().await.recv().await };
                    let Some(message_id) = next else {
                        info!(worker, "queue closed, worker exiting");
                        return;
                    };
                    if let Err(e) = processor.process(&message_id).await {
                        error!(worker, message_id = %message_id, error = %e, "processing failed");
                    }
                }
            })
        })
        .collect()
}
