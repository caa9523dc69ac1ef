//! Message Storage Module
//!
//! Abstract persistent operations the processing pipeline requires. The
//! core only ever uses the operations on [`MessageStore`]; richer queries
//! (per-chain views, analytics) belong to external reporting. The
//! compare-and-set on `status` is the concurrency primitive the whole
//! state machine leans on: every transition is guarded by the expected
//! prior status, and a lost race surfaces as [`StoreError::NoProgress`].

pub mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{LastError, Message, MessageStatus, ValidatorSignature};

/// Errors surfaced by store implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("message not found: {0}")]
    NotFound(String),
    #[error("id collision with different payload: {0}")]
    Conflict(String),
    #[error("no progress: {id} is {actual}, expected {expected}")]
    NoProgress {
        id: String,
        expected: MessageStatus,
        actual: MessageStatus,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Infrastructure failures are retried with backoff; the rest are not.
    pub fn retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Persistent operations required by the core.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Startup reachability probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Atomic insert. Re-saving an identical message is an idempotent no-op;
    /// an id collision with a different payload is a [`StoreError::Conflict`].
    async fn save(&self, message: &Message) -> Result<(), StoreError>;

    /// Loads the full message, including collected signatures.
    async fn get(&self, id: &str) -> Result<Message, StoreError>;

    /// Status-only fast path.
    async fn get_status(&self, id: &str) -> Result<MessageStatus, StoreError>;

    /// Compare-and-set on status, succeeding iff the current status equals
    /// `from`. Optionally records the destination tx hash and last error in
    /// the same atomic step, and bumps the message version.
    async fn cas_status(
        &self,
        id: &str,
        from: MessageStatus,
        to: MessageStatus,
        tx_hash: Option<String>,
        error: Option<LastError>,
    ) -> Result<(), StoreError>;

    /// Appends one validator signature. `(message id, validator address)` is
    /// the identity: a duplicate deposit is a no-op (first occurrence wins).
    /// Returns the resulting signature count.
    async fn append_signature(
        &self,
        id: &str,
        signature: ValidatorSignature,
    ) -> Result<usize, StoreError>;

    /// Messages with the given status, ordered by creation time ascending.
    async fn list_by_status(
        &self,
        status: MessageStatus,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, StoreError>;

    /// All messages ordered by creation time ascending.
    async fn list_all(&self, limit: usize, offset: usize) -> Result<Vec<Message>, StoreError>;

    /// Count of messages with the given status (reporting surface; the
    /// processor never calls this).
    async fn count_by_status(&self, status: MessageStatus) -> Result<usize, StoreError>;
}
