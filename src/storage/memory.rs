//! In-memory message store.
//!
//! HashMap-backed implementation of [`MessageStore`] used for development
//! and tests. Thread-safe via a tokio `RwLock`; insertion order doubles as
//! the `created_at` ordering for listings.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{MessageStore, StoreError};
use crate::types::{LastError, Message, MessageStatus, ValidatorSignature};

struct StoredMessage {
    message: Message,
    version: u64,
    created_at: i64,
    updated_at: i64,
}

/// In-memory [`MessageStore`] implementation.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    messages: HashMap<String, StoredMessage>,
    // Insertion order, for created_at-ascending listings
    order: Vec<String>,
    clock: i64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current version of a message, for observing CAS progression in tests.
    pub async fn version(&self, id: &str) -> Option<u64> {
        let inner = self.inner.read().await;
        inner.messages.get(id).map(|m| m.version)
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn save(&self, message: &Message) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.clock += 1;
        let now = inner.clock;
        if let Some(existing) = inner.messages.get(&message.id) {
            // Identical resubmissions collapse; anything else is a collision.
            if existing.message.payload == message.payload
                && existing.message.sender == message.sender
                && existing.message.recipient == message.recipient
                && existing.message.nonce == message.nonce
            {
                return Ok(());
            }
            return Err(StoreError::Conflict(message.id.clone()));
        }
        inner.order.push(message.id.clone());
        inner.messages.insert(
            message.id.clone(),
            StoredMessage {
                message: message.clone(),
                version: 1,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Message, StoreError> {
        let inner = self.inner.read().await;
        inner
            .messages
            .get(id)
            .map(|m| m.message.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn get_status(&self, id: &str) -> Result<MessageStatus, StoreError> {
        let inner = self.inner.read().await;
        inner
            .messages
            .get(id)
            .map(|m| m.message.status)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn cas_status(
        &self,
        id: &str,
        from: MessageStatus,
        to: MessageStatus,
        tx_hash: Option<String>,
        error: Option<LastError>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.clock += 1;
        let now = inner.clock;
        let stored = inner
            .messages
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if stored.message.status != from {
            return Err(StoreError::NoProgress {
                id: id.to_string(),
                expected: from,
                actual: stored.message.status,
            });
        }
        // Terminal states are absorbing.
        if from.is_terminal() && to != from {
            return Err(StoreError::NoProgress {
                id: id.to_string(),
                expected: from,
                actual: stored.message.status,
            });
        }

        stored.message.status = to;
        if let Some(hash) = tx_hash {
            stored.message.destination_tx = Some(hash);
        }
        if let Some(err) = error {
            stored.message.last_error = Some(err);
        }
        stored.version += 1;
        stored.updated_at = now;
        Ok(())
    }

    async fn append_signature(
        &self,
        id: &str,
        signature: ValidatorSignature,
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        inner.clock += 1;
        let now = inner.clock;
        let stored = inner
            .messages
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let duplicate = stored.message.validator_signatures.iter().any(|s| {
            s.validator_address
                .eq_ignore_ascii_case(&signature.validator_address)
        });
        if !duplicate {
            stored.message.validator_signatures.push(signature);
            stored.version += 1;
            stored.updated_at = now;
        }
        Ok(stored.message.validator_signatures.len())
    }

    async fn list_by_status(
        &self,
        status: MessageStatus,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.messages.get(id))
            .filter(|m| m.message.status == status)
            .skip(offset)
            .take(limit)
            .map(|m| m.message.clone())
            .collect())
    }

    async fn list_all(&self, limit: usize, offset: usize) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.messages.get(id))
            .skip(offset)
            .take(limit)
            .map(|m| m.message.clone())
            .collect())
    }

    async fn count_by_status(&self, status: MessageStatus) -> Result<usize, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .values()
            .filter(|m| m.message.status == status)
            .count())
    }
}
