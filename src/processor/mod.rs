//! Message Processing Module
//!
//! Drives one message at a time through validation, quorum verification,
//! release building, broadcast, and confirmation. Every observable
//! transition is a compare-and-set against the store, so any number of
//! workers can race on the same message id and exactly one of them makes
//! each transition; the rest observe no progress and exit. The only shared
//! mutable resource beyond the store is the per-destination semaphore that
//! bounds concurrent broadcasts to each chain.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::canonical;
use crate::chains::{AdapterError, BuiltTx, ChainAdapter, ConfirmationStatus};
use crate::dispatcher::Dispatcher;
use crate::quorum::{self, QuorumConfig};
use crate::registry::ValidatorRegistry;
use crate::storage::{MessageStore, StoreError};
use crate::types::{ErrorKind, LastError, Message, MessageStatus, ValidatorSignature};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Tuning knobs for the processing pipeline.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Upper bound on a message's signature set
    pub max_signatures: usize,
    /// Concurrent broadcasts allowed per destination chain
    pub per_destination_concurrency: usize,
    /// Rebroadcast attempts after reorgs or retryable submit failures
    pub max_rebroadcast_attempts: u32,
    /// Window after creation during which a short signature set stays
    /// pending instead of failing terminally
    pub grace_window_secs: i64,
    /// Quorum freshness bounds
    pub quorum: QuorumConfig,
    /// Submit timeout per attempt
    pub submit_timeout: Duration,
    /// Base delay for store retry backoff
    pub store_backoff_base: Duration,
    /// Cap for store retry backoff
    pub store_backoff_cap: Duration,
    /// Store retry attempts before giving up
    pub store_max_retries: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_signatures: 64,
            per_destination_concurrency: 4,
            max_rebroadcast_attempts: 3,
            grace_window_secs: 600,
            quorum: QuorumConfig::default(),
            submit_timeout: Duration::from_secs(30),
            store_backoff_base: Duration::from_millis(200),
            store_backoff_cap: Duration::from_secs(30),
            store_max_retries: 5,
        }
    }
}

/// What one `process` call amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Message was already in a terminal state; nothing done
    AlreadyTerminal,
    /// Quorum not yet met but still within the grace window
    AwaitingSignatures,
    /// Another worker owns the in-flight transition
    LostRace,
    /// Message reached `Completed`
    Completed,
    /// Message reached `Failed` with the recorded kind
    Failed(ErrorKind),
}

/// Infrastructure failure that prevented processing from finishing.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// PROCESSOR
// ============================================================================

/// The state machine driver.
pub struct Processor {
    store: Arc<dyn MessageStore>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<ValidatorRegistry>,
    config: ProcessorConfig,
    permits: Mutex<HashMap<String, Arc<tokio::sync::Semaphore>>>,
}

impl Processor {
    pub fn new(
        store: Arc<dyn MessageStore>,
        dispatcher: Arc<Dispatcher>,
        registry: Arc<ValidatorRegistry>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            registry,
            config,
            permits: Mutex::new(HashMap::new()),
        }
    }

    /// Processes one message id to the furthest state it can reach now.
    ///
    /// Idempotent and race-safe: replayed terminal messages return
    /// immediately, and a lost CAS at any step means another worker owns
    /// the message.
    pub async fn process(&self, id: &str) -> Result<ProcessOutcome, ProcessError> {
        let store = self.store.clone();
        let message = self
            .with_store_retry(|| {
                let store = store.clone();
                let id = id.to_string();
                async move { store.get(&id).await }
            })
            .await?;

        info!(
            message_id = %message.id,
            source = %message.source.name,
            destination = %message.destination.name,
            status = %message.status,
            "processing message"
        );

        if message.status.is_terminal() {
            debug!(message_id = %message.id, "message already terminal, skipping");
            return Ok(ProcessOutcome::AlreadyTerminal);
        }

        if let Err(validation) = message.validate(self.config.max_signatures) {
            warn!(message_id = %message.id, error = %validation, "structural validation failed");
            self.fail(
                &message.id,
                message.status,
                LastError::new(ErrorKind::InvalidMessage, validation.to_string()),
            )
            .await?;
            return Ok(ProcessOutcome::Failed(ErrorKind::InvalidMessage));
        }

        let mut status = message.status;

        if status == MessageStatus::Created {
            match self
                .cas(&message.id, MessageStatus::Created, MessageStatus::Pending, None, None)
                .await
            {
                Ok(()) => status = MessageStatus::Pending,
                Err(StoreError::NoProgress { actual, .. }) => {
                    if actual.is_terminal() {
                        return Ok(ProcessOutcome::AlreadyTerminal);
                    }
                    status = actual;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let counted = match status {
            MessageStatus::Pending => {
                match self.verify_quorum_step(&message).await? {
                    QuorumStep::Signed(counted) => counted,
                    QuorumStep::Awaiting => return Ok(ProcessOutcome::AwaitingSignatures),
                    QuorumStep::Failed(kind) => return Ok(ProcessOutcome::Failed(kind)),
                    QuorumStep::LostRace => return Ok(ProcessOutcome::LostRace),
                }
            }
            MessageStatus::Signed => {
                // Resuming a message another worker signed but never
                // broadcast; recount from the stored signature set.
                match self.recount_signatures(&message) {
                    Some(counted) => counted,
                    None => {
                        self.fail(
                            &message.id,
                            MessageStatus::Signed,
                            LastError::new(
                                ErrorKind::InsufficientSignatures,
                                "stored signature set no longer meets quorum",
                            ),
                        )
                        .await?;
                        return Ok(ProcessOutcome::Failed(ErrorKind::InsufficientSignatures));
                    }
                }
            }
            MessageStatus::Broadcasting => {
                // An in-flight broadcast belongs to whichever worker CAS-ed
                // into it; only resume when that worker left a tx hash behind.
                return self.resume_broadcast(&message).await;
            }
            _ => return Ok(ProcessOutcome::AlreadyTerminal),
        };

        self.broadcast_and_confirm(&message, counted).await
    }

    // ------------------------------------------------------------------
    // Quorum step
    // ------------------------------------------------------------------

    async fn verify_quorum_step(&self, message: &Message) -> Result<QuorumStep, ProcessError> {
        let hash = match canonical::canonical_hash(message) {
            Ok(hash) => hash,
            Err(e) => {
                self.fail(
                    &message.id,
                    MessageStatus::Pending,
                    LastError::new(ErrorKind::InvalidMessage, e.to_string()),
                )
                .await?;
                return Ok(QuorumStep::Failed(ErrorKind::InvalidMessage));
            }
        };

        let now = chrono::Utc::now().timestamp();
        match quorum::verify_quorum(message, &hash, &self.registry, &self.config.quorum, now) {
            Ok(outcome) => {
                match self
                    .cas(&message.id, MessageStatus::Pending, MessageStatus::Signed, None, None)
                    .await
                {
                    Ok(()) => Ok(QuorumStep::Signed(outcome.counted)),
                    Err(StoreError::NoProgress { .. }) => Ok(QuorumStep::LostRace),
                    Err(e) => Err(e.into()),
                }
            }
            Err(quorum_err) => {
                let in_grace = now - message.timestamp <= self.config.grace_window_secs;
                if quorum_err.retryable() && in_grace {
                    debug!(
                        message_id = %message.id,
                        got = quorum_err.got,
                        need = quorum_err.need,
                        "quorum not met yet, staying pending"
                    );
                    return Ok(QuorumStep::Awaiting);
                }
                warn!(message_id = %message.id, error = %quorum_err, "quorum failed terminally");
                self.fail(
                    &message.id,
                    MessageStatus::Pending,
                    LastError::new(ErrorKind::InsufficientSignatures, quorum_err.to_string()),
                )
                .await?;
                Ok(QuorumStep::Failed(ErrorKind::InsufficientSignatures))
            }
        }
    }

    /// Re-derives the counted signature set for a message that is already
    /// `Signed` in the store.
    fn recount_signatures(&self, message: &Message) -> Option<Vec<ValidatorSignature>> {
        let hash = canonical::canonical_hash(message).ok()?;
        let now = chrono::Utc::now().timestamp();
        // The freshness window was already enforced when the message was
        // signed; widen it here so a slow resume cannot strand the message.
        let mut config = self.config.quorum.clone();
        config.max_age_secs = i64::MAX;
        quorum::verify_quorum(message, &hash, &self.registry, &config, now)
            .ok()
            .map(|outcome| outcome.counted)
    }

    // ------------------------------------------------------------------
    // Broadcast and confirmation
    // ------------------------------------------------------------------

    async fn broadcast_and_confirm(
        &self,
        message: &Message,
        counted: Vec<ValidatorSignature>,
    ) -> Result<ProcessOutcome, ProcessError> {
        let adapter = match self.dispatcher.adapter_for(message) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "dispatch failed");
                self.fail(
                    &message.id,
                    MessageStatus::Signed,
                    LastError::new(ErrorKind::UnsupportedOperation, e.to_string()),
                )
                .await?;
                return Ok(ProcessOutcome::Failed(ErrorKind::UnsupportedOperation));
            }
        };

        // Account nonces on the destination are sequential per relayer
        // account; bound in-flight broadcasts per chain.
        let semaphore = self.destination_permit(&message.destination.name);
        let _permit = semaphore.acquire().await.expect("semaphore closed");

        let confirm_deadline = confirmation_deadline(
            adapter.block_time(),
            message.destination.confirmation_blocks,
        );

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let built = match adapter.build_release(message, &counted, u64::from(attempt)) {
                Ok(built) => built,
                Err(e) => {
                    warn!(message_id = %message.id, error = %e, "release build failed");
                    self.fail(
                        &message.id,
                        MessageStatus::Signed,
                        LastError::new(ErrorKind::BuildError, e.to_string()),
                    )
                    .await?;
                    return Ok(ProcessOutcome::Failed(ErrorKind::BuildError));
                }
            };

            // Claim the in-flight state before any bytes leave, so a
            // concurrent worker observes the claim and backs off.
            match self
                .cas(
                    &message.id,
                    MessageStatus::Signed,
                    MessageStatus::Broadcasting,
                    None,
                    None,
                )
                .await
            {
                Ok(()) => {}
                Err(StoreError::NoProgress { .. }) => return Ok(ProcessOutcome::LostRace),
                Err(e) => return Err(e.into()),
            }

            let tx_hash = match tokio::time::timeout(
                self.config.submit_timeout,
                adapter.submit(&built),
            )
            .await
            {
                Ok(Ok(hash)) => Some(hash),
                Ok(Err(AdapterError::AlreadyKnown { tx_hash })) => {
                    // The chain saw an earlier attempt; adopt its hash.
                    info!(message_id = %message.id, tx_hash = %tx_hash, "transaction already known");
                    Some(tx_hash)
                }
                Ok(Err(AdapterError::Rejected { detail, deterministic: true })) => {
                    warn!(message_id = %message.id, detail = %detail, "broadcast rejected");
                    self.fail(
                        &message.id,
                        MessageStatus::Broadcasting,
                        LastError::new(ErrorKind::BroadcastRejected, detail),
                    )
                    .await?;
                    return Ok(ProcessOutcome::Failed(ErrorKind::BroadcastRejected));
                }
                Ok(Err(AdapterError::Unavailable(_))) | Err(_) => {
                    // Transport failure after the bytes may have left, or a
                    // local timeout: the outcome is ambiguous. Never fail
                    // here; poll the content-addressed candidate hash for
                    // one confirmation window instead.
                    debug!(message_id = %message.id, "ambiguous submit, polling candidate hash");
                    self.resolve_ambiguous_submit(adapter.as_ref(), &built, confirm_deadline)
                        .await
                }
                Ok(Err(err)) => {
                    // Retryable refusal (rate limit, queue pressure): step
                    // back to Signed and try again within the attempt budget.
                    warn!(message_id = %message.id, error = %err, "submit failed, retrying");
                    None
                }
            };

            let Some(tx_hash) = tx_hash else {
                if attempt >= self.config.max_rebroadcast_attempts {
                    self.fail(
                        &message.id,
                        MessageStatus::Broadcasting,
                        LastError::new(ErrorKind::AdapterUnavailable, "broadcast attempts exhausted"),
                    )
                    .await?;
                    return Ok(ProcessOutcome::Failed(ErrorKind::AdapterUnavailable));
                }
                match self
                    .cas(
                        &message.id,
                        MessageStatus::Broadcasting,
                        MessageStatus::Signed,
                        None,
                        None,
                    )
                    .await
                {
                    Ok(()) => continue,
                    Err(StoreError::NoProgress { .. }) => return Ok(ProcessOutcome::LostRace),
                    Err(e) => return Err(e.into()),
                }
            };

            match self
                .cas(
                    &message.id,
                    MessageStatus::Broadcasting,
                    MessageStatus::Broadcasting,
                    Some(tx_hash.clone()),
                    None,
                )
                .await
            {
                Ok(()) => {}
                Err(StoreError::NoProgress { .. }) => return Ok(ProcessOutcome::LostRace),
                Err(e) => return Err(e.into()),
            }

            match adapter
                .wait_confirmed(&tx_hash, message.destination.confirmation_blocks, confirm_deadline)
                .await
            {
                Ok(ConfirmationStatus::Confirmed) => {
                    match self
                        .cas(
                            &message.id,
                            MessageStatus::Broadcasting,
                            MessageStatus::Completed,
                            None,
                            None,
                        )
                        .await
                    {
                        Ok(()) => {
                            info!(
                                message_id = %message.id,
                                tx_hash = %tx_hash,
                                destination = %message.destination.name,
                                attempts = attempt,
                                "message completed"
                            );
                            return Ok(ProcessOutcome::Completed);
                        }
                        Err(StoreError::NoProgress { .. }) => return Ok(ProcessOutcome::LostRace),
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(ConfirmationStatus::Reorged) => {
                    warn!(message_id = %message.id, tx_hash = %tx_hash, "transaction reorged out");
                    if attempt >= self.config.max_rebroadcast_attempts {
                        self.fail(
                            &message.id,
                            MessageStatus::Broadcasting,
                            LastError::new(ErrorKind::Reorged, "rebroadcast attempts exhausted"),
                        )
                        .await?;
                        return Ok(ProcessOutcome::Failed(ErrorKind::Reorged));
                    }
                    match self
                        .cas(
                            &message.id,
                            MessageStatus::Broadcasting,
                            MessageStatus::Signed,
                            None,
                            None,
                        )
                        .await
                    {
                        Ok(()) => continue,
                        Err(StoreError::NoProgress { .. }) => return Ok(ProcessOutcome::LostRace),
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(ConfirmationStatus::Pending) => {
                    self.fail(
                        &message.id,
                        MessageStatus::Broadcasting,
                        LastError::new(ErrorKind::NotConfirmed, "confirmation window elapsed"),
                    )
                    .await?;
                    return Ok(ProcessOutcome::Failed(ErrorKind::NotConfirmed));
                }
                Err(AdapterError::Rejected { detail, deterministic: true }) => {
                    self.fail(
                        &message.id,
                        MessageStatus::Broadcasting,
                        LastError::new(ErrorKind::BroadcastRejected, detail),
                    )
                    .await?;
                    return Ok(ProcessOutcome::Failed(ErrorKind::BroadcastRejected));
                }
                Err(err) => {
                    warn!(message_id = %message.id, error = %err, "confirmation polling failed");
                    if attempt >= self.config.max_rebroadcast_attempts {
                        self.fail(
                            &message.id,
                            MessageStatus::Broadcasting,
                            LastError::new(ErrorKind::AdapterUnavailable, err.to_string()),
                        )
                        .await?;
                        return Ok(ProcessOutcome::Failed(ErrorKind::AdapterUnavailable));
                    }
                    match self
                        .cas(
                            &message.id,
                            MessageStatus::Broadcasting,
                            MessageStatus::Signed,
                            None,
                            None,
                        )
                        .await
                    {
                        Ok(()) => continue,
                        Err(StoreError::NoProgress { .. }) => return Ok(ProcessOutcome::LostRace),
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }

    /// Polls the content-addressed candidate hash after an ambiguous submit.
    async fn resolve_ambiguous_submit(
        &self,
        adapter: &dyn ChainAdapter,
        built: &BuiltTx,
        window: Duration,
    ) -> Option<String> {
        match adapter
            .wait_confirmed(&built.content_hash, 1, window)
            .await
        {
            Ok(ConfirmationStatus::Confirmed) => Some(built.content_hash.clone()),
            _ => None,
        }
    }

    /// Resumes a message found in `Broadcasting` with a recorded tx hash.
    async fn resume_broadcast(&self, message: &Message) -> Result<ProcessOutcome, ProcessError> {
        let Some(tx_hash) = message.destination_tx.clone() else {
            // The owning worker is still between claim and hash record.
            return Ok(ProcessOutcome::LostRace);
        };
        let adapter = match self.dispatcher.adapter_for(message) {
            Ok(adapter) => adapter,
            Err(_) => return Ok(ProcessOutcome::LostRace),
        };
        let deadline = confirmation_deadline(
            adapter.block_time(),
            message.destination.confirmation_blocks,
        );
        match adapter
            .wait_confirmed(&tx_hash, message.destination.confirmation_blocks, deadline)
            .await
        {
            Ok(ConfirmationStatus::Confirmed) => {
                match self
                    .cas(
                        &message.id,
                        MessageStatus::Broadcasting,
                        MessageStatus::Completed,
                        None,
                        None,
                    )
                    .await
                {
                    Ok(()) => Ok(ProcessOutcome::Completed),
                    Err(StoreError::NoProgress { .. }) => Ok(ProcessOutcome::LostRace),
                    Err(e) => Err(e.into()),
                }
            }
            _ => Ok(ProcessOutcome::LostRace),
        }
    }

    // ------------------------------------------------------------------
    // Store plumbing
    // ------------------------------------------------------------------

    async fn cas(
        &self,
        id: &str,
        from: MessageStatus,
        to: MessageStatus,
        tx_hash: Option<String>,
        error: Option<LastError>,
    ) -> Result<(), StoreError> {
        let store = self.store.clone();
        self.with_store_retry(|| {
            let store = store.clone();
            let id = id.to_string();
            let tx_hash = tx_hash.clone();
            let error = error.clone();
            async move { store.cas_status(&id, from, to, tx_hash, error).await }
        })
        .await
    }

    /// Records a terminal failure. A lost CAS here means another worker
    /// already settled the message, which is fine.
    async fn fail(
        &self,
        id: &str,
        from: MessageStatus,
        last_error: LastError,
    ) -> Result<(), ProcessError> {
        match self
            .cas(id, from, MessageStatus::Failed, None, Some(last_error))
            .await
        {
            Ok(()) | Err(StoreError::NoProgress { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Retries retryable store failures with exponential backoff and full
    /// jitter.
    async fn with_store_retry<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut delay = self.config.store_backoff_base;
        let mut tries = 0;
        loop {
            match op().await {
                Err(e) if e.retryable() && tries < self.config.store_max_retries => {
                    tries += 1;
                    let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64);
                    error!(error = %e, retry = tries, "store operation failed, backing off");
                    tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                    delay = (delay * 2).min(self.config.store_backoff_cap);
                }
                other => return other,
            }
        }
    }

    fn destination_permit(&self, chain_name: &str) -> Arc<tokio::sync::Semaphore> {
        let mut permits = self.permits.lock().expect("permit lock poisoned");
        permits
            .entry(chain_name.to_string())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Semaphore::new(
                    self.config.per_destination_concurrency,
                ))
            })
            .clone()
    }
}

enum QuorumStep {
    Signed(Vec<ValidatorSignature>),
    Awaiting,
    Failed(ErrorKind),
    LostRace,
}

/// Confirmation window: three block times per required confirmation,
/// floored at one minute.
fn confirmation_deadline(block_time: Duration, confirmations: u32) -> Duration {
    (block_time * confirmations.max(1) * 3).max(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_deadline_floors_at_one_minute() {
        assert_eq!(
            confirmation_deadline(Duration::from_secs(2), 3),
            Duration::from_secs(60)
        );
        assert_eq!(
            confirmation_deadline(Duration::from_secs(12), 10),
            Duration::from_secs(360)
        );
    }
}
