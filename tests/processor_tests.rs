//! End-to-end processor tests against a scriptable mock adapter.
//!
//! These drive whole messages through the state machine: quorum, the
//! CAS-guarded broadcast claim, confirmation, reorg recovery, and the
//! race and replay guarantees.

use std::sync::Arc;

use relayer_hub::canonical::canonical_hash;
use relayer_hub::chains::{AdapterError, ChainAdapter, ConfirmationStatus};
use relayer_hub::dispatcher::Dispatcher;
use relayer_hub::processor::{ProcessOutcome, Processor, ProcessorConfig};
use relayer_hub::registry::ValidatorRegistry;
use relayer_hub::storage::{InMemoryStore, MessageStore};
use relayer_hub::types::{ErrorKind, Message, MessageStatus};

mod helpers;
use helpers::{EcdsaValidator, MockAdapter};

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn processor_with(
    store: Arc<InMemoryStore>,
    adapters: Vec<Arc<MockAdapter>>,
    registry: ValidatorRegistry,
) -> Arc<Processor> {
    let dispatcher = Dispatcher::new(
        adapters
            .into_iter()
            .map(|a| a as Arc<dyn ChainAdapter>)
            .collect(),
    );
    Arc::new(Processor::new(
        store,
        Arc::new(dispatcher),
        Arc::new(registry),
        ProcessorConfig::default(),
    ))
}

/// Attaches quorum-satisfying signatures from freshly registered
/// validators and returns the registry covering them.
fn sign_with_quorum(message: &mut Message, seeds: &[u8]) -> ValidatorRegistry {
    let hash = canonical_hash(message).unwrap();
    let validators: Vec<_> = seeds.iter().map(|s| EcdsaValidator::new(*s)).collect();
    message.validator_signatures = validators.iter().map(|v| v.sign(&hash)).collect();
    helpers::registry_of(validators.iter().map(|v| v.registry_entry()).collect())
}

/// Happy path: three registered signatures, one broadcast, confirmed,
/// terminal Completed with the destination hash recorded.
#[tokio::test]
async fn test_happy_path_evm_to_evm() {
    let mut message = helpers::token_message(3, now());
    let registry = sign_with_quorum(&mut message, &[1, 2, 3]);

    let store = Arc::new(InMemoryStore::new());
    store.save(&message).await.unwrap();
    let adapter = Arc::new(MockAdapter::new(message.destination.clone()));
    let processor = processor_with(store.clone(), vec![adapter.clone()], registry);

    let outcome = processor.process(&message.id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Completed);
    assert_eq!(adapter.submit_count(), 1);

    let stored = store.get(&message.id).await.unwrap();
    assert_eq!(stored.status, MessageStatus::Completed);
    assert_eq!(stored.destination_tx.as_deref(), Some("0xmock01"));
}

/// Duplicate signer past the grace window: dedup leaves the count below
/// threshold and the message fails terminally without any broadcast.
#[tokio::test]
async fn test_duplicate_signer_fails_terminally() {
    let grace = ProcessorConfig::default().grace_window_secs;
    let mut message = helpers::token_message(3, now() - grace - 60);
    let hash = canonical_hash(&message).unwrap();
    let v1 = EcdsaValidator::new(1);
    let v2 = EcdsaValidator::new(2);
    message.validator_signatures = vec![v1.sign(&hash), v1.sign(&hash), v2.sign(&hash)];
    let registry = helpers::registry_of(vec![v1.registry_entry(), v2.registry_entry()]);

    let store = Arc::new(InMemoryStore::new());
    store.save(&message).await.unwrap();
    let adapter = Arc::new(MockAdapter::new(message.destination.clone()));
    let processor = processor_with(store.clone(), vec![adapter.clone()], registry);

    let outcome = processor.process(&message.id).await.unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Failed(ErrorKind::InsufficientSignatures)
    );
    assert_eq!(adapter.submit_count(), 0);
    assert_eq!(
        store.get_status(&message.id).await.unwrap(),
        MessageStatus::Failed
    );
}

/// Within the grace window the same shortfall stays pending.
#[tokio::test]
async fn test_short_quorum_waits_within_grace() {
    let mut message = helpers::token_message(3, now());
    let registry = sign_with_quorum(&mut message, &[1, 2]);

    let store = Arc::new(InMemoryStore::new());
    store.save(&message).await.unwrap();
    let adapter = Arc::new(MockAdapter::new(message.destination.clone()));
    let processor = processor_with(store.clone(), vec![adapter.clone()], registry);

    let outcome = processor.process(&message.id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::AwaitingSignatures);
    assert_eq!(adapter.submit_count(), 0);
    assert_eq!(
        store.get_status(&message.id).await.unwrap(),
        MessageStatus::Pending
    );
}

/// Replay: a message whose id is already Completed returns immediately
/// and never touches the adapter or the store.
#[tokio::test]
async fn test_replay_of_completed_message() {
    let mut message = helpers::token_message(3, now());
    let registry = sign_with_quorum(&mut message, &[1, 2, 3]);
    message.status = MessageStatus::Completed;
    message.destination_tx = Some("0xearlier".to_string());

    let store = Arc::new(InMemoryStore::new());
    store.save(&message).await.unwrap();
    let adapter = Arc::new(MockAdapter::new(message.destination.clone()));
    let processor = processor_with(store.clone(), vec![adapter.clone()], registry);

    let outcome = processor.process(&message.id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::AlreadyTerminal);
    assert_eq!(adapter.submit_count(), 0);
    // No transition was attempted
    assert_eq!(store.version(&message.id).await, Some(1));
}

/// Race: two workers pick up the same message; exactly one submits and
/// exactly one reports completion.
#[tokio::test]
async fn test_racing_workers_submit_once() {
    let mut message = helpers::token_message(3, now());
    let registry = sign_with_quorum(&mut message, &[1, 2, 3]);

    let store = Arc::new(InMemoryStore::new());
    store.save(&message).await.unwrap();
    let adapter = Arc::new(MockAdapter::new(message.destination.clone()));
    let processor = processor_with(store.clone(), vec![adapter.clone()], registry);

    let a = {
        let processor = processor.clone();
        let id = message.id.clone();
        tokio::spawn(async move { processor.process(&id).await.unwrap() })
    };
    let b = {
        let processor = processor.clone();
        let id = message.id.clone();
        tokio::spawn(async move { processor.process(&id).await.unwrap() })
    };
    let outcomes = [a.await.unwrap(), b.await.unwrap()];

    assert_eq!(adapter.submit_count(), 1);
    let completions = outcomes
        .iter()
        .filter(|o| **o == ProcessOutcome::Completed)
        .count();
    assert_eq!(completions, 1, "outcomes: {:?}", outcomes);
    assert_eq!(
        store.get_status(&message.id).await.unwrap(),
        MessageStatus::Completed
    );
}

/// Reorg recovery: the first broadcast is reorged out, the second
/// confirms. Two submits, final hash from the second attempt.
#[tokio::test]
async fn test_reorg_triggers_rebroadcast() {
    let mut message = helpers::token_message(3, now());
    let registry = sign_with_quorum(&mut message, &[1, 2, 3]);

    let store = Arc::new(InMemoryStore::new());
    store.save(&message).await.unwrap();
    let adapter = Arc::new(
        MockAdapter::new(message.destination.clone()).with_confirmations(vec![
            ConfirmationStatus::Reorged,
            ConfirmationStatus::Confirmed,
        ]),
    );
    let processor = processor_with(store.clone(), vec![adapter.clone()], registry);

    let outcome = processor.process(&message.id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Completed);
    assert_eq!(adapter.submit_count(), 2);

    let stored = store.get(&message.id).await.unwrap();
    assert_eq!(stored.destination_tx.as_deref(), Some("0xmock02"));
}

/// Rebroadcast attempts are bounded; a chain that keeps reorging the
/// transaction ends in Failed[Reorged].
#[tokio::test]
async fn test_reorg_attempts_exhausted() {
    let mut message = helpers::token_message(3, now());
    let registry = sign_with_quorum(&mut message, &[1, 2, 3]);

    let store = Arc::new(InMemoryStore::new());
    store.save(&message).await.unwrap();
    let adapter = Arc::new(
        MockAdapter::new(message.destination.clone()).with_confirmations(vec![
            ConfirmationStatus::Reorged,
            ConfirmationStatus::Reorged,
            ConfirmationStatus::Reorged,
        ]),
    );
    let processor = processor_with(store.clone(), vec![adapter.clone()], registry);

    let outcome = processor.process(&message.id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Failed(ErrorKind::Reorged));
    assert_eq!(adapter.submit_count(), 3);
}

/// Cross-family dispatch: ECDSA validators attest a transfer into the
/// Base58 family; the destination adapter is selected by chain name.
#[tokio::test]
async fn test_cross_family_transfer() {
    let mut message = helpers::cross_family_message(2, now());
    let registry = sign_with_quorum(&mut message, &[1, 2]);

    let store = Arc::new(InMemoryStore::new());
    store.save(&message).await.unwrap();
    let adapter = Arc::new(MockAdapter::new(message.destination.clone()));
    let processor = processor_with(store.clone(), vec![adapter.clone()], registry);

    let outcome = processor.process(&message.id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Completed);
    assert_eq!(adapter.submit_count(), 1);
}

/// An unknown destination chain fails terminally before any I/O.
#[tokio::test]
async fn test_unknown_destination_is_unsupported() {
    let mut message = helpers::token_message(2, now());
    let registry = sign_with_quorum(&mut message, &[1, 2]);

    let store = Arc::new(InMemoryStore::new());
    store.save(&message).await.unwrap();
    // Only the source chain is registered
    let adapter = Arc::new(MockAdapter::new(helpers::evm_descriptor("ethereum", "1")));
    let processor = processor_with(store.clone(), vec![adapter.clone()], registry);

    let outcome = processor.process(&message.id).await.unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Failed(ErrorKind::UnsupportedOperation)
    );
    assert_eq!(adapter.submit_count(), 0);
}

/// Structurally invalid messages (same source and destination) fail
/// terminally as InvalidMessage.
#[tokio::test]
async fn test_structural_violation_is_terminal() {
    let mut message = helpers::token_message(2, now());
    let registry = sign_with_quorum(&mut message, &[1, 2]);
    message.destination = message.source.clone();
    message.recipient = message.sender.clone();

    let store = Arc::new(InMemoryStore::new());
    store.save(&message).await.unwrap();
    let adapter = Arc::new(MockAdapter::new(helpers::evm_descriptor("ethereum", "1")));
    let processor = processor_with(store.clone(), vec![adapter.clone()], registry);

    let outcome = processor.process(&message.id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Failed(ErrorKind::InvalidMessage));
    assert_eq!(
        store.get_status(&message.id).await.unwrap(),
        MessageStatus::Failed
    );
}

/// A deterministic rejection from the chain is terminal.
#[tokio::test]
async fn test_deterministic_rejection() {
    let mut message = helpers::token_message(2, now());
    let registry = sign_with_quorum(&mut message, &[1, 2]);

    let store = Arc::new(InMemoryStore::new());
    store.save(&message).await.unwrap();
    let adapter = Arc::new(
        MockAdapter::new(message.destination.clone()).with_submit_results(vec![Err(
            AdapterError::Rejected {
                detail: "insufficient funds".to_string(),
                deterministic: true,
            },
        )]),
    );
    let processor = processor_with(store.clone(), vec![adapter.clone()], registry);

    let outcome = processor.process(&message.id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Failed(ErrorKind::BroadcastRejected));
    let stored = store.get(&message.id).await.unwrap();
    assert_eq!(stored.last_error.unwrap().kind, ErrorKind::BroadcastRejected);
}

/// An already-known response is success: the known hash is adopted.
#[tokio::test]
async fn test_already_known_is_success() {
    let mut message = helpers::token_message(2, now());
    let registry = sign_with_quorum(&mut message, &[1, 2]);

    let store = Arc::new(InMemoryStore::new());
    store.save(&message).await.unwrap();
    let adapter = Arc::new(
        MockAdapter::new(message.destination.clone()).with_submit_results(vec![Err(
            AdapterError::AlreadyKnown {
                tx_hash: "0xknown".to_string(),
            },
        )]),
    );
    let processor = processor_with(store.clone(), vec![adapter.clone()], registry);

    let outcome = processor.process(&message.id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Completed);
    let stored = store.get(&message.id).await.unwrap();
    assert_eq!(stored.destination_tx.as_deref(), Some("0xknown"));
}

/// A retryable submit failure is retried within the attempt budget.
#[tokio::test]
async fn test_retryable_submit_retries() {
    let mut message = helpers::token_message(2, now());
    let registry = sign_with_quorum(&mut message, &[1, 2]);

    let store = Arc::new(InMemoryStore::new());
    store.save(&message).await.unwrap();
    let adapter = Arc::new(
        MockAdapter::new(message.destination.clone()).with_submit_results(vec![Err(
            AdapterError::RateLimited("slow down".to_string()),
        )]),
    );
    let processor = processor_with(store.clone(), vec![adapter.clone()], registry);

    let outcome = processor.process(&message.id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Completed);
    assert_eq!(adapter.submit_count(), 2);
}

/// An unconfirmed broadcast past its window fails as NotConfirmed.
#[tokio::test]
async fn test_confirmation_window_elapsed() {
    let mut message = helpers::token_message(2, now());
    let registry = sign_with_quorum(&mut message, &[1, 2]);

    let store = Arc::new(InMemoryStore::new());
    store.save(&message).await.unwrap();
    let adapter = Arc::new(
        MockAdapter::new(message.destination.clone())
            .with_confirmations(vec![ConfirmationStatus::Pending]),
    );
    let processor = processor_with(store.clone(), vec![adapter.clone()], registry);

    let outcome = processor.process(&message.id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Failed(ErrorKind::NotConfirmed));
}
