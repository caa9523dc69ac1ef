//! Cross-Chain Relayer Hub Library
//!
//! This crate implements a trust-minimized relayer hub that moves fungible
//! and non-fungible tokens between heterogeneous chain families. User
//! requests become canonical messages; validators attest the canonical
//! Keccak-256 hash off-chain; once a quorum of registered signatures is
//! collected, the hub builds and broadcasts the authorizing release call on
//! the destination chain, driving each message through an at-most-once,
//! CAS-guarded state machine.

pub mod api;
pub mod canonical;
pub mod chains;
pub mod config;
pub mod crypto;
pub mod dispatcher;
pub mod processor;
pub mod queue;
pub mod quorum;
pub mod registry;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use api::{ApiServer, AppContext};
pub use canonical::{canonical_hash, derive_message_id};
pub use chains::{AdapterError, BuildError, BuiltTx, ChainAdapter, ConfirmationStatus};
pub use config::Config;
pub use dispatcher::{DispatchError, Dispatcher};
pub use processor::{ProcessOutcome, Processor, ProcessorConfig};
pub use queue::{InMemoryQueue, MessageQueue};
pub use quorum::{QuorumConfig, QuorumError};
pub use registry::{RegisteredValidator, ValidatorRegistry};
pub use storage::{InMemoryStore, MessageStore, StoreError};
pub use types::{
    Address, ChainDescriptor, ChainFamily, Environment, Message, MessageStatus, MessageType,
    Payload, SignatureScheme, TokenStandard, ValidatorSignature,
};
