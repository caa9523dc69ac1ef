//! Shared test helpers.
//!
//! Builder functions and fixtures used across the integration tests:
//! chain descriptors for each family, ready-made transfer messages,
//! signing validators for both schemes, and a scriptable mock chain
//! adapter for driving the processor without network I/O.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::Signer as _;
use k256::ecdsa::SigningKey as EcdsaSigningKey;

use relayer_hub::chains::{
    AdapterError, BuildError, BuiltTx, ChainAdapter, ConfirmationStatus,
};
use relayer_hub::crypto::ethereum_address;
use relayer_hub::registry::{RegisteredValidator, ValidatorRegistry};
use relayer_hub::types::{
    Address, ChainDescriptor, ChainFamily, Environment, Message, MessageStatus, MessageType,
    Payload, SignatureScheme, TokenStandard, TokenTransferPayload, ValidatorSignature,
};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Sender on the EVM source chain
pub const SENDER_EVM: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa01";

/// Recipient on the EVM destination chain
pub const RECIPIENT_EVM: &str = "0xcccccccccccccccccccccccccccccccccccccc02";

/// ERC20 token under transfer
pub const TOKEN_EVM: &str = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee03";

/// Recipient on the Base58 destination chain (32 ones decodes to 32 zero bytes)
pub const RECIPIENT_BASE58: &str = "11111111111111111111111111111111";

/// One full token at 18 decimals
pub const ONE_TOKEN: &str = "1000000000000000000";

// ============================================================================
// DESCRIPTORS AND MESSAGES
// ============================================================================

pub fn evm_descriptor(name: &str, chain_id: &str) -> ChainDescriptor {
    ChainDescriptor {
        name: name.to_string(),
        family: ChainFamily::Evm,
        chain_id: chain_id.to_string(),
        network_id: "devnet".to_string(),
        environment: Environment::Devnet,
        confirmation_blocks: 3,
        bridge_contract: Address::parse(
            "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb04",
            ChainFamily::Evm,
        )
        .unwrap(),
    }
}

pub fn svm_descriptor(name: &str) -> ChainDescriptor {
    ChainDescriptor {
        name: name.to_string(),
        family: ChainFamily::Ed25519Base58,
        chain_id: "solana-devnet".to_string(),
        network_id: "devnet".to_string(),
        environment: Environment::Devnet,
        confirmation_blocks: 1,
        bridge_contract: Address::parse(
            &bs58::encode([7u8; 32]).into_string(),
            ChainFamily::Ed25519Base58,
        )
        .unwrap(),
    }
}

pub fn named_descriptor(name: &str) -> ChainDescriptor {
    ChainDescriptor {
        name: name.to_string(),
        family: ChainFamily::Ed25519Named,
        chain_id: "near-devnet".to_string(),
        network_id: "devnet".to_string(),
        environment: Environment::Devnet,
        confirmation_blocks: 1,
        bridge_contract: Address::parse("bridge.devnet", ChainFamily::Ed25519Named).unwrap(),
    }
}

/// An EVM-to-EVM token transfer with the id derived the same way the
/// ingress derives it.
pub fn token_message(required_signatures: u16, timestamp: i64) -> Message {
    let source = evm_descriptor("ethereum", "1");
    let destination = evm_descriptor("polygon", "137");
    let sender = Address::parse(SENDER_EVM, ChainFamily::Evm).unwrap();
    let recipient = Address::parse(RECIPIENT_EVM, ChainFamily::Evm).unwrap();
    let payload = Payload::TokenTransfer(TokenTransferPayload {
        token_address: Address::parse_token(TOKEN_EVM, ChainFamily::Evm, TokenStandard::Erc20)
            .unwrap(),
        amount: ONE_TOKEN.to_string(),
        token_standard: TokenStandard::Erc20,
        decimals: 18,
    });
    let nonce = 7;
    let id = relayer_hub::canonical::derive_message_id(
        MessageType::TokenTransfer,
        &source.chain_id,
        &destination.chain_id,
        &sender,
        &recipient,
        &payload,
        nonce,
    )
    .unwrap();

    Message {
        id,
        message_type: MessageType::TokenTransfer,
        source,
        destination,
        sender,
        recipient,
        payload,
        nonce,
        timestamp,
        required_signatures,
        validator_signatures: Vec::new(),
        status: MessageStatus::Created,
        destination_tx: None,
        last_error: None,
    }
}

/// Same transfer but destined for the Base58 family.
pub fn cross_family_message(required_signatures: u16, timestamp: i64) -> Message {
    let mut message = token_message(required_signatures, timestamp);
    message.destination = svm_descriptor("solana");
    message.recipient = Address::parse(RECIPIENT_BASE58, ChainFamily::Ed25519Base58).unwrap();
    message.id = relayer_hub::canonical::derive_message_id(
        message.message_type,
        &message.source.chain_id,
        &message.destination.chain_id,
        &message.sender,
        &message.recipient,
        &message.payload,
        message.nonce,
    )
    .unwrap();
    message
}

// ============================================================================
// SIGNING VALIDATORS
// ============================================================================

/// An ECDSA validator with a deterministic key and its derived address.
pub struct EcdsaValidator {
    key: EcdsaSigningKey,
    pub address: String,
}

impl EcdsaValidator {
    /// Seeds 1..=200 yield valid secp256k1 scalars.
    pub fn new(seed: u8) -> Self {
        assert!(seed > 0, "zero seed is not a valid scalar");
        let key = EcdsaSigningKey::from_bytes(&[seed; 32].into()).unwrap();
        let address = ethereum_address(key.verifying_key());
        Self { key, address }
    }

    /// Produces the 65-byte r||s||v hex signature over a canonical hash.
    pub fn sign(&self, hash: &[u8; 32]) -> ValidatorSignature {
        let (signature, recovery_id) = self.key.sign_prehash_recoverable(hash).unwrap();
        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(recovery_id.to_byte() + 27);
        ValidatorSignature {
            validator_address: self.address.clone(),
            scheme: SignatureScheme::Ecdsa,
            signature: hex::encode(bytes),
            public_key: None,
        }
    }

    pub fn registry_entry(&self) -> RegisteredValidator {
        RegisteredValidator {
            address: self.address.clone(),
            scheme: SignatureScheme::Ecdsa,
        }
    }
}

/// An Ed25519 validator whose address is its Base58 public key.
pub struct Ed25519Validator {
    key: ed25519_dalek::SigningKey,
    pub address: String,
}

impl Ed25519Validator {
    pub fn new(seed: u8) -> Self {
        let key = ed25519_dalek::SigningKey::from_bytes(&[seed; 32]);
        let address = bs58::encode(key.verifying_key().to_bytes()).into_string();
        Self { key, address }
    }

    pub fn sign(&self, hash: &[u8; 32]) -> ValidatorSignature {
        let signature = self.key.sign(hash);
        ValidatorSignature {
            validator_address: self.address.clone(),
            scheme: SignatureScheme::Ed25519,
            signature: bs58::encode(signature.to_bytes()).into_string(),
            public_key: Some(self.address.clone()),
        }
    }

    pub fn registry_entry(&self) -> RegisteredValidator {
        RegisteredValidator {
            address: self.address.clone(),
            scheme: SignatureScheme::Ed25519,
        }
    }
}

pub fn registry_of(entries: Vec<RegisteredValidator>) -> ValidatorRegistry {
    ValidatorRegistry::new(Environment::Devnet, entries)
}

// ============================================================================
// MOCK CHAIN ADAPTER
// ============================================================================

/// Scriptable adapter: submit results and confirmation outcomes are popped
/// from queues, with sensible defaults once a script runs dry.
pub struct MockAdapter {
    descriptor: ChainDescriptor,
    submit_calls: AtomicUsize,
    submit_script: Mutex<VecDeque<Result<String, AdapterError>>>,
    confirm_script: Mutex<VecDeque<ConfirmationStatus>>,
}

impl MockAdapter {
    pub fn new(descriptor: ChainDescriptor) -> Self {
        Self {
            descriptor,
            submit_calls: AtomicUsize::new(0),
            submit_script: Mutex::new(VecDeque::new()),
            confirm_script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_confirmations(self, outcomes: Vec<ConfirmationStatus>) -> Self {
        *self.confirm_script.lock().unwrap() = outcomes.into();
        self
    }

    pub fn with_submit_results(self, results: Vec<Result<String, AdapterError>>) -> Self {
        *self.submit_script.lock().unwrap() = results.into();
        self
    }

    pub fn submit_count(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainAdapter for MockAdapter {
    fn descriptor(&self) -> &ChainDescriptor {
        &self.descriptor
    }

    fn block_time(&self) -> Duration {
        Duration::from_millis(10)
    }

    async fn latest_block(&self) -> Result<u64, AdapterError> {
        Ok(100)
    }

    async fn submit(&self, _tx: &BuiltTx) -> Result<String, AdapterError> {
        let call = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(result) = self.submit_script.lock().unwrap().pop_front() {
            return result;
        }
        Ok(format!("0xmock{:02}", call))
    }

    async fn wait_confirmed(
        &self,
        _tx_hash: &str,
        _min_confirmations: u32,
        _deadline: Duration,
    ) -> Result<ConfirmationStatus, AdapterError> {
        Ok(self
            .confirm_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ConfirmationStatus::Confirmed))
    }

    fn build_release(
        &self,
        message: &Message,
        signatures: &[ValidatorSignature],
        nonce: u64,
    ) -> Result<BuiltTx, BuildError> {
        let mut bytes = message.id.as_bytes().to_vec();
        bytes.push(nonce as u8);
        bytes.push(signatures.len() as u8);
        Ok(BuiltTx {
            content_hash: format!("content-{}-{}", message.id, nonce),
            bytes,
        })
    }
}
