//! Chain Adapter Module
//!
//! The per-family broadcast contract. An adapter builds the destination
//! release transaction for a message, submits opaque bytes, and reports
//! confirmation progress. The processing core never inspects built bytes;
//! everything chain-specific stays behind [`ChainAdapter`].

pub mod evm;
pub mod named;
pub mod svm;

pub use evm::EvmAdapter;
pub use named::NamedAdapter;
pub use svm::SvmAdapter;

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    ChainDescriptor, ChainFamily, Message, SignatureScheme, ValidatorSignature,
};

// ============================================================================
// ERRORS
// ============================================================================

/// Failure talking to or being refused by a chain.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("chain unavailable: {0}")]
    Unavailable(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("broadcast rejected: {detail}")]
    Rejected { detail: String, deterministic: bool },
    #[error("transaction already known: {tx_hash}")]
    AlreadyKnown { tx_hash: String },
    #[error("deadline exceeded: {0}")]
    Timeout(String),
}

impl AdapterError {
    /// Whether retrying the same operation can reasonably succeed.
    pub fn retryable(&self) -> bool {
        match self {
            AdapterError::Unavailable(_)
            | AdapterError::RateLimited(_)
            | AdapterError::Timeout(_) => true,
            AdapterError::Rejected { deterministic, .. } => !deterministic,
            AdapterError::AlreadyKnown { .. } => false,
        }
    }
}

/// Failure while building a release transaction. Always terminal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("invalid amount: {0}")]
    Amount(String),
    #[error("amount {0} does not fit the destination's integer width")]
    AmountOverflow(String),
    #[error("invalid {0} address: {1}")]
    Address(&'static str, String),
    #[error("invalid message id: {0}")]
    MessageId(String),
    #[error("undecodable signature from {0}")]
    Signature(String),
    #[error("encode failure: {0}")]
    Encode(String),
}

// ============================================================================
// ADAPTER CONTRACT
// ============================================================================

/// Confirmation state of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationStatus {
    /// Buried under at least the requested number of confirmations
    Confirmed,
    /// Not yet confirmed when the deadline expired
    Pending,
    /// Previously observed on chain, then gone
    Reorged,
}

/// A built release transaction, opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltTx {
    /// Family-specific serialized transaction
    pub bytes: Vec<u8>,
    /// Content-addressed hash derivable from the bytes alone; used to poll
    /// for a transaction whose submission had an ambiguous outcome
    pub content_hash: String,
}

/// Per-chain broadcast contract.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Descriptor of the chain this adapter serves.
    fn descriptor(&self) -> &ChainDescriptor;

    /// Family shortcut.
    fn family(&self) -> ChainFamily {
        self.descriptor().family
    }

    /// Nominal block interval, used to size confirmation deadlines.
    fn block_time(&self) -> Duration;

    /// Current chain head height (or slot).
    async fn latest_block(&self) -> Result<u64, AdapterError>;

    /// Broadcasts built bytes, returning the chain's transaction hash.
    async fn submit(&self, tx: &BuiltTx) -> Result<String, AdapterError>;

    /// Polls until the transaction is buried under `min_confirmations`
    /// blocks, the chain drops it after it was seen, or the deadline passes.
    async fn wait_confirmed(
        &self,
        tx_hash: &str,
        min_confirmations: u32,
        deadline: Duration,
    ) -> Result<ConfirmationStatus, AdapterError>;

    /// Builds the family-specific release call authorizing the transfer.
    fn build_release(
        &self,
        message: &Message,
        signatures: &[ValidatorSignature],
        nonce: u64,
    ) -> Result<BuiltTx, BuildError>;
}

// ============================================================================
// SHARED HELPERS
// ============================================================================

/// Decodes a message id (`msg_` + 32 hex chars) into a right-aligned
/// 32-byte word for on-chain replay records.
pub(crate) fn message_id_word(id: &str) -> Result<[u8; 32], BuildError> {
    let tail = id
        .strip_prefix(crate::canonical::MESSAGE_ID_PREFIX)
        .ok_or_else(|| BuildError::MessageId(id.to_string()))?;
    let bytes = hex::decode(tail).map_err(|_| BuildError::MessageId(id.to_string()))?;
    if bytes.len() != 16 {
        return Err(BuildError::MessageId(id.to_string()));
    }
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&bytes);
    Ok(word)
}

/// Decodes one validator signature into raw bytes for a bridge call.
pub(crate) fn signature_bytes(sig: &ValidatorSignature) -> Result<Vec<u8>, BuildError> {
    let expected_len = match sig.scheme {
        SignatureScheme::Ecdsa => 65,
        SignatureScheme::Ed25519 => 64,
    };
    if let Ok(bytes) = bs58::decode(&sig.signature).into_vec() {
        if bytes.len() == expected_len {
            return Ok(bytes);
        }
    }
    let stripped = sig.signature.strip_prefix("0x").unwrap_or(&sig.signature);
    if let Ok(bytes) = hex::decode(stripped) {
        if bytes.len() == expected_len {
            return Ok(bytes);
        }
    }
    Err(BuildError::Signature(sig.validator_address.clone()))
}

// ============================================================================
// JSON-RPC PLUMBING
// ============================================================================

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    method: String,
    params: serde_json::Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    result: Option<T>,
    error: Option<JsonRpcErrorBody>,
    #[allow(dead_code)]
    id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

/// Error from one JSON-RPC call, before adapter-specific classification.
#[derive(Debug, Clone, Error)]
pub(crate) enum RpcError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
}

/// Minimal JSON-RPC client shared by all three adapters.
pub(crate) struct JsonRpcClient {
    client: reqwest::Client,
    url: String,
}

impl JsonRpcClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, RpcError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
            id: 1,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        if response.status().as_u16() == 429 {
            return Err(RpcError::Rpc {
                code: 429,
                message: "too many requests".to_string(),
            });
        }

        let body: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        if let Some(error) = body.error {
            return Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        body.result.ok_or_else(|| RpcError::Transport("missing result".to_string()))
    }

    /// Same as [`JsonRpcClient::call`] but tolerates a `null` result.
    pub async fn call_optional<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>, RpcError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
            id: 1,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let body: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        if let Some(error) = body.error {
            return Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(body.result)
    }
}

/// Default mapping from an RPC failure to an adapter error; submit paths
/// refine this with family-specific rejection classification.
pub(crate) fn map_rpc_error(err: RpcError) -> AdapterError {
    match err {
        RpcError::Transport(detail) => AdapterError::Unavailable(detail),
        RpcError::Rpc { code: 429, message } => AdapterError::RateLimited(message),
        RpcError::Rpc { code, message } => AdapterError::Rejected {
            detail: format!("rpc error {}: {}", code, message),
            deterministic: false,
        },
    }
}
