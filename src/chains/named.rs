//! Named-Account Chain Adapter
//!
//! Builds function-call actions for Ed25519 chains with human-readable
//! account names. A release is a call to `unlock_ft` or `unlock_nft` on the
//! bridge account, with base64-encoded JSON arguments carrying the message
//! id, endpoints, amount, and the counted validator signatures.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{
    map_rpc_error, signature_bytes, AdapterError, BuildError, BuiltTx, ChainAdapter,
    ConfirmationStatus, JsonRpcClient, RpcError,
};
use crate::canonical::{keccak256, parse_u256};
use crate::types::{Address, ChainDescriptor, ChainFamily, Message, Payload, ValidatorSignature};

const UNLOCK_FT_METHOD: &str = "unlock_ft";
const UNLOCK_NFT_METHOD: &str = "unlock_nft";

// 100 Tgas covers the signature checks plus the nested transfer call.
const FUNCTION_CALL_GAS: u64 = 100_000_000_000_000;

// ============================================================================
// ACTION ENCODING
// ============================================================================

/// Signature entry the bridge account verifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SignatureArg {
    validator: String,
    /// Hex-encoded raw signature bytes
    signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCallAction {
    method_name: String,
    /// Base64 of the JSON argument object
    args: String,
    gas: u64,
    deposit: String,
}

/// The serialized unit handed to the broadcast endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BuiltAction {
    receiver_id: String,
    actions: Vec<FunctionCallAction>,
}

// ============================================================================
// RPC RESPONSE SHAPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct BlockResponse {
    header: BlockHeader,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    height: u64,
}

// ============================================================================
// ADAPTER
// ============================================================================

/// Adapter for Ed25519/named-account chains.
pub struct NamedAdapter {
    descriptor: ChainDescriptor,
    rpc: JsonRpcClient,
    block_time: Duration,
    poll_interval: Duration,
}

impl NamedAdapter {
    pub fn new(
        descriptor: ChainDescriptor,
        rpc_url: &str,
        block_time: Duration,
    ) -> Result<Self, AdapterError> {
        let rpc = JsonRpcClient::new(rpc_url, Duration::from_secs(30))?;
        let poll_interval = (block_time / 2).max(Duration::from_millis(500));
        Ok(Self {
            descriptor,
            rpc,
            block_time,
            poll_interval,
        })
    }

    fn classify_submit_error(&self, err: RpcError, content_hash: &str) -> AdapterError {
        match err {
            RpcError::Transport(detail) => AdapterError::Unavailable(detail),
            RpcError::Rpc { code: 429, message } => AdapterError::RateLimited(message),
            RpcError::Rpc { message, .. } => {
                let lower = message.to_ascii_lowercase();
                if lower.contains("already processed") {
                    AdapterError::AlreadyKnown {
                        tx_hash: content_hash.to_string(),
                    }
                } else if lower.contains("not enough balance") || lower.contains("invalid nonce") {
                    AdapterError::Rejected {
                        detail: message,
                        deterministic: true,
                    }
                } else {
                    AdapterError::Rejected {
                        detail: message,
                        deterministic: false,
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ChainAdapter for NamedAdapter {
    fn descriptor(&self) -> &ChainDescriptor {
        &self.descriptor
    }

    fn block_time(&self) -> Duration {
        self.block_time
    }

    async fn latest_block(&self) -> Result<u64, AdapterError> {
        let block: BlockResponse = self
            .rpc
            .call("block", json!({"finality": "final"}))
            .await
            .map_err(map_rpc_error)?;
        Ok(block.header.height)
    }

    async fn submit(&self, tx: &BuiltTx) -> Result<String, AdapterError> {
        let encoded = general_purpose::STANDARD.encode(&tx.bytes);
        match self
            .rpc
            .call::<String>("broadcast_tx_async", json!([encoded]))
            .await
        {
            Ok(tx_hash) => {
                debug!(chain = %self.descriptor.name, tx_hash = %tx_hash, "transaction broadcast");
                Ok(tx_hash)
            }
            Err(err) => Err(self.classify_submit_error(err, &tx.content_hash)),
        }
    }

    async fn wait_confirmed(
        &self,
        tx_hash: &str,
        _min_confirmations: u32,
        deadline: Duration,
    ) -> Result<ConfirmationStatus, AdapterError> {
        let started = tokio::time::Instant::now();
        let mut seen = false;

        loop {
            let result = self
                .rpc
                .call::<serde_json::Value>(
                    "tx",
                    json!({
                        "tx_hash": tx_hash,
                        "sender_account_id": self.descriptor.bridge_contract.raw,
                    }),
                )
                .await;

            match result {
                Ok(outcome) => {
                    seen = true;
                    let status = &outcome["status"];
                    if status.get("SuccessValue").is_some() {
                        return Ok(ConfirmationStatus::Confirmed);
                    }
                    if status.get("Failure").is_some() {
                        return Err(AdapterError::Rejected {
                            detail: "execution failed on chain".to_string(),
                            deterministic: true,
                        });
                    }
                }
                Err(RpcError::Rpc { message, .. })
                    if message.to_ascii_uppercase().contains("UNKNOWN_TRANSACTION")
                        || message.to_ascii_lowercase().contains("doesn't exist") =>
                {
                    if seen {
                        return Ok(ConfirmationStatus::Reorged);
                    }
                }
                Err(err) => return Err(map_rpc_error(err)),
            }

            if started.elapsed() >= deadline {
                return Ok(ConfirmationStatus::Pending);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn build_release(
        &self,
        message: &Message,
        signatures: &[ValidatorSignature],
        _nonce: u64,
    ) -> Result<BuiltTx, BuildError> {
        let sig_args: Vec<SignatureArg> = signatures
            .iter()
            .map(|sig| {
                Ok(SignatureArg {
                    validator: sig.validator_address.clone(),
                    signature: hex::encode(signature_bytes(sig)?),
                })
            })
            .collect::<Result<_, BuildError>>()?;

        let (method_name, args) = match &message.payload {
            Payload::TokenTransfer(p) => (
                UNLOCK_FT_METHOD,
                json!({
                    "message_id": message.id,
                    "source_chain": message.source.chain_id,
                    "sender_address": message.sender.raw,
                    "recipient": message.recipient.raw,
                    "token_contract": asset_account_id(&p.token_address),
                    "amount": fungible_amount(&p.amount)?,
                    "signatures": sig_args,
                }),
            ),
            Payload::NftTransfer(p) => (
                UNLOCK_NFT_METHOD,
                json!({
                    "message_id": message.id,
                    "source_chain": message.source.chain_id,
                    "sender_address": message.sender.raw,
                    "recipient": message.recipient.raw,
                    "nft_contract": asset_account_id(&p.nft_contract),
                    "token_id": p.token_id,
                    "signatures": sig_args,
                }),
            ),
        };

        let args_json =
            serde_json::to_vec(&args).map_err(|e| BuildError::Encode(e.to_string()))?;
        let built = BuiltAction {
            receiver_id: self.descriptor.bridge_contract.raw.clone(),
            actions: vec![FunctionCallAction {
                method_name: method_name.to_string(),
                args: general_purpose::STANDARD.encode(args_json),
                gas: FUNCTION_CALL_GAS,
                // One yocto, the standard guard on transfer-adjacent calls
                deposit: "1".to_string(),
            }],
        };

        let bytes = serde_json::to_vec(&built).map_err(|e| BuildError::Encode(e.to_string()))?;
        let content_hash = bs58::encode(keccak256(&bytes)).into_string();
        Ok(BuiltTx { bytes, content_hash })
    }
}

// ============================================================================
// ARGUMENT HELPERS
// ============================================================================

/// Maps an asset address to an account id the bridge contract can key on.
/// Native named accounts pass through; foreign family addresses map to the
/// 64-hex implicit-account surrogate derived from their Keccak digest.
fn asset_account_id(addr: &Address) -> String {
    if addr.family == ChainFamily::Ed25519Named {
        return addr.raw.clone();
    }
    hex::encode(keccak256(addr.raw.as_bytes()))
}

/// Amounts travel as decimal strings bounded to u128, the chain's balance
/// width.
fn fungible_amount(amount: &str) -> Result<String, BuildError> {
    let value = parse_u256(amount).map_err(|e| BuildError::Amount(e.to_string()))?;
    if value > U256::from(u128::MAX) {
        return Err(BuildError::AmountOverflow(amount.to_string()));
    }
    Ok(value.to_string())
}
