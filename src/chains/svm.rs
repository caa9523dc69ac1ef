//! Base58-Family Chain Adapter
//!
//! Builds program instructions for Ed25519/Base58 chains: a borsh-encoded
//! unlock instruction against the bridge program plus the account list the
//! program resolves its vaults from. Submission and confirmation go through
//! the chain's JSON-RPC surface (`sendTransaction`, `getSignatureStatuses`,
//! `getSlot`).

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};
use primitive_types::U256;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{
    map_rpc_error, message_id_word, signature_bytes, AdapterError, BuildError, BuiltTx,
    ChainAdapter, ConfirmationStatus, JsonRpcClient, RpcError,
};
use crate::canonical::{keccak256, parse_u256, u256_be_bytes};
use crate::types::{Address, ChainDescriptor, ChainFamily, Message, Payload, ValidatorSignature};

// ============================================================================
// INSTRUCTION ENCODING
// ============================================================================

/// One account the unlock instruction touches.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AccountMeta {
    pub pubkey: [u8; 32],
    pub is_signer: bool,
    pub is_writable: bool,
}

/// Bridge program instruction data.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum BridgeInstruction {
    /// Release fungible tokens from the vault to the recipient
    UnlockToken {
        message_id: [u8; 32],
        amount: u64,
        signatures: Vec<Vec<u8>>,
    },
    /// Release one non-fungible token to the recipient
    UnlockNft {
        message_id: [u8; 32],
        token_id: [u8; 32],
        signatures: Vec<Vec<u8>>,
    },
}

/// The serialized unit handed to `sendTransaction`.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BuiltInstruction {
    pub program_id: [u8; 32],
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

// ============================================================================
// RPC RESPONSE SHAPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct SignatureStatusesResponse {
    value: Vec<Option<SignatureStatus>>,
}

#[derive(Debug, Deserialize)]
struct SignatureStatus {
    confirmations: Option<u64>,
    #[serde(rename = "confirmationStatus")]
    confirmation_status: Option<String>,
    err: Option<serde_json::Value>,
}

// ============================================================================
// ADAPTER
// ============================================================================

/// Adapter for Ed25519/Base58-family chains.
pub struct SvmAdapter {
    descriptor: ChainDescriptor,
    rpc: JsonRpcClient,
    block_time: Duration,
    poll_interval: Duration,
}

impl SvmAdapter {
    pub fn new(
        descriptor: ChainDescriptor,
        rpc_url: &str,
        block_time: Duration,
    ) -> Result<Self, AdapterError> {
        let rpc = JsonRpcClient::new(rpc_url, Duration::from_secs(30))?;
        let poll_interval = (block_time / 2).max(Duration::from_millis(250));
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
                if lower.contains("already been processed") || lower.contains("already processed") {
                    AdapterError::AlreadyKnown {
                        tx_hash: content_hash.to_string(),
                    }
                } else if lower.contains("insufficient funds") {
                    AdapterError::Rejected {
                        detail: message,
                        deterministic: true,
                    }
                } else {
                    // Blockhash expiry and queue pressure clear on rebuild
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
impl ChainAdapter for SvmAdapter {
    fn descriptor(&self) -> &ChainDescriptor {
        &self.descriptor
    }

    fn block_time(&self) -> Duration {
        self.block_time
    }

    async fn latest_block(&self) -> Result<u64, AdapterError> {
        self.rpc
            .call("getSlot", json!([]))
            .await
            .map_err(map_rpc_error)
    }

    async fn submit(&self, tx: &BuiltTx) -> Result<String, AdapterError> {
        let encoded = general_purpose::STANDARD.encode(&tx.bytes);
        match self
            .rpc
            .call::<String>("sendTransaction", json!([encoded, {"encoding": "base64"}]))
            .await
        {
            Ok(signature) => {
                debug!(chain = %self.descriptor.name, tx_hash = %signature, "transaction broadcast");
                Ok(signature)
            }
            Err(err) => Err(self.classify_submit_error(err, &tx.content_hash)),
        }
    }

    async fn wait_confirmed(
        &self,
        tx_hash: &str,
        min_confirmations: u32,
        deadline: Duration,
    ) -> Result<ConfirmationStatus, AdapterError> {
        let started = tokio::time::Instant::now();
        let mut seen = false;

        loop {
            let response: SignatureStatusesResponse = self
                .rpc
                .call(
                    "getSignatureStatuses",
                    json!([[tx_hash], {"searchTransactionHistory": true}]),
                )
                .await
                .map_err(map_rpc_error)?;

            match response.value.into_iter().next().flatten() {
                Some(status) => {
                    if status.err.is_some() {
                        return Err(AdapterError::Rejected {
                            detail: "transaction failed on chain".to_string(),
                            deterministic: true,
                        });
                    }
                    seen = true;
                    // A null confirmation count means the transaction is
                    // rooted; otherwise compare against the requested depth.
                    let confirmed = match (&status.confirmation_status, status.confirmations) {
                        (Some(level), _) if level == "finalized" => true,
                        (_, None) => true,
                        (_, Some(n)) => n >= u64::from(min_confirmations),
                    };
                    if confirmed {
                        return Ok(ConfirmationStatus::Confirmed);
                    }
                }
                None if seen => return Ok(ConfirmationStatus::Reorged),
                None => {}
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
        let message_id = message_id_word(&message.id)?;
        let program_id = base58_key(&self.descriptor.bridge_contract.raw)
            .ok_or_else(|| BuildError::Address("bridge contract", "not a base58 key".to_string()))?;
        let recipient = base58_key(&message.recipient.raw)
            .ok_or_else(|| BuildError::Address("recipient", "not a base58 key".to_string()))?;
        let sigs: Vec<Vec<u8>> = signatures
            .iter()
            .map(signature_bytes)
            .collect::<Result<_, _>>()?;

        let (mint, instruction) = match &message.payload {
            Payload::TokenTransfer(p) => {
                let amount = fungible_amount(&p.amount)?;
                (
                    asset_key(&p.token_address),
                    BridgeInstruction::UnlockToken {
                        message_id,
                        amount,
                        signatures: sigs,
                    },
                )
            }
            Payload::NftTransfer(p) => (
                asset_key(&p.nft_contract),
                BridgeInstruction::UnlockNft {
                    message_id,
                    token_id: u256_be_bytes(&p.token_id)
                        .map_err(|e| BuildError::Amount(e.to_string()))?,
                    signatures: sigs,
                },
            ),
        };

        let data = borsh::to_vec(&instruction).map_err(|e| BuildError::Encode(e.to_string()))?;
        let built = BuiltInstruction {
            program_id,
            accounts: vec![
                AccountMeta {
                    pubkey: recipient,
                    is_signer: false,
                    is_writable: true,
                },
                AccountMeta {
                    pubkey: mint,
                    is_signer: false,
                    is_writable: true,
                },
            ],
            data,
        };
        let bytes = borsh::to_vec(&built).map_err(|e| BuildError::Encode(e.to_string()))?;
        let content_hash = bs58::encode(keccak256(&bytes)).into_string();
        Ok(BuiltTx { bytes, content_hash })
    }
}

// ============================================================================
// KEY DERIVATION
// ============================================================================

fn base58_key(raw: &str) -> Option<[u8; 32]> {
    let bytes = bs58::decode(raw).into_vec().ok()?;
    bytes.try_into().ok()
}

/// Maps an asset address to the 32-byte mint key the bridge program keys
/// its vaults by. Native Base58 keys pass through; foreign family addresses
/// map to the Keccak surrogate the program derives for wrapped assets.
fn asset_key(addr: &Address) -> [u8; 32] {
    if addr.family == ChainFamily::Ed25519Base58 {
        if let Some(key) = base58_key(&addr.raw) {
            return key;
        }
    }
    keccak256(addr.raw.as_bytes())
}

/// SPL-style vault amounts are u64; wider values cannot be released here.
fn fungible_amount(amount: &str) -> Result<u64, BuildError> {
    let value = parse_u256(amount).map_err(|e| BuildError::Amount(e.to_string()))?;
    if value > U256::from(u64::MAX) {
        return Err(BuildError::AmountOverflow(amount.to_string()));
    }
    Ok(value.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fungible_amount_bounds() {
        assert_eq!(fungible_amount("1000000000").unwrap(), 1_000_000_000);
        assert_eq!(fungible_amount(&u64::MAX.to_string()).unwrap(), u64::MAX);
        assert!(matches!(
            fungible_amount("18446744073709551616"),
            Err(BuildError::AmountOverflow(_))
        ));
    }

    #[test]
    fn instruction_round_trips_through_borsh() {
        let instruction = BridgeInstruction::UnlockToken {
            message_id: [9u8; 32],
            amount: 42,
            signatures: vec![vec![1u8; 65]],
        };
        let bytes = borsh::to_vec(&instruction).unwrap();
        let decoded = BridgeInstruction::try_from_slice(&bytes).unwrap();
        assert_eq!(decoded, instruction);
    }
}
