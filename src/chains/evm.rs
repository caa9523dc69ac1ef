//! EVM Chain Adapter
//!
//! Speaks JSON-RPC to EVM-family nodes and packs ABI calls against the
//! configured bridge contract. Token releases call
//! `unlockToken(bytes32,address,address,uint256,bytes[])`, NFT releases call
//! `unlockNFT(bytes32,address,address,uint256,bytes[])`; both carry the
//! counted validator signatures so the contract can re-check quorum on
//! chain.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{
    map_rpc_error, message_id_word, signature_bytes, AdapterError, BuildError, BuiltTx,
    ChainAdapter, ConfirmationStatus, JsonRpcClient, RpcError,
};
use crate::canonical::{keccak256, u256_be_bytes};
use crate::types::{Address, ChainDescriptor, ChainFamily, Message, Payload, ValidatorSignature};

const UNLOCK_TOKEN_SIGNATURE: &str = "unlockToken(bytes32,address,address,uint256,bytes[])";
const UNLOCK_NFT_SIGNATURE: &str = "unlockNFT(bytes32,address,address,uint256,bytes[])";

/// Transaction receipt fields the adapter cares about.
#[derive(Debug, Deserialize)]
struct TxReceipt {
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
    status: Option<String>,
}

/// Adapter for EVM-family chains.
pub struct EvmAdapter {
    descriptor: ChainDescriptor,
    rpc: JsonRpcClient,
    block_time: Duration,
    poll_interval: Duration,
}

impl EvmAdapter {
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

    fn parse_hex_quantity(value: &str) -> Result<u64, AdapterError> {
        u64::from_str_radix(value.strip_prefix("0x").unwrap_or(value), 16)
            .map_err(|e| AdapterError::Unavailable(format!("bad hex quantity: {}", e)))
    }

    fn classify_submit_error(&self, err: RpcError, content_hash: &str) -> AdapterError {
        match err {
            RpcError::Transport(detail) => AdapterError::Unavailable(detail),
            RpcError::Rpc { code: 429, message } => AdapterError::RateLimited(message),
            RpcError::Rpc { message, .. } => {
                let lower = message.to_ascii_lowercase();
                if lower.contains("already known") || lower.contains("known transaction") {
                    AdapterError::AlreadyKnown {
                        tx_hash: content_hash.to_string(),
                    }
                } else if lower.contains("nonce too low") || lower.contains("insufficient funds") {
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
impl ChainAdapter for EvmAdapter {
    fn descriptor(&self) -> &ChainDescriptor {
        &self.descriptor
    }

    fn block_time(&self) -> Duration {
        self.block_time
    }

    async fn latest_block(&self) -> Result<u64, AdapterError> {
        let hex_height: String = self
            .rpc
            .call("eth_blockNumber", json!([]))
            .await
            .map_err(map_rpc_error)?;
        Self::parse_hex_quantity(&hex_height)
    }

    async fn submit(&self, tx: &BuiltTx) -> Result<String, AdapterError> {
        let raw = format!("0x{}", hex::encode(&tx.bytes));
        match self.rpc.call::<String>("eth_sendRawTransaction", json!([raw])).await {
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
        min_confirmations: u32,
        deadline: Duration,
    ) -> Result<ConfirmationStatus, AdapterError> {
        let started = tokio::time::Instant::now();
        let mut seen = false;

        loop {
            let receipt: Option<TxReceipt> = self
                .rpc
                .call_optional("eth_getTransactionReceipt", json!([tx_hash]))
                .await
                .map_err(map_rpc_error)?;

            match receipt {
                Some(receipt) => {
                    if receipt.status.as_deref() == Some("0x0") {
                        return Err(AdapterError::Rejected {
                            detail: "execution reverted".to_string(),
                            deterministic: true,
                        });
                    }
                    if let Some(block_hex) = receipt.block_number {
                        seen = true;
                        let mined_at = Self::parse_hex_quantity(&block_hex)?;
                        let head = self.latest_block().await?;
                        if head >= mined_at && (head - mined_at + 1) >= u64::from(min_confirmations)
                        {
                            return Ok(ConfirmationStatus::Confirmed);
                        }
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
        let id_word = message_id_word(&message.id)?;
        let recipient = evm_address_bytes(&message.recipient)?;
        let sigs: Vec<Vec<u8>> = signatures
            .iter()
            .map(signature_bytes)
            .collect::<Result<_, _>>()?;

        let (selector_sig, asset, value_word) = match &message.payload {
            Payload::TokenTransfer(p) => (
                UNLOCK_TOKEN_SIGNATURE,
                evm_asset_word(&p.token_address),
                u256_be_bytes(&p.amount).map_err(|e| BuildError::Amount(e.to_string()))?,
            ),
            Payload::NftTransfer(p) => (
                UNLOCK_NFT_SIGNATURE,
                evm_asset_word(&p.nft_contract),
                u256_be_bytes(&p.token_id).map_err(|e| BuildError::Amount(e.to_string()))?,
            ),
        };

        let bytes = encode_unlock_call(selector_sig, id_word, recipient, asset, value_word, &sigs);
        let content_hash = format!("0x{}", hex::encode(keccak256(&bytes)));
        Ok(BuiltTx { bytes, content_hash })
    }
}

// ============================================================================
// ABI ENCODING
// ============================================================================

fn evm_address_bytes(addr: &Address) -> Result<[u8; 20], BuildError> {
    let stripped = addr.raw.strip_prefix("0x").unwrap_or(&addr.raw);
    let bytes = hex::decode(stripped)
        .map_err(|e| BuildError::Address("recipient", e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| BuildError::Address("recipient", "expected 20 bytes".to_string()))
}

/// Maps an asset address to the 20-byte identifier the bridge contract
/// keys its asset registry by. Native EVM addresses pass through; foreign
/// family addresses map to the same Keccak-derived surrogate the contract
/// computes for wrapped assets.
fn evm_asset_word(addr: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    if addr.family == ChainFamily::Evm {
        if let Ok(bytes) =
            hex::decode(addr.raw.strip_prefix("0x").unwrap_or(&addr.raw))
        {
            if bytes.len() == 20 {
                word[12..].copy_from_slice(&bytes);
                return word;
            }
        }
    }
    let digest = keccak256(addr.raw.as_bytes());
    word[12..].copy_from_slice(&digest[12..32]);
    word
}

fn address_word(addr: [u8; 20]) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&addr);
    word
}

fn usize_word(value: usize) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&(value as u64).to_be_bytes());
    word
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(32) * 32
}

/// Encodes `selector(bytes32,address,address,uint256,bytes[])` calldata.
///
/// Head layout is five words; the single dynamic argument (the signature
/// array) sits in the tail with standard offset framing.
fn encode_unlock_call(
    signature: &str,
    id_word: [u8; 32],
    recipient: [u8; 20],
    asset_word: [u8; 32],
    value_word: [u8; 32],
    sigs: &[Vec<u8>],
) -> Vec<u8> {
    let selector = &keccak256(signature.as_bytes())[..4];

    let mut out = Vec::with_capacity(4 + 32 * (6 + 3 * sigs.len()));
    out.extend_from_slice(selector);
    out.extend_from_slice(&id_word);
    out.extend_from_slice(&address_word(recipient));
    out.extend_from_slice(&asset_word);
    out.extend_from_slice(&value_word);
    // Offset of the bytes[] payload, measured from the start of the args
    out.extend_from_slice(&usize_word(5 * 32));

    // Array region: element count, then per-element offsets relative to the
    // start of the element area, then length-prefixed padded elements
    out.extend_from_slice(&usize_word(sigs.len()));
    let mut offset = sigs.len() * 32;
    for sig in sigs {
        out.extend_from_slice(&usize_word(offset));
        offset += 32 + padded_len(sig.len());
    }
    for sig in sigs {
        out.extend_from_slice(&usize_word(sig.len()));
        out.extend_from_slice(sig);
        out.resize(out.len() + padded_len(sig.len()) - sig.len(), 0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlock_call_layout_is_standard_abi() {
        let sigs = vec![vec![0xaa; 65], vec![0xbb; 65]];
        let out = encode_unlock_call(
            UNLOCK_TOKEN_SIGNATURE,
            [1u8; 32],
            [2u8; 20],
            address_word([3u8; 20]),
            usize_word(1000),
            &sigs,
        );

        // selector + 5 head words + count + 2 offsets + 2 * (len + 96-byte padded sig)
        assert_eq!(out.len(), 4 + 32 * 5 + 32 + 32 * 2 + 2 * (32 + 96));
        // bytes[] offset points just past the head
        assert_eq!(out[4 + 32 * 4 + 31], 160);
        // element count
        assert_eq!(out[4 + 32 * 5 + 31], 2);
        // first element offset: past the two offset words
        assert_eq!(out[4 + 32 * 6 + 31], 64);
        // second element offset: 64 + 32 + padded(65) = 192
        assert_eq!(out[4 + 32 * 7 + 31], 192);
        // first element length
        assert_eq!(out[4 + 32 * 8 + 31], 65);
    }

    #[test]
    fn foreign_assets_map_to_keccak_surrogates() {
        let evm = Address::parse("0x00000000000000000000000000000000000000aa", ChainFamily::Evm)
            .unwrap();
        let word = evm_asset_word(&evm);
        assert_eq!(word[31], 0xaa);
        assert!(word[..12].iter().all(|b| *b == 0));

        let foreign = Address::parse(&"1".repeat(32), ChainFamily::Ed25519Base58).unwrap();
        let surrogate = evm_asset_word(&foreign);
        assert_ne!(surrogate, [0u8; 32]);
        assert!(surrogate[..12].iter().all(|b| *b == 0));
    }
}
