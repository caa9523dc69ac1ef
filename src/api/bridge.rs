//! Bridge request intake.
//!
//! Turns an external transfer request into a persisted, queued message.
//! Everything user-controlled is validated here: chain names, address
//! syntax per family, amount syntax, and token metadata. The signature
//! threshold is resolved from the environment policy once, at creation,
//! and frozen into the message.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};
use warp::{http::StatusCode, Rejection, Reply};

use super::generic::{error_reply, json_reply, AppContext};
use crate::canonical;
use crate::config::ChainConfig;
use crate::storage::StoreError;
use crate::types::{
    Address, ChainFamily, Message, MessageStatus, MessageType, NftTransferPayload, Payload,
    TokenTransferPayload,
};

#[derive(Debug, Deserialize)]
pub struct BridgeTokenRequest {
    pub source_chain: String,
    pub dest_chain: String,
    pub token_address: String,
    pub amount: String,
    pub recipient: String,
    #[serde(default)]
    pub sender: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BridgeNftRequest {
    pub source_chain: String,
    pub dest_chain: String,
    pub nft_contract: String,
    pub token_id: String,
    pub recipient: String,
    #[serde(default)]
    pub sender: Option<String>,
}

/// Sender placeholder when the request omits one, per family syntax.
fn default_sender(family: ChainFamily) -> &'static str {
    match family {
        ChainFamily::Evm => "0x0000000000000000000000000000000000000000",
        ChainFamily::Ed25519Base58 => "11111111111111111111111111111111",
        ChainFamily::Ed25519Named => {
            "0000000000000000000000000000000000000000000000000000000000000000"
        }
    }
}

fn resolve_chains<'a>(
    ctx: &'a AppContext,
    source: &str,
    dest: &str,
) -> Result<(&'a ChainConfig, &'a ChainConfig), String> {
    if source.is_empty() || dest.is_empty() {
        return Err("source_chain and dest_chain are required".to_string());
    }
    let source_cfg = ctx
        .config
        .chain(source)
        .ok_or_else(|| format!("unknown source chain: {}", source))?;
    let dest_cfg = ctx
        .config
        .chain(dest)
        .ok_or_else(|| format!("unknown destination chain: {}", dest))?;
    if source_cfg.name == dest_cfg.name {
        return Err("source and destination chain must differ".to_string());
    }
    Ok((source_cfg, dest_cfg))
}

/// Shared tail of both intake paths: derive the id, freeze the threshold,
/// persist, and enqueue.
async fn create_and_enqueue(
    ctx: &AppContext,
    message_type: MessageType,
    source_cfg: &ChainConfig,
    dest_cfg: &ChainConfig,
    sender: Address,
    recipient: Address,
    payload: Payload,
) -> Result<warp::reply::WithStatus<warp::reply::Json>, Rejection> {
    let source = match source_cfg.descriptor() {
        Ok(d) => d,
        Err(e) => return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    };
    let destination = match dest_cfg.descriptor() {
        Ok(d) => d,
        Err(e) => return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    };

    let nonce = ctx.next_nonce(&sender.raw, &source.name).await;
    let id = match canonical::derive_message_id(
        message_type,
        &source.chain_id,
        &destination.chain_id,
        &sender,
        &recipient,
        &payload,
        nonce,
    ) {
        Ok(id) => id,
        Err(e) => return Ok(error_reply(StatusCode::BAD_REQUEST, e.to_string())),
    };

    let message = Message {
        id: id.clone(),
        message_type,
        source,
        destination,
        sender,
        recipient,
        payload,
        nonce,
        timestamp: chrono::Utc::now().timestamp(),
        required_signatures: ctx.config.required_signatures(ctx.environment),
        validator_signatures: Vec::new(),
        status: MessageStatus::Created,
        destination_tx: None,
        last_error: None,
    };

    if let Err(e) = message.validate(ctx.config.processor.max_signatures) {
        return Ok(error_reply(StatusCode::BAD_REQUEST, e.to_string()));
    }

    match ctx.store.save(&message).await {
        Ok(()) => {}
        Err(StoreError::Conflict(id)) => {
            return Ok(error_reply(
                StatusCode::CONFLICT,
                format!("message id collision: {}", id),
            ))
        }
        Err(e) => {
            warn!(message_id = %message.id, error = %e, "failed to persist message");
            return Ok(error_reply(StatusCode::SERVICE_UNAVAILABLE, "store unavailable"));
        }
    }

    info!(
        message_id = %message.id,
        source = %message.source.name,
        destination = %message.destination.name,
        "message accepted"
    );

    // The message is durable either way; a queue hiccup only delays it.
    if let Err(e) = ctx.queue.publish(&message.id).await {
        warn!(message_id = %message.id, error = %e, "failed to enqueue message");
    }

    Ok(json_reply(
        StatusCode::ACCEPTED,
        &serde_json::json!({
            "status": "pending",
            "message_id": message.id,
        }),
    ))
}

pub async fn handle_bridge_token(
    request: BridgeTokenRequest,
    ctx: Arc<AppContext>,
) -> Result<impl Reply, Rejection> {
    if request.token_address.is_empty() || request.amount.is_empty() || request.recipient.is_empty()
    {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "token_address, amount, and recipient are required",
        ));
    }

    let (source_cfg, dest_cfg) =
        match resolve_chains(&ctx, &request.source_chain, &request.dest_chain) {
            Ok(pair) => pair,
            Err(e) => return Ok(error_reply(StatusCode::BAD_REQUEST, e)),
        };

    // Decimals come from configured metadata; unknown tokens are refused
    // rather than guessed at.
    let Some(token_meta) = ctx.config.token(&source_cfg.name, &request.token_address) else {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            format!(
                "no token metadata configured for {} on {}",
                request.token_address, source_cfg.name
            ),
        ));
    };

    if let Err(e) = canonical::parse_u256(&request.amount) {
        return Ok(error_reply(StatusCode::BAD_REQUEST, format!("invalid amount: {}", e)));
    }

    let token_address = match Address::parse_token(
        &request.token_address,
        source_cfg.family,
        token_meta.standard,
    ) {
        Ok(addr) => addr,
        Err(e) => return Ok(error_reply(StatusCode::BAD_REQUEST, e.to_string())),
    };
    let sender_raw = request
        .sender
        .clone()
        .unwrap_or_else(|| default_sender(source_cfg.family).to_string());
    let sender = match Address::parse(&sender_raw, source_cfg.family) {
        Ok(addr) => addr,
        Err(e) => return Ok(error_reply(StatusCode::BAD_REQUEST, e.to_string())),
    };
    let recipient = match Address::parse(&request.recipient, dest_cfg.family) {
        Ok(addr) => addr,
        Err(e) => return Ok(error_reply(StatusCode::BAD_REQUEST, e.to_string())),
    };

    let payload = Payload::TokenTransfer(TokenTransferPayload {
        token_address,
        amount: request.amount.clone(),
        token_standard: token_meta.standard,
        decimals: token_meta.decimals,
    });

    create_and_enqueue(
        &ctx,
        MessageType::TokenTransfer,
        source_cfg,
        dest_cfg,
        sender,
        recipient,
        payload,
    )
    .await
}

pub async fn handle_bridge_nft(
    request: BridgeNftRequest,
    ctx: Arc<AppContext>,
) -> Result<impl Reply, Rejection> {
    if request.nft_contract.is_empty() || request.token_id.is_empty() || request.recipient.is_empty()
    {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "nft_contract, token_id, and recipient are required",
        ));
    }

    let (source_cfg, dest_cfg) =
        match resolve_chains(&ctx, &request.source_chain, &request.dest_chain) {
            Ok(pair) => pair,
            Err(e) => return Ok(error_reply(StatusCode::BAD_REQUEST, e)),
        };

    if let Err(e) = canonical::parse_u256(&request.token_id) {
        return Ok(error_reply(StatusCode::BAD_REQUEST, format!("invalid token_id: {}", e)));
    }

    // NFT metadata entries are optional; the family's NFT standard applies
    // when none is configured.
    let standard = ctx
        .config
        .token(&source_cfg.name, &request.nft_contract)
        .map(|t| t.standard)
        .unwrap_or_else(|| source_cfg.family.nft_standard());

    let nft_contract =
        match Address::parse_token(&request.nft_contract, source_cfg.family, standard) {
            Ok(addr) => addr,
            Err(e) => return Ok(error_reply(StatusCode::BAD_REQUEST, e.to_string())),
        };
    let sender_raw = request
        .sender
        .clone()
        .unwrap_or_else(|| default_sender(source_cfg.family).to_string());
    let sender = match Address::parse(&sender_raw, source_cfg.family) {
        Ok(addr) => addr,
        Err(e) => return Ok(error_reply(StatusCode::BAD_REQUEST, e.to_string())),
    };
    let recipient = match Address::parse(&request.recipient, dest_cfg.family) {
        Ok(addr) => addr,
        Err(e) => return Ok(error_reply(StatusCode::BAD_REQUEST, e.to_string())),
    };

    let payload = Payload::NftTransfer(NftTransferPayload {
        nft_contract,
        token_id: request.token_id.clone(),
        token_standard: standard,
    });

    create_and_enqueue(
        &ctx,
        MessageType::NftTransfer,
        source_cfg,
        dest_cfg,
        sender,
        recipient,
        payload,
    )
    .await
}
