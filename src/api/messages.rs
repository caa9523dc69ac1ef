//! Message queries, signature deposit, chain health, and stats handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;
use warp::{http::StatusCode, Rejection, Reply};

use super::generic::{error_reply, json_reply, AppContext};
use crate::storage::StoreError;
use crate::types::{MessageStatus, SignatureScheme, ValidatorSignature};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 100;

// Health probes give a slow node ten seconds before calling it unhealthy.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// MESSAGE QUERIES
// ============================================================================

pub async fn handle_get_message(
    message_id: String,
    ctx: Arc<AppContext>,
) -> Result<impl Reply, Rejection> {
    match ctx.store.get(&message_id).await {
        Ok(message) => {
            let signatures = message.validator_signatures.clone();
            Ok(json_reply(
                StatusCode::OK,
                &serde_json::json!({
                    "message": message,
                    "signatures": signatures,
                }),
            ))
        }
        Err(StoreError::NotFound(_)) => Ok(error_reply(StatusCode::NOT_FOUND, "message not found")),
        Err(e) => {
            warn!(message_id = %message_id, error = %e, "failed to load message");
            Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, "failed to retrieve message"))
        }
    }
}

pub async fn handle_message_status(
    message_id: String,
    ctx: Arc<AppContext>,
) -> Result<impl Reply, Rejection> {
    match ctx.store.get_status(&message_id).await {
        Ok(status) => Ok(json_reply(
            StatusCode::OK,
            &serde_json::json!({"status": status}),
        )),
        Err(StoreError::NotFound(_)) => Ok(error_reply(StatusCode::NOT_FOUND, "message not found")),
        Err(e) => {
            warn!(message_id = %message_id, error = %e, "failed to load message status");
            Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, "failed to retrieve status"))
        }
    }
}

pub async fn handle_list_messages(
    query: HashMap<String, String>,
    ctx: Arc<AppContext>,
) -> Result<impl Reply, Rejection> {
    let limit = query
        .get("limit")
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0 && *v <= MAX_LIST_LIMIT)
        .unwrap_or(DEFAULT_LIST_LIMIT);
    let offset = query
        .get("offset")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    let result = match query.get("status") {
        Some(raw) => {
            let Some(status) = MessageStatus::parse(raw) else {
                return Ok(error_reply(
                    StatusCode::BAD_REQUEST,
                    format!("unknown status: {}", raw),
                ));
            };
            ctx.store.list_by_status(status, limit, offset).await
        }
        None => ctx.store.list_all(limit, offset).await,
    };

    match result {
        Ok(messages) => {
            let count = messages.len();
            Ok(json_reply(
                StatusCode::OK,
                &serde_json::json!({
                    "messages": messages,
                    "count": count,
                    "limit": limit,
                    "offset": offset,
                }),
            ))
        }
        Err(e) => {
            warn!(error = %e, "failed to list messages");
            Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, "failed to list messages"))
        }
    }
}

// ============================================================================
// SIGNATURE DEPOSIT
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DepositSignatureRequest {
    pub validator_address: String,
    pub scheme: SignatureScheme,
    pub signature: String,
    #[serde(default)]
    pub public_key: Option<String>,
}

/// Accepts one validator attestation for a message and re-queues the
/// message so the quorum check runs again.
pub async fn handle_deposit_signature(
    message_id: String,
    request: DepositSignatureRequest,
    ctx: Arc<AppContext>,
) -> Result<impl Reply, Rejection> {
    if request.validator_address.is_empty() || request.signature.is_empty() {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "validator_address and signature are required",
        ));
    }

    let message = match ctx.store.get(&message_id).await {
        Ok(message) => message,
        Err(StoreError::NotFound(_)) => {
            return Ok(error_reply(StatusCode::NOT_FOUND, "message not found"))
        }
        Err(e) => {
            warn!(message_id = %message_id, error = %e, "failed to load message");
            return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, "failed to load message"));
        }
    };

    if message.status.is_terminal() {
        return Ok(error_reply(StatusCode::CONFLICT, "message already settled"));
    }
    if message.validator_signatures.len() >= ctx.config.processor.max_signatures {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "signature set is full"));
    }

    let signature = ValidatorSignature {
        validator_address: request.validator_address,
        scheme: request.scheme,
        signature: request.signature,
        public_key: request.public_key,
    };

    let count = match ctx.store.append_signature(&message_id, signature).await {
        Ok(count) => count,
        Err(e) => {
            warn!(message_id = %message_id, error = %e, "failed to append signature");
            return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, "failed to append signature"));
        }
    };

    if matches!(message.status, MessageStatus::Created | MessageStatus::Pending) {
        if let Err(e) = ctx.queue.publish(&message_id).await {
            warn!(message_id = %message_id, error = %e, "failed to re-enqueue message");
        }
    }

    Ok(json_reply(
        StatusCode::ACCEPTED,
        &serde_json::json!({
            "message_id": message_id,
            "signatures": count,
        }),
    ))
}

// ============================================================================
// CHAINS AND STATS
// ============================================================================

pub async fn handle_list_chains(ctx: Arc<AppContext>) -> Result<impl Reply, Rejection> {
    let mut chains = Vec::new();
    for adapter in ctx.dispatcher.adapters() {
        let descriptor = adapter.descriptor();
        let healthy = tokio::time::timeout(HEALTH_PROBE_TIMEOUT, adapter.latest_block())
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);
        chains.push(serde_json::json!({
            "name": descriptor.name,
            "family": descriptor.family,
            "chain_id": descriptor.chain_id,
            "network_id": descriptor.network_id,
            "environment": descriptor.environment,
            "healthy": healthy,
        }));
    }

    Ok(json_reply(
        StatusCode::OK,
        &serde_json::json!({
            "chains": chains,
            "total": chains.len(),
        }),
    ))
}

pub async fn handle_chain_status(
    chain_name: String,
    ctx: Arc<AppContext>,
) -> Result<impl Reply, Rejection> {
    let Ok(adapter) = ctx.dispatcher.adapter(&chain_name) else {
        return Ok(error_reply(StatusCode::NOT_FOUND, "chain not found"));
    };
    let descriptor = adapter.descriptor();

    let block_number = tokio::time::timeout(HEALTH_PROBE_TIMEOUT, adapter.latest_block())
        .await
        .ok()
        .and_then(|r| r.ok());

    Ok(json_reply(
        StatusCode::OK,
        &serde_json::json!({
            "name": descriptor.name,
            "family": descriptor.family,
            "chain_id": descriptor.chain_id,
            "network_id": descriptor.network_id,
            "environment": descriptor.environment,
            "healthy": block_number.is_some(),
            "block_number": block_number,
            "block_time_secs": adapter.block_time().as_secs(),
            "confirmations": descriptor.confirmation_blocks,
        }),
    ))
}

pub async fn handle_stats(ctx: Arc<AppContext>) -> Result<impl Reply, Rejection> {
    let mut counts = HashMap::new();
    for status in [
        MessageStatus::Created,
        MessageStatus::Pending,
        MessageStatus::Signed,
        MessageStatus::Broadcasting,
        MessageStatus::Completed,
        MessageStatus::Failed,
    ] {
        let count = ctx.store.count_by_status(status).await.unwrap_or(0);
        counts.insert(status.to_string(), count);
    }
    let total: usize = counts.values().sum();
    let in_flight = total
        - counts.get("completed").copied().unwrap_or(0)
        - counts.get("failed").copied().unwrap_or(0);

    Ok(json_reply(
        StatusCode::OK,
        &serde_json::json!({
            "total_messages": total,
            "pending_messages": in_flight,
            "completed_messages": counts.get("completed").copied().unwrap_or(0),
            "failed_messages": counts.get("failed").copied().unwrap_or(0),
            "by_status": counts,
            "supported_chains": ctx.dispatcher.adapters().count(),
        }),
    ))
}
