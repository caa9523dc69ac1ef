//! Quorum Policy Module
//!
//! Decides whether a message's signature set authorizes release on the
//! destination chain. The policy counts distinct, registered, verifying
//! signatures against the threshold frozen into the message, and rejects
//! messages whose creation timestamp has drifted outside the freshness
//! window. Unknown validators and duplicates are skipped with a warning
//! rather than failing the whole set; they only matter if they push the
//! counted total below threshold.

use thiserror::Error;
use tracing::{debug, warn};

use crate::crypto;
use crate::registry::ValidatorRegistry;
use crate::types::{Message, ValidatorSignature};

/// Freshness and size bounds applied by the policy.
#[derive(Debug, Clone)]
pub struct QuorumConfig {
    /// Maximum message age in seconds (timestamp in the past)
    pub max_age_secs: i64,
    /// Maximum tolerated clock skew in seconds (timestamp in the future)
    pub max_skew_secs: i64,
    /// Upper bound on the signature set size
    pub max_signatures: usize,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 3600,
            max_skew_secs: 300,
            max_signatures: 64,
        }
    }
}

/// Why a signature set failed the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumReason {
    /// Fewer signatures than the threshold before any verification
    TooFewSignatures,
    /// Fewer distinct registered valid signatures than the threshold
    TooFewValid,
    /// Message timestamp older than the freshness window
    Expired,
    /// Message timestamp too far in the future
    ClockSkew,
}

/// Quorum rejection with the observed and required counts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("quorum not met ({reason:?}): got {got}, need {need}")]
pub struct QuorumError {
    pub got: usize,
    pub need: u16,
    pub reason: QuorumReason,
}

impl QuorumError {
    /// Whether the failure may resolve on its own (more signatures arriving)
    /// as opposed to a permanently stale message.
    pub fn retryable(&self) -> bool {
        matches!(
            self.reason,
            QuorumReason::TooFewSignatures | QuorumReason::TooFewValid
        )
    }
}

/// Result of a successful quorum check.
#[derive(Debug, Clone)]
pub struct QuorumOutcome {
    /// The deduplicated, registered, verified signatures that were counted.
    /// These are the attestations forwarded to the destination bridge call.
    pub counted: Vec<ValidatorSignature>,
}

/// Runs the quorum policy over a message and its canonical hash.
///
/// Check order: raw set size, freshness window, then per-signature
/// dedup (first occurrence wins), registry membership, and cryptographic
/// verification under the validator's registered scheme. The final count
/// of surviving signatures must meet the message's frozen threshold.
pub fn verify_quorum(
    message: &Message,
    canonical_hash: &[u8; 32],
    registry: &ValidatorRegistry,
    config: &QuorumConfig,
    now: i64,
) -> Result<QuorumOutcome, QuorumError> {
    let need = message.required_signatures;
    let raw = message.validator_signatures.len();

    if raw < need as usize {
        return Err(QuorumError {
            got: raw,
            need,
            reason: QuorumReason::TooFewSignatures,
        });
    }

    if message.timestamp < now.saturating_sub(config.max_age_secs) {
        return Err(QuorumError {
            got: raw,
            need,
            reason: QuorumReason::Expired,
        });
    }
    if message.timestamp > now.saturating_add(config.max_skew_secs) {
        return Err(QuorumError {
            got: raw,
            need,
            reason: QuorumReason::ClockSkew,
        });
    }

    let mut seen: Vec<String> = Vec::with_capacity(raw.min(config.max_signatures));
    let mut counted: Vec<ValidatorSignature> = Vec::with_capacity(need as usize);

    for sig in &message.validator_signatures {
        let key = sig.validator_address.to_ascii_lowercase();
        if seen.contains(&key) {
            warn!(
                message_id = %message.id,
                validator = %sig.validator_address,
                "duplicate signature from validator, skipping"
            );
            continue;
        }
        seen.push(key);

        let Some(entry) = registry.lookup(&sig.validator_address) else {
            warn!(
                message_id = %message.id,
                validator = %sig.validator_address,
                "signature from unregistered validator, skipping"
            );
            continue;
        };

        match crypto::verify_signature(
            entry.scheme,
            canonical_hash,
            &sig.signature,
            sig.public_key.as_deref(),
            &sig.validator_address,
        ) {
            Ok(()) => counted.push(sig.clone()),
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    validator = %sig.validator_address,
                    error = %e,
                    "invalid signature from validator, skipping"
                );
            }
        }
    }

    if counted.len() < need as usize {
        return Err(QuorumError {
            got: counted.len(),
            need,
            reason: QuorumReason::TooFewValid,
        });
    }

    debug!(
        message_id = %message.id,
        valid = counted.len(),
        required = need,
        "quorum satisfied"
    );

    Ok(QuorumOutcome { counted })
}
