//! Signature Verification Module
//!
//! This module verifies validator attestations over the canonical message
//! hash. Two back-ends are supported: ECDSA over secp256k1 with
//! Keccak-derived addresses (recover-and-compare), and Ed25519 where the
//! validator address is the public-key encoding itself. The scheme used for
//! a given signature comes from the validator's registry entry, never from
//! a chain family.

use ed25519_dalek::{Signature as Ed25519Signature, VerifyingKey as Ed25519VerifyingKey};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey as EcdsaVerifyingKey};
use thiserror::Error;

use crate::canonical::keccak256;
use crate::types::SignatureScheme;

// ============================================================================
// ERRORS
// ============================================================================

/// Classification of a signature verification failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureErrorKind {
    /// Input could not be decoded from its textual encoding
    Decode,
    /// Decoded input has the wrong byte length
    Length,
    /// Public-key recovery failed
    Recover,
    /// Signature or signer does not match the expected identity
    Mismatch,
    /// Signature is valid but not in canonical (low-s) form
    NonCanonical,
}

/// Error returned by the verifier back-ends.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("signature verification failed ({kind:?}): {detail}")]
pub struct SignatureError {
    pub kind: SignatureErrorKind,
    pub detail: String,
}

impl SignatureError {
    fn new(kind: SignatureErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

// ============================================================================
// ECDSA (secp256k1, Keccak addresses)
// ============================================================================

/// Derives the 20-byte hex address from a secp256k1 verifying key.
///
/// The address is the low 20 bytes of Keccak-256 over the uncompressed
/// public key without its 0x04 prefix, formatted with a 0x prefix.
pub fn ethereum_address(key: &EcdsaVerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&digest[12..32]))
}

/// Verifies a 65-byte recoverable ECDSA signature against an expected
/// address.
///
/// The signature layout is `r || s || v`; a `v` of 27/28 is normalized to
/// 0/1 before recovery. High-s signatures are rejected as non-canonical.
/// Address comparison is case-insensitive on the hex tail.
pub fn verify_ecdsa(
    hash: &[u8; 32],
    signature_hex: &str,
    expected_address: &str,
) -> Result<(), SignatureError> {
    let stripped = signature_hex.strip_prefix("0x").unwrap_or(signature_hex);
    let sig_bytes = hex::decode(stripped)
        .map_err(|e| SignatureError::new(SignatureErrorKind::Decode, e.to_string()))?;

    if sig_bytes.len() != 65 {
        return Err(SignatureError::new(
            SignatureErrorKind::Length,
            format!("expected 65 bytes, got {}", sig_bytes.len()),
        ));
    }

    let mut v = sig_bytes[64];
    if v == 27 || v == 28 {
        v -= 27;
    }
    let recovery_id = RecoveryId::from_byte(v).ok_or_else(|| {
        SignatureError::new(
            SignatureErrorKind::Recover,
            format!("invalid recovery byte {}", sig_bytes[64]),
        )
    })?;

    let signature = EcdsaSignature::from_slice(&sig_bytes[..64])
        .map_err(|e| SignatureError::new(SignatureErrorKind::Decode, e.to_string()))?;

    // A signature whose s lies in the high half has a distinct-but-valid
    // mirror image; only the low-s form is accepted.
    if signature.normalize_s().is_some() {
        return Err(SignatureError::new(
            SignatureErrorKind::NonCanonical,
            "high-s signature",
        ));
    }

    let recovered = EcdsaVerifyingKey::recover_from_prehash(hash, &signature, recovery_id)
        .map_err(|e| SignatureError::new(SignatureErrorKind::Recover, e.to_string()))?;

    let recovered_address = ethereum_address(&recovered);
    if !recovered_address.eq_ignore_ascii_case(expected_address) {
        return Err(SignatureError::new(
            SignatureErrorKind::Mismatch,
            format!("recovered {}, expected {}", recovered_address, expected_address),
        ));
    }

    Ok(())
}

// ============================================================================
// ED25519
// ============================================================================

/// Decodes a value that may arrive Base58- or hex-encoded.
///
/// Base58 is tried first; hex (with or without a 0x prefix) is the
/// fallback. A candidate only wins if it decodes to `expected_len` bytes,
/// since short hex strings are frequently also valid Base58.
fn decode_flexible(value: &str, expected_len: usize) -> Result<Vec<u8>, SignatureError> {
    let mut decoded_any = false;

    if let Ok(bytes) = bs58::decode(value).into_vec() {
        if bytes.len() == expected_len {
            return Ok(bytes);
        }
        decoded_any = true;
    }

    let stripped = value.strip_prefix("0x").unwrap_or(value);
    if let Ok(bytes) = hex::decode(stripped) {
        if bytes.len() == expected_len {
            return Ok(bytes);
        }
        decoded_any = true;
    }

    if decoded_any {
        Err(SignatureError::new(
            SignatureErrorKind::Length,
            format!("expected {} bytes", expected_len),
        ))
    } else {
        Err(SignatureError::new(
            SignatureErrorKind::Decode,
            "not valid base58 or hex",
        ))
    }
}

/// Verifies an Ed25519 signature.
///
/// Both the signature (64 bytes) and public key (32 bytes) may arrive
/// Base58- or hex-encoded. For Ed25519 families the validator address *is*
/// the public-key encoding, so `expected_address` must decode to the same
/// 32 bytes as `public_key`.
pub fn verify_ed25519(
    hash: &[u8; 32],
    signature: &str,
    public_key: &str,
    expected_address: &str,
) -> Result<(), SignatureError> {
    let sig_bytes = decode_flexible(signature, 64)?;
    let key_bytes = decode_flexible(public_key, 32)?;
    let addr_bytes = decode_flexible(expected_address, 32)?;

    if addr_bytes != key_bytes {
        return Err(SignatureError::new(
            SignatureErrorKind::Mismatch,
            "public key does not match validator address",
        ));
    }

    let sig_array: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| SignatureError::new(SignatureErrorKind::Length, "expected 64 bytes"))?;
    let key_array: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| SignatureError::new(SignatureErrorKind::Length, "expected 32 bytes"))?;

    let verifying_key = Ed25519VerifyingKey::from_bytes(&key_array)
        .map_err(|e| SignatureError::new(SignatureErrorKind::Decode, e.to_string()))?;
    let signature = Ed25519Signature::from_bytes(&sig_array);

    verifying_key
        .verify_strict(hash, &signature)
        .map_err(|_| SignatureError::new(SignatureErrorKind::Mismatch, "signature does not verify"))
}

// ============================================================================
// SCHEME DISPATCH
// ============================================================================

/// Verifies one attestation under the scheme its registry entry names.
pub fn verify_signature(
    scheme: SignatureScheme,
    hash: &[u8; 32],
    signature: &str,
    public_key: Option<&str>,
    expected_address: &str,
) -> Result<(), SignatureError> {
    match scheme {
        SignatureScheme::Ecdsa => verify_ecdsa(hash, signature, expected_address),
        SignatureScheme::Ed25519 => {
            let key = public_key.ok_or_else(|| {
                SignatureError::new(SignatureErrorKind::Decode, "missing Ed25519 public key")
            })?;
            verify_ed25519(hash, signature, key, expected_address)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_flexible_accepts_both_encodings() {
        let bytes = [7u8; 32];
        let b58 = bs58::encode(bytes).into_string();
        let hexed = hex::encode(bytes);
        assert_eq!(decode_flexible(&b58, 32).unwrap(), bytes.to_vec());
        assert_eq!(decode_flexible(&hexed, 32).unwrap(), bytes.to_vec());
        assert_eq!(
            decode_flexible(&format!("0x{}", hexed), 32).unwrap(),
            bytes.to_vec()
        );
    }

    #[test]
    fn decode_flexible_rejects_wrong_length() {
        let err = decode_flexible(&hex::encode([1u8; 16]), 32).unwrap_err();
        assert_eq!(err.kind, SignatureErrorKind::Length);
    }

    #[test]
    fn ecdsa_rejects_wrong_length() {
        let err = verify_ecdsa(&[0u8; 32], "0xdeadbeef", "0x0000000000000000000000000000000000000000")
            .unwrap_err();
        assert_eq!(err.kind, SignatureErrorKind::Length);
    }
}
