//! Canonical Encoding Module
//!
//! This module produces the deterministic byte form of a message: the
//! Keccak-256 digest every validator signs, and the derived message id.
//! The encoding is the only wire format the hub guarantees bit-for-bit
//! stability for, so the rules here are deliberately rigid: every field is
//! length-prefixed (u32 big-endian byte length), integers are big-endian,
//! amounts are widened to fixed 32-byte unsigned values, and nested
//! addresses carry their family tag. Prefix-free framing keeps two distinct
//! messages from ever concatenating to the same byte string.

use primitive_types::U256;
use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::types::{Address, Message, MessageType, Payload};

/// Prefix of every derived message id.
pub const MESSAGE_ID_PREFIX: &str = "msg_";

/// Error raised while building the canonical form.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CanonicalError {
    #[error("invalid decimal amount: {0}")]
    Amount(#[from] AmountError),
}

/// Error raised when a decimal string is not a valid u256.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("empty string")]
    Empty,
    #[error("leading '+' is not allowed")]
    LeadingPlus,
    #[error("invalid digit '{0}'")]
    InvalidDigit(char),
    #[error("value does not fit in 256 bits")]
    Overflow,
}

/// Computes the Keccak-256 digest of arbitrary bytes.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Parses a nonnegative decimal string into a 256-bit unsigned integer.
///
/// Rejects empty strings, a leading `+`, any non-digit byte, and values
/// that overflow 256 bits. Leading zeros are accepted; the canonical form
/// uses the numeric value, so `"010"` and `"10"` encode identically.
pub fn parse_u256(value: &str) -> Result<U256, AmountError> {
    if value.is_empty() {
        return Err(AmountError::Empty);
    }
    if value.starts_with('+') {
        return Err(AmountError::LeadingPlus);
    }
    if let Some(c) = value.chars().find(|c| !c.is_ascii_digit()) {
        return Err(AmountError::InvalidDigit(c));
    }
    U256::from_dec_str(value).map_err(|_| AmountError::Overflow)
}

/// Widens a decimal string to the fixed 32-byte big-endian canonical form.
pub fn u256_be_bytes(value: &str) -> Result<[u8; 32], AmountError> {
    let parsed = parse_u256(value)?;
    let mut out = [0u8; 32];
    parsed.to_big_endian(&mut out);
    Ok(out)
}

// Each canonical field is len_u32_be || bytes.
fn push_framed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

// Nested addresses are family_tag_u8 || len_u32_be || raw_bytes.
fn push_address(buf: &mut Vec<u8>, addr: &Address) {
    buf.push(addr.family.family_tag());
    buf.extend_from_slice(&(addr.raw.len() as u32).to_be_bytes());
    buf.extend_from_slice(addr.raw.as_bytes());
}

/// Serializes a payload into its canonical byte form.
///
/// Field order is fixed: the contract address, the 32-byte widened amount
/// (or token id), the token-standard string, and for fungible transfers the
/// decimals byte.
pub fn canonical_payload_bytes(payload: &Payload) -> Result<Vec<u8>, CanonicalError> {
    let mut buf = Vec::with_capacity(128);
    match payload {
        Payload::TokenTransfer(p) => {
            push_address(&mut buf, &p.token_address);
            buf.extend_from_slice(&u256_be_bytes(&p.amount)?);
            push_framed(&mut buf, p.token_standard.as_str().as_bytes());
            buf.push(p.decimals);
        }
        Payload::NftTransfer(p) => {
            push_address(&mut buf, &p.nft_contract);
            buf.extend_from_slice(&u256_be_bytes(&p.token_id)?);
            push_framed(&mut buf, p.token_standard.as_str().as_bytes());
        }
    }
    Ok(buf)
}

/// Builds the full canonical byte string of a message.
///
/// Tuple order: id, type tag, source chain id, destination chain id, sender,
/// recipient, canonical payload, big-endian nonce, big-endian timestamp.
/// The already-derived id is embedded for redundancy; signatures and status
/// never enter the encoding.
pub fn canonical_message_bytes(msg: &Message) -> Result<Vec<u8>, CanonicalError> {
    let payload = canonical_payload_bytes(&msg.payload)?;
    let mut buf = Vec::with_capacity(256 + payload.len());
    push_framed(&mut buf, msg.id.as_bytes());
    push_framed(&mut buf, &[msg.message_type.type_tag()]);
    push_framed(&mut buf, msg.source.chain_id.as_bytes());
    push_framed(&mut buf, msg.destination.chain_id.as_bytes());
    push_framed(&mut buf, msg.sender.raw.as_bytes());
    push_framed(&mut buf, msg.recipient.raw.as_bytes());
    push_framed(&mut buf, &payload);
    push_framed(&mut buf, &msg.nonce.to_be_bytes());
    push_framed(&mut buf, &msg.timestamp.to_be_bytes());
    Ok(buf)
}

/// Computes the 32-byte canonical hash validators sign.
pub fn canonical_hash(msg: &Message) -> Result<[u8; 32], CanonicalError> {
    Ok(keccak256(&canonical_message_bytes(msg)?))
}

/// Derives the deterministic message id.
///
/// The id is a pure function of the transfer itself — type, chain ids,
/// endpoints, payload, and nonce. Timestamps and signatures are excluded so
/// identical submissions collapse to the same id.
pub fn derive_message_id(
    message_type: MessageType,
    source_chain_id: &str,
    destination_chain_id: &str,
    sender: &Address,
    recipient: &Address,
    payload: &Payload,
    nonce: u64,
) -> Result<String, CanonicalError> {
    let payload_bytes = canonical_payload_bytes(payload)?;
    let mut buf = Vec::with_capacity(128 + payload_bytes.len());
    push_framed(&mut buf, &[message_type.type_tag()]);
    push_framed(&mut buf, source_chain_id.as_bytes());
    push_framed(&mut buf, destination_chain_id.as_bytes());
    push_framed(&mut buf, sender.raw.as_bytes());
    push_framed(&mut buf, recipient.raw.as_bytes());
    push_framed(&mut buf, &payload_bytes);
    push_framed(&mut buf, &nonce.to_be_bytes());

    let digest = keccak256(&buf);
    Ok(format!("{}{}", MESSAGE_ID_PREFIX, hex::encode(&digest[..16])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_u256_rejects_bad_inputs() {
        assert_eq!(parse_u256(""), Err(AmountError::Empty));
        assert_eq!(parse_u256("+1"), Err(AmountError::LeadingPlus));
        assert_eq!(parse_u256("-1"), Err(AmountError::InvalidDigit('-')));
        assert_eq!(parse_u256("12a"), Err(AmountError::InvalidDigit('a')));
        // 2^256 is one past the maximum representable value
        assert_eq!(
            parse_u256(
                "115792089237316195423570985008687907853269984665640564039457584007913129639936"
            ),
            Err(AmountError::Overflow)
        );
    }

    #[test]
    fn parse_u256_accepts_max() {
        let max =
            "115792089237316195423570985008687907853269984665640564039457584007913129639935";
        assert_eq!(parse_u256(max).unwrap(), U256::MAX);
    }

    #[test]
    fn amount_widening_is_big_endian() {
        let bytes = u256_be_bytes("256").unwrap();
        assert_eq!(bytes[30], 1);
        assert_eq!(bytes[31], 0);
        assert!(bytes[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn leading_zeros_collapse_in_canonical_form() {
        assert_eq!(u256_be_bytes("010").unwrap(), u256_be_bytes("10").unwrap());
    }
}
