//! Address parsing tests across the three chain families.

use relayer_hub::types::{parse_address, ChainFamily};

mod helpers;

/// Valid addresses round-trip: parsing the formatted form yields an equal
/// address.
#[test]
fn test_address_round_trip() {
    let cases = [
        (helpers::SENDER_EVM, ChainFamily::Evm),
        ("0xABCDEF0123456789abcdef0123456789ABCDEF01", ChainFamily::Evm),
        (helpers::RECIPIENT_BASE58, ChainFamily::Ed25519Base58),
        ("alice.near", ChainFamily::Ed25519Named),
        ("sub_account-1.bridge.testnet", ChainFamily::Ed25519Named),
    ];
    for (raw, family) in cases {
        let parsed = parse_address(raw, family).unwrap();
        let reparsed = parse_address(&parsed.raw, family).unwrap();
        assert_eq!(parsed, reparsed, "round trip failed for {}", raw);
    }
}

#[test]
fn test_evm_address_rules() {
    // Missing prefix
    assert!(parse_address("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa01", ChainFamily::Evm).is_err());
    // Wrong length
    assert!(parse_address("0xaaaa", ChainFamily::Evm).is_err());
    assert!(parse_address(&format!("{}00", helpers::SENDER_EVM), ChainFamily::Evm).is_err());
    // Non-hex tail
    assert!(parse_address("0xzzaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa01", ChainFamily::Evm).is_err());
    // Mixed case is accepted
    assert!(parse_address("0xAbCdEf0123456789aBcDeF0123456789AbCdEf01", ChainFamily::Evm).is_ok());
}

#[test]
fn test_base58_address_rules() {
    // Confusable characters are outside the alphabet
    assert!(parse_address("0OIl0OIl0OIl0OIl0OIl0OIl0OIl0OIl", ChainFamily::Ed25519Base58).is_err());
    // Too short / too long
    assert!(parse_address("abc", ChainFamily::Ed25519Base58).is_err());
    assert!(parse_address(&"1".repeat(45), ChainFamily::Ed25519Base58).is_err());
    // Boundary lengths pass
    assert!(parse_address(&"1".repeat(32), ChainFamily::Ed25519Base58).is_ok());
    assert!(parse_address(&"z".repeat(44), ChainFamily::Ed25519Base58).is_ok());
}

#[test]
fn test_named_address_rules() {
    // Implicit accounts: exactly 64 lowercase hex
    assert!(parse_address(&"a".repeat(64), ChainFamily::Ed25519Named).is_ok());
    assert!(parse_address(&"A".repeat(64), ChainFamily::Ed25519Named).is_err());
    // Named accounts need a dot
    assert!(parse_address("alice", ChainFamily::Ed25519Named).is_err());
    assert!(parse_address("alice.near", ChainFamily::Ed25519Named).is_ok());
    // Uppercase and other characters are rejected
    assert!(parse_address("Alice.near", ChainFamily::Ed25519Named).is_err());
    assert!(parse_address("alice@near", ChainFamily::Ed25519Named).is_err());
    // Length bounds
    assert!(parse_address("a", ChainFamily::Ed25519Named).is_err());
    assert!(parse_address(&format!("{}.x", "a".repeat(63)), ChainFamily::Ed25519Named).is_err());
}

/// Every byte is classified: whitespace and empty input fail before any
/// family rule runs.
#[test]
fn test_whitespace_and_empty_rejected() {
    for family in [
        ChainFamily::Evm,
        ChainFamily::Ed25519Base58,
        ChainFamily::Ed25519Named,
    ] {
        assert!(parse_address("", family).is_err());
        assert!(parse_address(" alice.near", family).is_err());
        assert!(parse_address("alice .near", family).is_err());
    }
}

#[test]
fn test_equality_semantics() {
    let lower = parse_address(helpers::SENDER_EVM, ChainFamily::Evm).unwrap();
    let upper = parse_address(&helpers::SENDER_EVM.to_uppercase().replace("0X", "0x"), ChainFamily::Evm);
    assert_eq!(lower, upper.unwrap());
}
