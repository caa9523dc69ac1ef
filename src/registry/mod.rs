//! Validator Registry Module
//!
//! The environment-scoped allowlist of validator identities. Each entry
//! carries the signature scheme the validator signs with, so scheme
//! selection is always per-validator. The registry is read-mostly; reloads
//! swap the whole table atomically and never hold the lock across I/O.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::info;

use crate::types::{Environment, SignatureScheme};

/// One registered validator identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredValidator {
    /// Validator address in its native encoding
    pub address: String,
    /// Scheme this validator signs with
    pub scheme: SignatureScheme,
}

/// Environment-scoped validator allowlist.
pub struct ValidatorRegistry {
    environment: Environment,
    validators: RwLock<HashMap<String, RegisteredValidator>>,
}

impl ValidatorRegistry {
    /// Builds a registry for one environment from the configured entries.
    pub fn new(environment: Environment, entries: Vec<RegisteredValidator>) -> Self {
        let registry = Self {
            environment,
            validators: RwLock::new(HashMap::new()),
        };
        registry.reload(entries);
        registry
    }

    /// The environment this registry serves.
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Looks up a validator by address, case-insensitively.
    pub fn lookup(&self, address: &str) -> Option<RegisteredValidator> {
        let validators = self.validators.read().expect("registry lock poisoned");
        validators.get(&address.to_ascii_lowercase()).cloned()
    }

    /// Number of registered validators.
    pub fn len(&self) -> usize {
        self.validators.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces the whole table in one swap.
    pub fn reload(&self, entries: Vec<RegisteredValidator>) {
        let table: HashMap<String, RegisteredValidator> = entries
            .into_iter()
            .map(|entry| (entry.address.to_ascii_lowercase(), entry))
            .collect();
        let count = table.len();
        *self.validators.write().expect("registry lock poisoned") = table;
        info!(
            environment = ?self.environment,
            validators = count,
            "validator registry loaded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = ValidatorRegistry::new(
            Environment::Devnet,
            vec![RegisteredValidator {
                address: "0xAbCd000000000000000000000000000000000001".to_string(),
                scheme: SignatureScheme::Ecdsa,
            }],
        );
        assert!(registry
            .lookup("0xabcd000000000000000000000000000000000001")
            .is_some());
        assert!(registry.lookup("0xmissing").is_none());
    }

    #[test]
    fn reload_replaces_table() {
        let registry = ValidatorRegistry::new(Environment::Devnet, vec![]);
        assert!(registry.is_empty());
        registry.reload(vec![RegisteredValidator {
            address: "validator.near".to_string(),
            scheme: SignatureScheme::Ed25519,
        }]);
        assert_eq!(registry.len(), 1);
        registry.reload(vec![]);
        assert!(registry.lookup("validator.near").is_none());
    }
}
