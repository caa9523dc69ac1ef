//! Configuration Management Module
//!
//! Loads and validates the relayer configuration: the chain table, the
//! environment-scoped validator registry, the token-metadata table, and
//! processor/API tuning. Configuration comes from a TOML file whose path
//! can be overridden with `RELAYER_CONFIG_PATH`; the active environment
//! comes from `RELAYER_ENV`.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::processor::ProcessorConfig;
use crate::quorum::QuorumConfig;
use crate::registry::RegisteredValidator;
use crate::types::{Address, ChainDescriptor, ChainFamily, Environment, SignatureScheme, TokenStandard};

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// API server settings
    pub api: ApiConfig,
    /// Processing pipeline tuning
    #[serde(default)]
    pub processor: ProcessorSettings,
    /// Signature threshold overrides per environment
    #[serde(default)]
    pub security: SecurityConfig,
    /// Configured chains
    pub chains: Vec<ChainConfig>,
    /// Validator registry entries across environments
    #[serde(default)]
    pub validators: Vec<ValidatorConfig>,
    /// Token metadata table
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

/// API server bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host address to bind the API server to
    pub host: String,
    /// Port number to bind the API server to
    pub port: u16,
}

/// Processing pipeline tuning, all defaulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorSettings {
    /// Worker tasks draining the queue
    pub workers: usize,
    /// Concurrent broadcasts allowed per destination chain
    pub per_destination_concurrency: usize,
    /// Rebroadcast attempts after reorgs
    pub max_rebroadcast_attempts: u32,
    /// Seconds a short signature set stays pending before failing
    pub grace_window_secs: i64,
    /// Upper bound on a message's signature set
    pub max_signatures: usize,
    /// Maximum message age accepted by quorum, in seconds
    pub max_age_secs: i64,
    /// Maximum tolerated clock skew, in seconds
    pub max_skew_secs: i64,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            per_destination_concurrency: 4,
            max_rebroadcast_attempts: 3,
            grace_window_secs: 600,
            max_signatures: 64,
            max_age_secs: 3600,
            max_skew_secs: 300,
        }
    }
}

/// Per-environment signature thresholds. Absent entries fall back to the
/// built-in defaults (7-of-n mainnet, 3 testnet, 1 devnet).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub required_signatures_mainnet: Option<u16>,
    pub required_signatures_testnet: Option<u16>,
    pub required_signatures_devnet: Option<u16>,
}

/// One configured chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Unique printable chain name
    pub name: String,
    /// Chain family
    pub family: ChainFamily,
    /// Opaque chain identifier
    pub chain_id: String,
    /// Network identifier within the family
    pub network_id: String,
    /// Deployment environment
    pub environment: Environment,
    /// Confirmations before a destination tx counts as final
    pub confirmation_blocks: u32,
    /// Bridge contract address in the family's syntax
    pub bridge_contract: String,
    /// RPC endpoint URL
    pub rpc_url: String,
    /// Nominal block interval in seconds
    pub block_time_secs: u64,
}

impl ChainConfig {
    /// Builds the typed descriptor, validating the bridge address.
    pub fn descriptor(&self) -> anyhow::Result<ChainDescriptor> {
        let bridge_contract = Address::parse(&self.bridge_contract, self.family)
            .with_context(|| format!("chain {}: invalid bridge contract", self.name))?;
        Ok(ChainDescriptor {
            name: self.name.clone(),
            family: self.family,
            chain_id: self.chain_id.clone(),
            network_id: self.network_id.clone(),
            environment: self.environment,
            confirmation_blocks: self.confirmation_blocks,
            bridge_contract,
        })
    }

    pub fn block_time(&self) -> Duration {
        Duration::from_secs(self.block_time_secs)
    }
}

/// One validator registry entry, scoped to an environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Validator address in its native encoding
    pub address: String,
    /// Scheme this validator signs with
    pub scheme: SignatureScheme,
    /// Environment the validator serves
    pub environment: Environment,
}

/// One token metadata entry. The ingress refuses transfers of tokens it has
/// no metadata for rather than guessing decimals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Chain the token lives on
    pub chain: String,
    /// Token contract address
    pub address: String,
    /// Token standard
    pub standard: TokenStandard,
    /// Token decimals
    pub decimals: u8,
}

// ============================================================================
// LOADING AND DERIVED VIEWS
// ============================================================================

impl Config {
    /// Loads configuration from the TOML file, honoring
    /// `RELAYER_CONFIG_PATH` for tests and deployments.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("RELAYER_CONFIG_PATH")
            .unwrap_or_else(|_| "config/relayer.toml".to_string());

        let content = std::fs::read_to_string(&config_path).with_context(|| {
            format!(
                "configuration file '{}' not found; copy config/relayer.template.toml and edit it",
                config_path
            )
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content).context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.chains.is_empty() {
            anyhow::bail!("at least one chain must be configured");
        }
        let mut names: Vec<&str> = self.chains.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.chains.len() {
            anyhow::bail!("chain names must be unique");
        }
        for chain in &self.chains {
            chain.descriptor()?;
            if chain.block_time_secs == 0 {
                anyhow::bail!("chain {}: block_time_secs must be positive", chain.name);
            }
        }
        for token in &self.tokens {
            if !self.chains.iter().any(|c| c.name == token.chain) {
                anyhow::bail!("token {} references unknown chain {}", token.address, token.chain);
            }
        }
        Ok(())
    }

    /// The active environment, from `RELAYER_ENV` (devnet when unset).
    pub fn environment() -> anyhow::Result<Environment> {
        match std::env::var("RELAYER_ENV") {
            Ok(value) => Environment::from_env_str(&value)
                .ok_or_else(|| anyhow::anyhow!("invalid RELAYER_ENV value '{}'", value)),
            Err(_) => Ok(Environment::Devnet),
        }
    }

    /// Signature threshold for messages created in the given environment.
    pub fn required_signatures(&self, environment: Environment) -> u16 {
        let override_value = match environment {
            Environment::Mainnet => self.security.required_signatures_mainnet,
            Environment::Testnet => self.security.required_signatures_testnet,
            Environment::Devnet => self.security.required_signatures_devnet,
        };
        override_value
            .unwrap_or_else(|| environment.default_required_signatures())
            .max(1)
    }

    /// Registry entries scoped to the given environment.
    pub fn registry_entries(&self, environment: Environment) -> Vec<RegisteredValidator> {
        self.validators
            .iter()
            .filter(|v| v.environment == environment)
            .map(|v| RegisteredValidator {
                address: v.address.clone(),
                scheme: v.scheme,
            })
            .collect()
    }

    /// Chain config lookup by name.
    pub fn chain(&self, name: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.name == name)
    }

    /// Token metadata lookup by chain and address (case-insensitive).
    pub fn token(&self, chain: &str, address: &str) -> Option<&TokenConfig> {
        self.tokens
            .iter()
            .find(|t| t.chain == chain && t.address.eq_ignore_ascii_case(address))
    }

    /// Processor config assembled from the settings block.
    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            max_signatures: self.processor.max_signatures,
            per_destination_concurrency: self.processor.per_destination_concurrency,
            max_rebroadcast_attempts: self.processor.max_rebroadcast_attempts,
            grace_window_secs: self.processor.grace_window_secs,
            quorum: QuorumConfig {
                max_age_secs: self.processor.max_age_secs,
                max_skew_secs: self.processor.max_skew_secs,
                max_signatures: self.processor.max_signatures,
            },
            ..ProcessorConfig::default()
        }
    }
}
