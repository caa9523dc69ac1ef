//! Dispatch Module
//!
//! Stateless selection of the chain adapter for a message's destination.
//! The adapter is chosen by destination chain name; the build function is
//! fixed by the adapter's family and the message type. Unsupported
//! combinations fail before any chain I/O happens.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::chains::ChainAdapter;
use crate::types::{ChainFamily, Message, MessageType};

/// Dispatch failure, always terminal for the message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no adapter configured for chain {0}")]
    UnknownChain(String),
    #[error("unsupported operation: {message_type:?} to {family:?} chain {chain}")]
    UnsupportedOperation {
        chain: String,
        family: ChainFamily,
        message_type: MessageType,
    },
    #[error("chain id mismatch for {chain}: message says {message_chain_id}, adapter serves {adapter_chain_id}")]
    ChainIdMismatch {
        chain: String,
        message_chain_id: String,
        adapter_chain_id: String,
    },
}

/// Adapter table keyed by chain name.
pub struct Dispatcher {
    adapters: HashMap<String, Arc<dyn ChainAdapter>>,
}

impl Dispatcher {
    pub fn new(adapters: Vec<Arc<dyn ChainAdapter>>) -> Self {
        Self {
            adapters: adapters
                .into_iter()
                .map(|a| (a.descriptor().name.clone(), a))
                .collect(),
        }
    }

    /// All registered adapters, for the health/status surface.
    pub fn adapters(&self) -> impl Iterator<Item = &Arc<dyn ChainAdapter>> {
        self.adapters.values()
    }

    /// Looks up the adapter serving a chain by name.
    pub fn adapter(&self, chain_name: &str) -> Result<Arc<dyn ChainAdapter>, DispatchError> {
        self.adapters
            .get(chain_name)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownChain(chain_name.to_string()))
    }

    /// Selects and vets the adapter for a message's destination.
    ///
    /// The destination family must match the adapter and the opaque chain
    /// id must match exactly. Every (family, message type) pair in the
    /// closed universe has a release builder, so no capability table is
    /// consulted here; a family mismatch is the only unsupported shape.
    pub fn adapter_for(&self, message: &Message) -> Result<Arc<dyn ChainAdapter>, DispatchError> {
        let adapter = self.adapter(&message.destination.name)?;
        let descriptor = adapter.descriptor();

        if descriptor.family != message.destination.family {
            return Err(DispatchError::UnsupportedOperation {
                chain: message.destination.name.clone(),
                family: message.destination.family,
                message_type: message.message_type,
            });
        }
        if descriptor.chain_id != message.destination.chain_id {
            return Err(DispatchError::ChainIdMismatch {
                chain: message.destination.name.clone(),
                message_chain_id: message.destination.chain_id.clone(),
                adapter_chain_id: descriptor.chain_id.clone(),
            });
        }
        Ok(adapter)
    }
}
