//! Relayer Hub Service
//!
//! Entry point wiring the hub together: configuration, the message store,
//! one adapter per configured chain in the active environment, the
//! validator registry, the worker pool, and the API server.
//!
//! Exit codes: 0 clean shutdown, 2 configuration error, 3 store
//! unreachable at startup, 4 no healthy chains.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use relayer_hub::api::{ApiServer, AppContext};
use relayer_hub::chains::{ChainAdapter, EvmAdapter, NamedAdapter, SvmAdapter};
use relayer_hub::config::Config;
use relayer_hub::dispatcher::Dispatcher;
use relayer_hub::processor::Processor;
use relayer_hub::queue::{spawn_workers, InMemoryQueue};
use relayer_hub::registry::ValidatorRegistry;
use relayer_hub::storage::{InMemoryStore, MessageStore};
use relayer_hub::types::ChainFamily;

const EXIT_CONFIG_ERROR: i32 = 2;
const EXIT_STORE_UNREACHABLE: i32 = 3;
const EXIT_NO_HEALTHY_CHAINS: i32 = 4;

const STARTUP_HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    info!("starting relayer hub");

    let environment = match Config::environment() {
        Ok(environment) => environment,
        Err(e) => {
            error!(error = %e, "invalid environment");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };
    info!(environment = ?environment, "configuration loaded");

    let store: Arc<dyn MessageStore> = Arc::new(InMemoryStore::new());
    if let Err(e) = store.ping().await {
        error!(error = %e, "store unreachable");
        std::process::exit(EXIT_STORE_UNREACHABLE);
    }

    let mut adapters: Vec<Arc<dyn ChainAdapter>> = Vec::new();
    for chain in config.chains.iter().filter(|c| c.environment == environment) {
        let descriptor = match chain.descriptor() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                error!(chain = %chain.name, error = %e, "invalid chain configuration");
                std::process::exit(EXIT_CONFIG_ERROR);
            }
        };
        let adapter: Result<Arc<dyn ChainAdapter>, _> = match chain.family {
            ChainFamily::Evm => EvmAdapter::new(descriptor, &chain.rpc_url, chain.block_time())
                .map(|a| Arc::new(a) as Arc<dyn ChainAdapter>),
            ChainFamily::Ed25519Base58 => {
                SvmAdapter::new(descriptor, &chain.rpc_url, chain.block_time())
                    .map(|a| Arc::new(a) as Arc<dyn ChainAdapter>)
            }
            ChainFamily::Ed25519Named => {
                NamedAdapter::new(descriptor, &chain.rpc_url, chain.block_time())
                    .map(|a| Arc::new(a) as Arc<dyn ChainAdapter>)
            }
        };
        match adapter {
            Ok(adapter) => adapters.push(adapter),
            Err(e) => {
                error!(chain = %chain.name, error = %e, "failed to initialize chain adapter");
                std::process::exit(EXIT_CONFIG_ERROR);
            }
        }
    }

    let mut healthy = 0usize;
    for adapter in &adapters {
        let name = adapter.descriptor().name.clone();
        match tokio::time::timeout(STARTUP_HEALTH_TIMEOUT, adapter.latest_block()).await {
            Ok(Ok(height)) => {
                info!(chain = %name, height, "chain healthy");
                healthy += 1;
            }
            Ok(Err(e)) => warn!(chain = %name, error = %e, "chain unhealthy"),
            Err(_) => warn!(chain = %name, "chain health probe timed out"),
        }
    }
    if healthy == 0 {
        error!("no healthy chains configured for this environment");
        std::process::exit(EXIT_NO_HEALTHY_CHAINS);
    }

    let registry = Arc::new(ValidatorRegistry::new(
        environment,
        config.registry_entries(environment),
    ));
    if registry.is_empty() {
        warn!("validator registry is empty; no message will reach quorum");
    }

    let dispatcher = Arc::new(Dispatcher::new(adapters));
    let processor = Arc::new(Processor::new(
        store.clone(),
        dispatcher.clone(),
        registry,
        config.processor_config(),
    ));

    let (queue, receiver) = InMemoryQueue::new();
    let workers = spawn_workers(processor, receiver, config.processor.workers);
    info!(workers = workers.len(), "worker pool started");

    let config = Arc::new(config);
    let context = Arc::new(AppContext::new(
        config.clone(),
        environment,
        store,
        Arc::new(queue),
        dispatcher,
    ));

    let server = ApiServer::new(context);
    if let Err(e) = server.run().await {
        error!(error = %e, "API server failed");
        std::process::exit(1);
    }

    info!("relayer hub shut down cleanly");
}
