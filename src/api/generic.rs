//! Shared API structures, filters, and the server itself.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info};
use warp::{http::StatusCode, Filter, Rejection, Reply};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::queue::MessageQueue;
use crate::storage::MessageStore;
use crate::types::Environment;

use super::{bridge, messages};

// ============================================================================
// SHARED STATE
// ============================================================================

/// Everything a request handler can reach.
pub struct AppContext {
    pub config: Arc<Config>,
    pub environment: Environment,
    pub store: Arc<dyn MessageStore>,
    pub queue: Arc<dyn MessageQueue>,
    pub dispatcher: Arc<Dispatcher>,
    // Monotonic per-(sender, source chain) submission counters
    nonces: Mutex<HashMap<(String, String), u64>>,
}

impl AppContext {
    pub fn new(
        config: Arc<Config>,
        environment: Environment,
        store: Arc<dyn MessageStore>,
        queue: Arc<dyn MessageQueue>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            config,
            environment,
            store,
            queue,
            dispatcher,
            nonces: Mutex::new(HashMap::new()),
        }
    }

    /// Next nonce for a (sender, source chain) pair. Nonces only
    /// disambiguate otherwise-identical submissions, so an in-process
    /// counter is sufficient.
    pub async fn next_nonce(&self, sender: &str, source_chain: &str) -> u64 {
        let mut nonces = self.nonces.lock().await;
        let counter = nonces
            .entry((sender.to_ascii_lowercase(), source_chain.to_string()))
            .or_insert(0);
        *counter += 1;
        *counter
    }
}

// ============================================================================
// REPLY HELPERS
// ============================================================================

pub(super) fn json_reply<T: Serialize>(
    status: StatusCode,
    body: &T,
) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(body), status)
}

pub(super) fn error_reply(
    status: StatusCode,
    message: impl Into<String>,
) -> warp::reply::WithStatus<warp::reply::Json> {
    #[derive(Serialize)]
    struct ErrorBody {
        error: String,
    }
    json_reply(
        status,
        &ErrorBody {
            error: message.into(),
        },
    )
}

pub(super) fn with_context(
    context: Arc<AppContext>,
) -> impl Filter<Extract = (Arc<AppContext>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || context.clone())
}

/// Global rejection handler converting warp rejections into the API's
/// error shape.
async fn handle_rejection(rej: Rejection) -> Result<impl Reply, std::convert::Infallible> {
    let (status, message) = if rej.is_not_found() {
        (StatusCode::NOT_FOUND, "endpoint not found".to_string())
    } else if let Some(err) = rej.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("invalid JSON: {}", err))
    } else if rej.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        error!("unhandled rejection: {:?}", rej);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
    };
    Ok(error_reply(status, message))
}

// ============================================================================
// API SERVER
// ============================================================================

/// The warp server exposing the hub's HTTP surface.
pub struct ApiServer {
    context: Arc<AppContext>,
}

impl ApiServer {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Binds and serves until shutdown.
    pub async fn run(&self) -> anyhow::Result<()> {
        let host: std::net::IpAddr = self
            .context
            .config
            .api
            .host
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid api host: {}", e))?;
        let port = self.context.config.api.port;
        info!(host = %host, port, "starting API server");

        warp::serve(self.create_routes()).run((host, port)).await;
        Ok(())
    }

    /// Composes every route with the rejection handler applied.
    pub(crate) fn create_routes(
        &self,
    ) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        let context = self.context.clone();

        let health = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::json(&serde_json::json!({"status": "ok"}))
            });

        let bridge_token = warp::path("v1")
            .and(warp::path("bridge"))
            .and(warp::path("token"))
            .and(warp::path::end())
            .and(warp::post())
            .and(warp::body::json())
            .and(with_context(context.clone()))
            .and_then(bridge::handle_bridge_token);

        let bridge_nft = warp::path("v1")
            .and(warp::path("bridge"))
            .and(warp::path("nft"))
            .and(warp::path::end())
            .and(warp::post())
            .and(warp::body::json())
            .and(with_context(context.clone()))
            .and_then(bridge::handle_bridge_nft);

        let list_messages = warp::path("v1")
            .and(warp::path("messages"))
            .and(warp::path::end())
            .and(warp::get())
            .and(warp::query::<HashMap<String, String>>())
            .and(with_context(context.clone()))
            .and_then(messages::handle_list_messages);

        let get_message = warp::path("v1")
            .and(warp::path("messages"))
            .and(warp::path::param())
            .and(warp::path::end())
            .and(warp::get())
            .and(with_context(context.clone()))
            .and_then(messages::handle_get_message);

        let message_status = warp::path("v1")
            .and(warp::path("messages"))
            .and(warp::path::param())
            .and(warp::path("status"))
            .and(warp::path::end())
            .and(warp::get())
            .and(with_context(context.clone()))
            .and_then(messages::handle_message_status);

        let deposit_signature = warp::path("v1")
            .and(warp::path("messages"))
            .and(warp::path::param())
            .and(warp::path("signatures"))
            .and(warp::path::end())
            .and(warp::post())
            .and(warp::body::json())
            .and(with_context(context.clone()))
            .and_then(messages::handle_deposit_signature);

        let list_chains = warp::path("v1")
            .and(warp::path("chains"))
            .and(warp::path::end())
            .and(warp::get())
            .and(with_context(context.clone()))
            .and_then(messages::handle_list_chains);

        let chain_status = warp::path("v1")
            .and(warp::path("chains"))
            .and(warp::path::param())
            .and(warp::path("status"))
            .and(warp::path::end())
            .and(warp::get())
            .and(with_context(context.clone()))
            .and_then(messages::handle_chain_status);

        let stats = warp::path("v1")
            .and(warp::path("stats"))
            .and(warp::path::end())
            .and(warp::get())
            .and(with_context(context.clone()))
            .and_then(messages::handle_stats);

        health
            .or(bridge_token)
            .or(bridge_nft)
            .or(list_messages)
            .or(message_status)
            .or(deposit_signature)
            .or(get_message)
            .or(list_chains)
            .or(chain_status)
            .or(stats)
            .recover(handle_rejection)
    }

    /// Exposes the composed routes for integration tests.
    pub fn test_routes(
        &self,
    ) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        self.create_routes()
    }
}
