//! REST API Module
//!
//! The HTTP ingress surface of the hub: bridge request intake, validator
//! signature deposit, message queries, chain health, and aggregate stats.
//! Handlers stay thin; everything of substance lives in the domain modules.

mod bridge;
mod generic;
mod messages;

pub use generic::{ApiServer, AppContext};
