//! HTTP API Layer
//!
//! Thin boundary over the trigger registry: inbound webhooks only.

// Webhook execution endpoint
pub mod webhooks;

pub use webhooks::create_webhook_routes;
