//! HTTP gateway for Pairgate.
//!
//! Exposes session creation, pairing-code polling and message sending over
//! axum. The [`SessionManager`](pairgate_session::SessionManager) is injected
//! into the router state; the gateway holds no sessions of its own.

/// Mapping from domain errors to HTTP responses.
pub mod error;
/// API-key authentication.
pub mod middleware;
/// Router and handlers.
pub mod server;

pub use error::ApiError;
pub use middleware::AuthConfig;
pub use server::GatewayServer;
