//! Chat transport abstraction for Pairgate sessions.
//!
//! The wire protocol to the messaging network is not implemented here; it
//! is reached through the [`Transport`] trait, which exposes a connect
//! primitive, an ordered event stream and a send primitive.
//!
//! # Main types
//!
//! - [`Transport`]: One connection to the messaging network for one session.
//! - [`TransportEvent`]: Pairing code, ready, disconnected and inbound messages.
//! - [`TransportFactory`]: Builds a transport bound to a credential directory.
//! - [`BridgeTransport`]: Talks to a sidecar process over WebSocket and HTTP.
//! - [`ScriptedTransport`]: In-memory transport driven by tests.

/// Sidecar bridge transport.
pub mod bridge;
/// Scripted in-memory transport for tests and local runs.
pub mod mock;
/// Core transport trait and event types.
pub mod transport;

pub use bridge::{BridgeConfig, BridgeFactory, BridgeTransport};
pub use mock::{ScriptedFactory, ScriptedTransport};
pub use transport::{InboundMessage, Transport, TransportConnection, TransportEvent, TransportFactory};
