use async_trait::async_trait;
use pairgate_core::{ChatId, PairgateResult, SessionId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A text message received on a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Chat the message arrived on, in internal chat-id form.
    pub from: String,
    /// Message text.
    pub body: String,
}

/// Events emitted by a transport, in the order the network produced them.
///
/// The serialized form is the frame format spoken by the sidecar bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    /// A new pairing code was issued. Codes rotate until one is scanned.
    #[serde(rename = "qr")]
    PairingCode {
        /// Opaque code, usually rendered as a QR image.
        code: String,
    },
    /// The session is authenticated and can send messages.
    Ready {
        /// Account identifier (phone number) the session is logged in as.
        #[serde(default)]
        account: Option<String>,
    },
    /// The connection was lost or the account logged out.
    Disconnected {
        /// Human-readable reason.
        #[serde(default)]
        reason: String,
    },
    /// An inbound text message.
    #[serde(rename = "message")]
    MessageReceived(InboundMessage),
}

/// One connection to the messaging network, owned by exactly one session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Open the connection and pump events until it closes.
    ///
    /// Implementations may run for the lifetime of the connection. A
    /// returned error means the connection could not be kept up.
    async fn connect(&self) -> PairgateResult<()>;

    /// Send a text message and wait for the network to acknowledge it.
    async fn send_message(&self, chat_id: &ChatId, text: &str) -> PairgateResult<()>;

    /// Close the connection. Must be safe to call more than once.
    async fn disconnect(&self) -> PairgateResult<()>;
}

/// A freshly built transport plus the receiving half of its event stream.
pub struct TransportConnection {
    /// The transport itself.
    pub transport: Arc<dyn Transport>,
    /// Ordered events emitted by the transport.
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Builds transports for sessions.
pub trait TransportFactory: Send + Sync {
    /// Build an unconnected transport that persists credentials under `data_path`.
    fn create(&self, session_id: &SessionId, data_path: &Path) -> PairgateResult<TransportConnection>;
}
