use crate::transport::{Transport, TransportConnection, TransportEvent, TransportFactory};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use pairgate_core::{ChatId, PairgateError, PairgateResult, SessionId};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connection settings for the sidecar bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Base HTTP URL of the sidecar, e.g. `http://127.0.0.1:8085`.
    #[serde(default = "default_bridge_url")]
    pub url: String,
    /// Capacity of each session's event buffer.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_bridge_url() -> String {
    "http://127.0.0.1:8085".to_string()
}

fn default_event_buffer() -> usize {
    64
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: default_bridge_url(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Transport backed by a sidecar process that runs the real chat client.
///
/// Events arrive as JSON text frames on
/// `ws://<bridge>/sessions/<id>/events?dataPath=<credential dir>`, decoded
/// directly into [`TransportEvent`]s. Messages are sent with
/// `POST <bridge>/sessions/<id>/messages`.
pub struct BridgeTransport {
    base_url: String,
    session_id: SessionId,
    data_path: PathBuf,
    client: reqwest::Client,
    event_tx: mpsc::Sender<TransportEvent>,
    shutdown: CancellationToken,
}

// ── Bridge API types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct BridgeErrorBody {
    error: String,
}

// ── Implementation ──────────────────────────────────────────────────────────

impl BridgeTransport {
    /// Create a transport and the receiving half of its event stream.
    pub fn new(
        base_url: impl Into<String>,
        session_id: SessionId,
        data_path: PathBuf,
        client: reqwest::Client,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::channel(event_buffer.max(1));
        let transport = Self {
            base_url: base_url.into(),
            session_id,
            data_path,
            client,
            event_tx,
            shutdown: CancellationToken::new(),
        };
        (transport, event_rx)
    }

    /// WebSocket URL of this session's event stream.
    pub fn events_url(&self) -> PairgateResult<Url> {
        let mut url = self.session_url("events")?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|()| PairgateError::Config(format!("Bridge URL '{}' cannot use {scheme}", self.base_url)))?;
        url.query_pairs_mut()
            .append_pair("dataPath", &self.data_path.to_string_lossy());
        Ok(url)
    }

    /// HTTP URL used to send messages on this session.
    pub fn messages_url(&self) -> PairgateResult<Url> {
        self.session_url("messages")
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn session_url(&self, tail: &str) -> PairgateResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| PairgateError::Config(format!("Invalid bridge URL '{}': {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| PairgateError::Config(format!("Bridge URL '{}' cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(["sessions", self.session_id.as_str(), tail]);
        Ok(url)
    }

    /// Forward an event; `false` when the receiving side is gone.
    async fn forward(&self, event: TransportEvent) -> bool {
        self.event_tx.send(event).await.is_ok()
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn connect(&self) -> PairgateResult<()> {
        let url = self.events_url()?;
        info!(session_id = %self.session_id, url = %url, "Bridge: connecting");

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| PairgateError::Transport(format!("Bridge connect error: {e}")))?;

        let (mut write, mut read) = ws_stream.split();
        info!(session_id = %self.session_id, "Bridge: connected");

        loop {
            let next = tokio::select! {
                () = self.shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    info!(session_id = %self.session_id, "Bridge: closed locally");
                    return Ok(());
                }
                next = read.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<TransportEvent>(&text) {
                    Ok(event) => {
                        debug!(session_id = %self.session_id, event = ?event, "Bridge event");
                        if !self.forward(event).await {
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        debug!(session_id = %self.session_id, error = %e, "Ignoring unknown bridge frame");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "bridge closed the connection".to_string());
                    info!(session_id = %self.session_id, reason = %reason, "Bridge: server closed connection");
                    self.forward(TransportEvent::Disconnected { reason }).await;
                    return Ok(());
                }
                Some(Ok(_)) => {} // Ignore ping/pong/binary
                Some(Err(e)) => {
                    error!(session_id = %self.session_id, error = %e, "Bridge read error");
                    self.forward(TransportEvent::Disconnected {
                        reason: e.to_string(),
                    })
                    .await;
                    return Err(PairgateError::Transport(format!("Bridge read error: {e}")));
                }
                None => {
                    self.forward(TransportEvent::Disconnected {
                        reason: "bridge stream ended".to_string(),
                    })
                    .await;
                    return Ok(());
                }
            }
        }
    }

    async fn send_message(&self, chat_id: &ChatId, text: &str) -> PairgateResult<()> {
        let url = self.messages_url()?;
        let payload = SendMessageRequest {
            chat_id: chat_id.as_str(),
            text,
        };

        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PairgateError::Transport(format!("Bridge send error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            let detail = serde_json::from_str::<BridgeErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            warn!(session_id = %self.session_id, status = %status, "Bridge send rejected");
            return Err(PairgateError::Transport(format!(
                "Bridge send failed ({status}): {detail}"
            )));
        }

        Ok(())
    }

    async fn disconnect(&self) -> PairgateResult<()> {
        self.shutdown.cancel();
        Ok(())
    }
}

/// Builds a [`BridgeTransport`] per session, sharing one HTTP client.
pub struct BridgeFactory {
    config: BridgeConfig,
    client: reqwest::Client,
}

impl BridgeFactory {
    /// Create a factory for the given bridge.
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

impl TransportFactory for BridgeFactory {
    fn create(&self, session_id: &SessionId, data_path: &Path) -> PairgateResult<TransportConnection> {
        let (transport, events) = BridgeTransport::new(
            self.config.url.clone(),
            session_id.clone(),
            data_path.to_path_buf(),
            self.client.clone(),
            self.config.event_buffer,
        );
        // Fail at creation rather than inside the background connect task.
        transport.events_url()?;
        Ok(TransportConnection {
            transport: Arc::new(transport),
            events,
        })
    }
}
