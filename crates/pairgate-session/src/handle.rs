use chrono::{DateTime, Utc};
use pairgate_channels::{Transport, TransportEvent};
use pairgate_core::{ChatId, PairgateError, PairgateResult, SessionId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection status of a session.
///
/// `Initializing → {AwaitingPairing → Ready} | Ready → Disconnected`.
/// `Disconnected` is terminal for a handle; [`reconnect`] builds a new one.
///
/// [`reconnect`]: crate::SessionManager::reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Created, no lifecycle event seen yet.
    Initializing,
    /// A pairing code is outstanding.
    AwaitingPairing,
    /// Logged in and able to send.
    Ready,
    /// Gone for good; only a reconnect brings the session back.
    Disconnected,
}

impl ConnectionStatus {
    /// Wire name, as used in JSON bodies.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Result of waiting for a session to authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// A pairing code the user must scan.
    PairingCode(String),
    /// The session is logged in.
    Ready,
}

/// Point-in-time view of a handle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleSnapshot {
    /// Session this snapshot describes.
    pub session_id: SessionId,
    /// Status at the time of the snapshot.
    pub status: ConnectionStatus,
    /// Outstanding pairing code, cleared once ready or disconnected.
    pub pairing_code: Option<String>,
    /// Account reported on `Ready`.
    pub account: Option<String>,
    /// Why the session disconnected, as reported by the first `Disconnected`.
    pub disconnect_reason: Option<String>,
    /// When `status` last changed.
    pub status_changed_at: DateTime<Utc>,
}

/// State change published to waiters.
#[derive(Debug, Clone)]
enum HandleEvent {
    PairingCode(String),
    Ready,
    Disconnected(String),
}

#[derive(Debug)]
struct HandleState {
    status: ConnectionStatus,
    pairing_code: Option<String>,
    account: Option<String>,
    disconnect_reason: Option<String>,
    status_changed_at: DateTime<Utc>,
}

impl HandleState {
    fn transition(&mut self, session_id: &SessionId, status: ConnectionStatus) {
        if self.status != status {
            debug!(
                session_id = %session_id,
                from = self.status.as_str(),
                to = status.as_str(),
                "Session status changed"
            );
            self.status = status;
            self.status_changed_at = Utc::now();
        }
    }
}

/// The live client for one session.
///
/// Owns its transport exclusively. State changes are applied in transport
/// order by the session's event pump and published to any in-flight
/// waiters; each waiter holds its own transient subscription.
pub struct ClientHandle {
    session_id: SessionId,
    credential_path: PathBuf,
    transport: Arc<dyn Transport>,
    state: RwLock<HandleState>,
    events: broadcast::Sender<HandleEvent>,
    send_lock: Mutex<()>,
    cancel: CancellationToken,
}

impl ClientHandle {
    /// Wrap `transport` in a handle that starts out `Initializing`.
    ///
    /// Nothing is connected here; the manager starts the connection.
    pub fn new(session_id: SessionId, credential_path: PathBuf, transport: Arc<dyn Transport>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            session_id,
            credential_path,
            transport,
            state: RwLock::new(HandleState {
                status: ConnectionStatus::Initializing,
                pairing_code: None,
                account: None,
                disconnect_reason: None,
                status_changed_at: Utc::now(),
            }),
            events,
            send_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    /// Id this handle is registered under.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Credential directory owned by this session.
    pub fn credential_path(&self) -> &Path {
        &self.credential_path
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.state.read().status
    }

    /// Latest pairing code, if one is outstanding.
    pub fn pairing_code(&self) -> Option<String> {
        self.state.read().pairing_code.clone()
    }

    /// Account reported by the last `Ready`, if any.
    pub fn account(&self) -> Option<String> {
        self.state.read().account.clone()
    }

    /// Consistent copy of the whole state, taken under one lock.
    pub fn snapshot(&self) -> HandleSnapshot {
        let state = self.state.read();
        HandleSnapshot {
            session_id: self.session_id.clone(),
            status: state.status,
            pairing_code: state.pairing_code.clone(),
            account: state.account.clone(),
            disconnect_reason: state.disconnect_reason.clone(),
            status_changed_at: state.status_changed_at,
        }
    }

    pub(crate) fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Apply a lifecycle event from the transport.
    ///
    /// Returns whether the event changed the session's state. Inbound
    /// messages are not lifecycle events and are ignored here.
    pub fn apply(&self, event: &TransportEvent) -> bool {
        let mut state = self.state.write();
        match event {
            TransportEvent::PairingCode { code } => {
                if matches!(state.status, ConnectionStatus::Ready | ConnectionStatus::Disconnected) {
                    debug!(session_id = %self.session_id, "Ignoring stale pairing code");
                    return false;
                }
                state.pairing_code = Some(code.clone());
                state.transition(&self.session_id, ConnectionStatus::AwaitingPairing);
                info!(session_id = %self.session_id, code = %code, "Pairing code issued");
                let _ = self.events.send(HandleEvent::PairingCode(code.clone()));
            }
            TransportEvent::Ready { account } => {
                if state.status == ConnectionStatus::Disconnected {
                    debug!(session_id = %self.session_id, "Ignoring ready after disconnect");
                    return false;
                }
                state.pairing_code = None;
                state.account.clone_from(account);
                state.transition(&self.session_id, ConnectionStatus::Ready);
                info!(
                    session_id = %self.session_id,
                    account = account.as_deref().unwrap_or("unknown"),
                    "Client is ready"
                );
                let _ = self.events.send(HandleEvent::Ready);
            }
            TransportEvent::Disconnected { reason } => {
                if state.status == ConnectionStatus::Disconnected {
                    return false;
                }
                state.pairing_code = None;
                state.disconnect_reason = Some(reason.clone());
                state.transition(&self.session_id, ConnectionStatus::Disconnected);
                warn!(session_id = %self.session_id, reason = %reason, "Client disconnected");
                let _ = self.events.send(HandleEvent::Disconnected(reason.clone()));
            }
            TransportEvent::MessageReceived(_) => return false,
        }
        true
    }

    /// Wait for the first pairing code or for the session to become ready.
    ///
    /// Resolves immediately when the session is already ready or a code is
    /// already outstanding. Fails with [`PairgateError::Timeout`] after
    /// `timeout`, and with [`PairgateError::Transport`] if the session
    /// disconnects first.
    pub async fn await_authentication(&self, timeout: Duration) -> PairgateResult<AuthOutcome> {
        // Subscribing under the read lock means no event can slip between
        // the check and the subscription.
        let mut rx = {
            let state = self.state.read();
            if let Some(outcome) = self.outcome_of(&state) {
                return outcome;
            }
            self.events.subscribe()
        };

        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(HandleEvent::PairingCode(code)) => return Ok(AuthOutcome::PairingCode(code)),
                    Ok(HandleEvent::Ready) => return Ok(AuthOutcome::Ready),
                    Ok(HandleEvent::Disconnected(reason)) => return Err(self.disconnected_error(&reason)),
                    Err(RecvError::Lagged(_)) => {
                        let current = self.outcome_of(&self.state.read());
                        if let Some(outcome) = current {
                            return outcome;
                        }
                    }
                    Err(RecvError::Closed) => {
                        return Err(PairgateError::Transport("session closed".to_string()));
                    }
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| PairgateError::Timeout(timeout))?
    }

    /// Wait until the handle reaches `status`.
    pub async fn wait_for_status(&self, status: ConnectionStatus, timeout: Duration) -> PairgateResult<()> {
        let mut rx = {
            let state = self.state.read();
            if state.status == status {
                return Ok(());
            }
            self.events.subscribe()
        };

        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        if self.status() == status {
                            return Ok(());
                        }
                    }
                    Err(RecvError::Closed) => {
                        return Err(PairgateError::Transport("session closed".to_string()));
                    }
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| PairgateError::Timeout(timeout))?
    }

    /// Send a message through the transport.
    ///
    /// Sends on one handle are serialized in the order callers arrive.
    pub async fn send(&self, chat_id: &ChatId, text: &str) -> PairgateResult<()> {
        let _guard = self.send_lock.lock().await;
        let status = self.status();
        if status != ConnectionStatus::Ready {
            debug!(session_id = %self.session_id, status = status.as_str(), "Sending on a session that is not ready");
        }
        self.transport
            .send_message(chat_id, text)
            .await
            .map_err(|e| match e {
                PairgateError::Transport(_) => e,
                other => PairgateError::Transport(other.to_string()),
            })?;
        debug!(session_id = %self.session_id, chat_id = %chat_id, "Message sent");
        Ok(())
    }

    /// Stop background tasks and close the transport.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Err(e) = self.transport.disconnect().await {
            warn!(session_id = %self.session_id, error = %e, "Transport disconnect failed");
        }
    }

    fn outcome_of(&self, state: &HandleState) -> Option<PairgateResult<AuthOutcome>> {
        match state.status {
            ConnectionStatus::Ready => Some(Ok(AuthOutcome::Ready)),
            ConnectionStatus::Disconnected => Some(Err(self.disconnected_error(
                state.disconnect_reason.as_deref().unwrap_or("unknown reason"),
            ))),
            _ => state
                .pairing_code
                .clone()
                .map(|code| Ok(AuthOutcome::PairingCode(code))),
        }
    }

    fn disconnected_error(&self, reason: &str) -> PairgateError {
        PairgateError::Transport(format!(
            "session '{}' disconnected: {reason}",
            self.session_id
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pairgate_channels::ScriptedTransport;

    fn handle() -> Arc<ClientHandle> {
        let id = SessionId::parse("alice").unwrap();
        let (transport, _rx) = ScriptedTransport::new(id.clone(), PathBuf::from("/tmp/alice"), vec![]);
        Arc::new(ClientHandle::new(id, PathBuf::from("/tmp/alice"), Arc::new(transport)))
    }

    fn code(c: &str) -> TransportEvent {
        TransportEvent::PairingCode { code: c.into() }
    }

    #[test]
    fn test_initial_state() {
        let h = handle();
        assert_eq!(h.status(), ConnectionStatus::Initializing);
        assert!(h.pairing_code().is_none());
    }

    #[test]
    fn test_pairing_then_ready() {
        let h = handle();
        h.apply(&code("ABC-123"));
        assert_eq!(h.status(), ConnectionStatus::AwaitingPairing);
        assert_eq!(h.pairing_code().as_deref(), Some("ABC-123"));

        h.apply(&code("DEF-456"));
        assert_eq!(h.pairing_code().as_deref(), Some("DEF-456"));

        h.apply(&TransportEvent::Ready {
            account: Some("393331234567".into()),
        });
        assert_eq!(h.status(), ConnectionStatus::Ready);
        assert!(h.pairing_code().is_none());
        assert_eq!(h.account().as_deref(), Some("393331234567"));
    }

    #[test]
    fn test_disconnected_is_terminal() {
        let h = handle();
        h.apply(&TransportEvent::Ready { account: None });
        h.apply(&TransportEvent::Disconnected {
            reason: "logout".into(),
        });
        h.apply(&code("late"));
        h.apply(&TransportEvent::Ready { account: None });

        let snap = h.snapshot();
        assert_eq!(snap.status, ConnectionStatus::Disconnected);
        assert_eq!(snap.disconnect_reason.as_deref(), Some("logout"));
        assert!(snap.pairing_code.is_none());
    }

    #[test]
    fn test_apply_reports_changes() {
        let h = handle();
        assert!(h.apply(&code("ABC-123")));
        assert!(h.apply(&TransportEvent::Ready { account: None }));
        assert!(!h.apply(&code("stale")));
        assert!(h.apply(&TransportEvent::Disconnected {
            reason: "socket reset".into(),
        }));
        assert!(!h.apply(&TransportEvent::Disconnected {
            reason: "Transport error: socket reset".into(),
        }));
        assert_eq!(h.snapshot().disconnect_reason.as_deref(), Some("socket reset"));
    }

    #[tokio::test]
    async fn test_await_ready_fast_path() {
        let h = handle();
        h.apply(&TransportEvent::Ready { account: None });
        let outcome = h.await_authentication(Duration::ZERO).await.unwrap();
        assert_eq!(outcome, AuthOutcome::Ready);
    }

    #[tokio::test]
    async fn test_await_resolves_on_code() {
        let h = handle();
        let waiter = {
            let h = h.clone();
            tokio::spawn(async move { h.await_authentication(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.apply(&code("ABC-123"));

        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome, AuthOutcome::PairingCode("ABC-123".into()));
    }

    #[tokio::test]
    async fn test_await_times_out_and_unsubscribes() {
        let h = handle();
        let err = h
            .await_authentication(Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, PairgateError::Timeout(_)));
        assert_eq!(h.events.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_await_fails_on_disconnect() {
        let h = handle();
        let waiter = {
            let h = h.clone();
            tokio::spawn(async move { h.await_authentication(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.apply(&TransportEvent::Disconnected {
            reason: "browser crashed".into(),
        });

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, PairgateError::Transport(m) if m.contains("browser crashed")));
    }
}
