use crate::transport::{Transport, TransportConnection, TransportEvent, TransportFactory};
use async_trait::async_trait;
use pairgate_core::{ChatId, PairgateError, PairgateResult, SessionId};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// In-memory transport whose events are pushed by the caller.
///
/// `connect()` replays a fixed script and returns, failing afterwards when a
/// connect error is configured; further events are injected with
/// [`ScriptedTransport::emit`]. Sends are recorded rather than
/// delivered. A `Ready` event creates the credential directory, the way a
/// real client persists its login.
pub struct ScriptedTransport {
    session_id: SessionId,
    data_path: PathBuf,
    event_tx: mpsc::Sender<TransportEvent>,
    on_connect: Vec<TransportEvent>,
    connect_error: Option<String>,
    connect_delay: Duration,
    send_delay: Duration,
    send_failure: Mutex<Option<String>>,
    sent: Mutex<Vec<(ChatId, String)>>,
    connect_calls: AtomicUsize,
    send_calls: AtomicUsize,
    disconnected: AtomicBool,
}

impl ScriptedTransport {
    /// Create a transport that replays `on_connect` when connected.
    pub fn new(
        session_id: SessionId,
        data_path: PathBuf,
        on_connect: Vec<TransportEvent>,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::channel(32);
        let transport = Self {
            session_id,
            data_path,
            event_tx,
            on_connect,
            connect_error: None,
            connect_delay: Duration::ZERO,
            send_delay: Duration::ZERO,
            send_failure: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            connect_calls: AtomicUsize::new(0),
            send_calls: AtomicUsize::new(0),
            disconnected: AtomicBool::new(false),
        };
        (transport, event_rx)
    }

    /// Session this transport was built for.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Push an event as if the network had produced it.
    pub async fn emit(&self, event: TransportEvent) -> PairgateResult<()> {
        if matches!(event, TransportEvent::Ready { .. }) {
            tokio::fs::create_dir_all(&self.data_path).await?;
        }
        self.event_tx
            .send(event)
            .await
            .map_err(|e| PairgateError::Transport(format!("Scripted event dropped: {e}")))
    }

    /// Make every following send fail with `message`.
    pub fn fail_sends_with(&self, message: impl Into<String>) {
        *self.send_failure.lock() = Some(message.into());
    }

    /// Messages accepted so far, in send order.
    pub fn sent(&self) -> Vec<(ChatId, String)> {
        self.sent.lock().clone()
    }

    /// Number of `connect()` calls.
    pub fn connect_count(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Number of `send_message()` calls, including failed ones.
    pub fn send_count(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    /// Whether `disconnect()` was called.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(&self) -> PairgateResult<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        for event in &self.on_connect {
            self.emit(event.clone()).await?;
        }
        match self.connect_error {
            Some(ref message) => Err(PairgateError::Transport(message.clone())),
            None => Ok(()),
        }
    }

    async fn send_message(&self, chat_id: &ChatId, text: &str) -> PairgateResult<()> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        if let Some(message) = self.send_failure.lock().clone() {
            return Err(PairgateError::Transport(message));
        }
        self.sent.lock().push((chat_id.clone(), text.to_string()));
        Ok(())
    }

    async fn disconnect(&self) -> PairgateResult<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory producing [`ScriptedTransport`]s and remembering each of them.
///
/// A session whose credential directory already exists connects straight
/// to `Ready`; otherwise the configured pairing codes are issued in order.
#[derive(Default)]
pub struct ScriptedFactory {
    pairing_codes: Vec<String>,
    script: Vec<TransportEvent>,
    account: Option<String>,
    connect_error: Option<String>,
    connect_delay: Duration,
    failing: Vec<String>,
    send_delay: Duration,
    created: Mutex<Vec<Arc<ScriptedTransport>>>,
}

impl ScriptedFactory {
    /// A factory whose fresh sessions wait for events from the test.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue these pairing codes on connect for sessions without credentials.
    pub fn with_pairing_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pairing_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    /// Replay `events` after the pairing codes for sessions without credentials.
    pub fn with_script(mut self, events: impl IntoIterator<Item = TransportEvent>) -> Self {
        self.script = events.into_iter().collect();
        self
    }

    /// Account reported when a session restores from credentials.
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Make every `connect()` fail with `message` once its script is replayed.
    pub fn with_connect_error(mut self, message: impl Into<String>) -> Self {
        self.connect_error = Some(message.into());
        self
    }

    /// Wait `delay` inside `connect()` before replaying anything.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Refuse to build a transport for this session id.
    pub fn failing_for(mut self, session_id: impl Into<String>) -> Self {
        self.failing.push(session_id.into());
        self
    }

    /// Delay every send by `delay`.
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    /// Most recently built transport for `session_id`.
    pub fn transport(&self, session_id: &str) -> Option<Arc<ScriptedTransport>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|t| t.session_id.as_str() == session_id)
            .cloned()
    }

    /// Total number of transports built.
    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }
}

impl TransportFactory for ScriptedFactory {
    fn create(&self, session_id: &SessionId, data_path: &Path) -> PairgateResult<TransportConnection> {
        if self.failing.iter().any(|f| f == session_id.as_str()) {
            return Err(PairgateError::Transport(format!(
                "cannot open credentials for '{session_id}'"
            )));
        }

        let on_connect = if data_path.is_dir() {
            vec![TransportEvent::Ready {
                account: self.account.clone(),
            }]
        } else {
            self.pairing_codes
                .iter()
                .map(|code| TransportEvent::PairingCode { code: code.clone() })
                .chain(self.script.iter().cloned())
                .collect()
        };

        let (mut transport, events) =
            ScriptedTransport::new(session_id.clone(), data_path.to_path_buf(), on_connect);
        transport.connect_error = self.connect_error.clone();
        transport.connect_delay = self.connect_delay;
        transport.send_delay = self.send_delay;

        let transport = Arc::new(transport);
        self.created.lock().push(transport.clone());
        Ok(TransportConnection { transport, events })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_replays_script_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = ScriptedFactory::new().with_pairing_codes(["one", "two"]);
        let id = SessionId::parse("s1").unwrap();
        let mut conn = factory.create(&id, &tmp.path().join("s1")).unwrap();

        conn.transport.connect().await.unwrap();
        assert_eq!(
            conn.events.recv().await.unwrap(),
            TransportEvent::PairingCode { code: "one".into() }
        );
        assert_eq!(
            conn.events.recv().await.unwrap(),
            TransportEvent::PairingCode { code: "two".into() }
        );
    }

    #[tokio::test]
    async fn test_connect_error_follows_script() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = ScriptedFactory::new()
            .with_pairing_codes(["ABC-123"])
            .with_script([TransportEvent::Disconnected {
                reason: "socket reset".into(),
            }])
            .with_connect_error("Bridge read error: socket reset");
        let id = SessionId::parse("s2").unwrap();
        let mut conn = factory.create(&id, &tmp.path().join("s2")).unwrap();

        let err = conn.transport.connect().await.unwrap_err();
        assert!(matches!(err, PairgateError::Transport(m) if m.contains("read error")));
        assert_eq!(
            conn.events.recv().await.unwrap(),
            TransportEvent::PairingCode { code: "ABC-123".into() }
        );
        assert_eq!(
            conn.events.recv().await.unwrap(),
            TransportEvent::Disconnected {
                reason: "socket reset".into()
            }
        );
    }

    #[tokio::test]
    async fn test_existing_credentials_connect_ready() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("bob")).unwrap();
        let factory = ScriptedFactory::new()
            .with_pairing_codes(["never"])
            .with_account("39333");
        let id = SessionId::parse("bob").unwrap();
        let mut conn = factory.create(&id, &tmp.path().join("bob")).unwrap();

        conn.transport.connect().await.unwrap();
        assert_eq!(
            conn.events.recv().await.unwrap(),
            TransportEvent::Ready {
                account: Some("39333".into())
            }
        );
    }

    #[tokio::test]
    async fn test_ready_persists_credentials() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("carol");
        let factory = ScriptedFactory::new();
        let id = SessionId::parse("carol").unwrap();
        let _conn = factory.create(&id, &path).unwrap();

        let transport = factory.transport("carol").unwrap();
        transport
            .emit(TransportEvent::Ready { account: None })
            .await
            .unwrap();
        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn test_send_recording_and_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = ScriptedFactory::new();
        let id = SessionId::parse("dave").unwrap();
        let conn = factory.create(&id, &tmp.path().join("dave")).unwrap();
        let chat = ChatId::normalize("+39 333 1234567").unwrap();

        conn.transport.send_message(&chat, "Ciao!").await.unwrap();
        let transport = factory.transport("dave").unwrap();
        transport.fail_sends_with("not logged in");
        let err = conn.transport.send_message(&chat, "again").await.unwrap_err();

        assert!(matches!(err, PairgateError::Transport(m) if m == "not logged in"));
        assert_eq!(transport.send_count(), 2);
        assert_eq!(transport.sent(), vec![(chat, "Ciao!".to_string())]);
    }

    #[test]
    fn test_failing_session() {
        let factory = ScriptedFactory::new().failing_for("broken");
        let id = SessionId::parse("broken").unwrap();
        assert!(factory.create(&id, Path::new("/nonexistent/broken")).is_err());
        assert_eq!(factory.created_count(), 0);
    }
}
