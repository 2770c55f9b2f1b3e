use crate::credentials::CredentialStore;
use crate::handle::{AuthOutcome, ClientHandle, ConnectionStatus, HandleSnapshot};
use crate::qr;
use crate::registry::SessionRegistry;
use chrono::Utc;
use pairgate_channels::{InboundMessage, TransportEvent, TransportFactory};
use pairgate_core::{ChatId, PairgateError, PairgateResult, SessionId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Tunables for the session manager.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Default bound for [`SessionManager::await_authentication`].
    pub auth_timeout: Duration,
    /// Answer an inbound `!ping` with `pong`.
    pub ping_reply: bool,
    /// Draw each new pairing code as a QR on stderr.
    pub print_qr: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(60),
            ping_reply: false,
            print_qr: false,
        }
    }
}

/// Outcome of [`SessionManager::restore_sessions`].
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Sessions now present in the registry.
    pub restored: Vec<SessionId>,
    /// Entries that could not be restored, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Creates, restores and tears down per-session clients.
///
/// The manager owns the registry; the gateway receives it by `Arc` rather
/// than through a global.
pub struct SessionManager {
    registry: SessionRegistry,
    credentials: CredentialStore,
    factory: Arc<dyn TransportFactory>,
    config: SessionConfig,
}

impl SessionManager {
    /// A manager with an empty registry. Call
    /// [`restore_sessions`](Self::restore_sessions) to bring stored sessions back.
    pub fn new(
        credentials: CredentialStore,
        factory: Arc<dyn TransportFactory>,
        config: SessionConfig,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            credentials,
            factory,
            config,
        }
    }

    /// The live sessions.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Where session credentials live.
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Tunables this manager was built with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Return the live client for `session_id`, creating it if needed.
    ///
    /// An existing session is returned untouched. A new one is registered
    /// in `Initializing` and its connection is started in the background;
    /// this returns before the connection completes. Without an id a fresh
    /// random one is generated.
    pub async fn create_session(&self, session_id: Option<SessionId>) -> PairgateResult<Arc<ClientHandle>> {
        match session_id {
            Some(id) => self.get_or_create(&id),
            None => loop {
                let id = SessionId::generate();
                let (handle, created) = self.insert_new(&id)?;
                if created {
                    return Ok(handle);
                }
                debug!(session_id = %id, "Generated session id collided, retrying");
            },
        }
    }

    /// Wait for `handle` to produce a pairing code or become ready.
    ///
    /// Uses the configured default when `timeout` is `None`.
    pub async fn await_authentication(
        &self,
        handle: &ClientHandle,
        timeout: Option<Duration>,
    ) -> PairgateResult<AuthOutcome> {
        handle
            .await_authentication(timeout.unwrap_or(self.config.auth_timeout))
            .await
    }

    /// Live handle for `session_id`, or [`PairgateError::NotFound`].
    pub fn get_session(&self, session_id: &str) -> PairgateResult<Arc<ClientHandle>> {
        self.registry
            .get(session_id)
            .ok_or_else(|| PairgateError::NotFound(session_id.to_string()))
    }

    /// Snapshots of every registered session, sorted by id.
    pub fn list_sessions(&self) -> Vec<HandleSnapshot> {
        self.registry.handles().iter().map(|h| h.snapshot()).collect()
    }

    /// Recreate a client for every credential directory on disk.
    ///
    /// Best effort: a failing entry is logged and skipped, a missing root
    /// restores nothing.
    pub async fn restore_sessions(&self) -> RestoreReport {
        let mut report = RestoreReport::default();

        let scan = match self.credentials.scan().await {
            Ok(scan) => scan,
            Err(e) => {
                warn!(root = %self.credentials.root().display(), error = %e, "Cannot read credential root");
                report
                    .failed
                    .push((self.credentials.root().display().to_string(), e.to_string()));
                return report;
            }
        };

        for (name, reason) in scan.skipped {
            warn!(entry = %name, reason = %reason, "Skipping credential entry");
            report.failed.push((name, reason));
        }

        for id in scan.sessions {
            match self.create_session(Some(id.clone())).await {
                Ok(_) => {
                    debug!(session_id = %id, "Session restored");
                    report.restored.push(id);
                }
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Failed to restore session");
                    report.failed.push((id.to_string(), e.to_string()));
                }
            }
        }

        info!(
            restored = report.restored.len(),
            failed = report.failed.len(),
            "Session restoration finished"
        );
        report
    }

    /// Send `text` to `chat_id` on the given session.
    ///
    /// `chat_id` may be a phone number in international format or an
    /// already-suffixed chat id.
    pub async fn send_message(&self, session_id: &str, chat_id: &str, text: &str) -> PairgateResult<()> {
        let handle = self.get_session(session_id)?;
        if text.trim().is_empty() {
            return Err(PairgateError::InvalidArgument(
                "message text must not be empty".into(),
            ));
        }
        let chat_id = ChatId::normalize(chat_id)?;
        handle.send(&chat_id, text).await
    }

    /// Replace a disconnected session's client with a fresh one.
    ///
    /// A session that is not disconnected is returned unchanged. Existing
    /// credentials are reused, so a previously paired session comes back
    /// without a new pairing code.
    pub async fn reconnect(&self, session_id: &str) -> PairgateResult<Arc<ClientHandle>> {
        let mut events = None;
        let swapped = self.registry.replace_if(
            session_id,
            |current| current.status() == ConnectionStatus::Disconnected,
            |id| {
                let (handle, rx) = self.build_handle(id)?;
                events = Some(rx);
                Ok(handle)
            },
        )?;

        let Some((handle, old)) = swapped else {
            return Err(PairgateError::NotFound(session_id.to_string()));
        };

        if let Some(old) = old {
            old.shutdown().await;
            info!(session_id = %handle.session_id(), "Reconnecting session");
        }
        if let Some(events) = events {
            self.start(&handle, events);
        }
        Ok(handle)
    }

    /// Tear down a session and forget it.
    ///
    /// With `purge`, its credential directory is deleted too, so it will not
    /// be restored on the next start.
    pub async fn remove_session(&self, session_id: &str, purge: bool) -> PairgateResult<()> {
        let handle = self
            .registry
            .remove(session_id)
            .ok_or_else(|| PairgateError::NotFound(session_id.to_string()))?;
        handle.shutdown().await;

        if purge {
            let purged = self.credentials.purge(handle.session_id()).await?;
            info!(session_id = %session_id, purged, "Session removed");
        } else {
            info!(session_id = %session_id, "Session removed");
        }
        Ok(())
    }

    /// Remove sessions that have been disconnected for longer than `older_than`.
    ///
    /// Credentials are kept. Returns the removed ids.
    pub async fn prune_disconnected(&self, older_than: Duration) -> Vec<SessionId> {
        let Ok(age) = chrono::Duration::from_std(older_than) else {
            return Vec::new();
        };
        let cutoff = Utc::now() - age;
        let is_stale = |h: &ClientHandle| {
            let snap = h.snapshot();
            snap.status == ConnectionStatus::Disconnected && snap.status_changed_at <= cutoff
        };

        let mut pruned = Vec::new();
        for handle in self.registry.handles() {
            if !is_stale(handle.as_ref()) {
                continue;
            }
            if let Some(removed) = self.registry.remove_if(handle.session_id().as_str(), &is_stale) {
                removed.shutdown().await;
                pruned.push(removed.session_id().clone());
            }
        }

        if !pruned.is_empty() {
            info!(count = pruned.len(), "Pruned disconnected sessions");
        }
        pruned
    }

    /// Stop every session. Credentials stay on disk for the next start.
    pub async fn shutdown(&self) {
        let handles = self.registry.drain();
        info!(count = handles.len(), "Shutting down sessions");
        for handle in handles {
            handle.shutdown().await;
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn get_or_create(&self, session_id: &SessionId) -> PairgateResult<Arc<ClientHandle>> {
        let (handle, _) = self.insert_new(session_id)?;
        Ok(handle)
    }

    /// Atomically register a new client for `session_id` unless one exists.
    fn insert_new(&self, session_id: &SessionId) -> PairgateResult<(Arc<ClientHandle>, bool)> {
        let mut events = None;
        let (handle, created) = self.registry.get_or_insert_with(session_id, || {
            let (handle, rx) = self.build_handle(session_id)?;
            events = Some(rx);
            Ok(handle)
        })?;

        if let Some(events) = events {
            info!(session_id = %session_id, "Session created");
            self.start(&handle, events);
        }
        Ok((handle, created))
    }

    fn build_handle(
        &self,
        session_id: &SessionId,
    ) -> PairgateResult<(Arc<ClientHandle>, mpsc::Receiver<TransportEvent>)> {
        let path = self.credentials.path_for(session_id);
        let conn = self.factory.create(session_id, &path)?;
        let handle = Arc::new(ClientHandle::new(session_id.clone(), path, conn.transport));
        Ok((handle, conn.events))
    }

    /// Spawn the event pump and the background connect for a new handle.
    fn start(&self, handle: &Arc<ClientHandle>, events: mpsc::Receiver<TransportEvent>) {
        let (failure_tx, failure_rx) = oneshot::channel();
        spawn_event_pump(handle.clone(), events, failure_rx, self.config.clone());
        spawn_connect(handle.clone(), failure_tx);
    }
}

/// Apply transport events to `handle` in arrival order until cancelled.
///
/// A failed connect reaches the pump through `failure`. Events the transport
/// queued before failing are applied first, so its own disconnect reason wins
/// over the connect error.
fn spawn_event_pump(
    handle: Arc<ClientHandle>,
    mut events: mpsc::Receiver<TransportEvent>,
    mut failure: oneshot::Receiver<String>,
    config: SessionConfig,
) {
    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        let mut connecting = true;
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                result = &mut failure, if connecting => {
                    connecting = false;
                    let Ok(reason) = result else {
                        continue;
                    };
                    while let Ok(queued) = events.try_recv() {
                        dispatch(&handle, queued, &config);
                    }
                    TransportEvent::Disconnected { reason }
                }
            };
            dispatch(&handle, event, &config);
        }
        debug!(session_id = %handle.session_id(), "Event pump stopped");
    });
}

fn dispatch(handle: &Arc<ClientHandle>, event: TransportEvent, config: &SessionConfig) {
    match event {
        TransportEvent::MessageReceived(message) => {
            debug!(session_id = %handle.session_id(), from = %message.from, "Message received");
            if config.ping_reply && is_ping(&message) {
                spawn_pong(handle.clone(), message);
            }
        }
        TransportEvent::PairingCode { ref code } => {
            if handle.apply(&event) && config.print_qr {
                print_pairing_qr(handle.session_id(), code);
            }
        }
        lifecycle => {
            handle.apply(&lifecycle);
        }
    }
}

/// Run the transport connection in the background.
///
/// A connect error is handed to the event pump instead of being applied here.
fn spawn_connect(handle: Arc<ClientHandle>, failure: oneshot::Sender<String>) {
    let cancel = handle.cancel_token();
    let transport = handle.transport();
    tokio::spawn(async move {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(session_id = %handle.session_id(), "Connect cancelled");
            }
            result = transport.connect() => {
                if let Err(e) = result {
                    warn!(session_id = %handle.session_id(), transport = transport.name(), error = %e, "Connection failed");
                    let _ = failure.send(e.to_string());
                }
            }
        }
    });
}

fn print_pairing_qr(session_id: &SessionId, code: &str) {
    match qr::render_terminal(code) {
        Ok(rendered) => eprintln!("Scan to pair session '{session_id}':\n{rendered}"),
        Err(e) => warn!(session_id = %session_id, error = %e, "Cannot render pairing QR"),
    }
}

fn is_ping(message: &InboundMessage) -> bool {
    message.body.trim() == "!ping"
}

fn spawn_pong(handle: Arc<ClientHandle>, message: InboundMessage) {
    tokio::spawn(async move {
        let chat_id = match ChatId::normalize(&message.from) {
            Ok(chat_id) => chat_id,
            Err(e) => {
                debug!(from = %message.from, error = %e, "Cannot reply to sender");
                return;
            }
        };
        if let Err(e) = handle.send(&chat_id, "pong").await {
            warn!(session_id = %handle.session_id(), error = %e, "Ping reply failed");
        }
    });
}
