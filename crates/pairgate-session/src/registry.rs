use crate::handle::ClientHandle;
use pairgate_core::{PairgateResult, SessionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory map from session id to its live client.
///
/// All mutations go through one lock, so check-then-insert is atomic and
/// there is never more than one handle per id. The lock is never held
/// across an `.await`.
#[derive(Default)]
pub struct SessionRegistry {
    handles: RwLock<HashMap<SessionId, Arc<ClientHandle>>>,
}

impl SessionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Live handle for `session_id`, if registered.
    pub fn get(&self, session_id: &str) -> Option<Arc<ClientHandle>> {
        self.handles.read().get(session_id).cloned()
    }

    /// Whether `session_id` is registered.
    pub fn contains(&self, session_id: &str) -> bool {
        self.handles.read().contains_key(session_id)
    }

    /// Return the handle for `session_id`, building it with `build` if absent.
    ///
    /// The boolean is `true` when `build` ran. `build` runs under the
    /// registry lock and must not block.
    pub fn get_or_insert_with<F>(
        &self,
        session_id: &SessionId,
        build: F,
    ) -> PairgateResult<(Arc<ClientHandle>, bool)>
    where
        F: FnOnce() -> PairgateResult<Arc<ClientHandle>>,
    {
        let mut handles = self.handles.write();
        if let Some(existing) = handles.get(session_id) {
            return Ok((existing.clone(), false));
        }
        let handle = build()?;
        handles.insert(session_id.clone(), handle.clone());
        Ok((handle, true))
    }

    /// Swap in a new handle when `should_replace` approves the current one.
    ///
    /// Returns `None` for an unknown id, `Some((current, None))` when the
    /// current handle is kept, and `Some((new, Some(old)))` after a swap.
    pub fn replace_if<P, F>(
        &self,
        session_id: &str,
        should_replace: P,
        build: F,
    ) -> PairgateResult<Option<(Arc<ClientHandle>, Option<Arc<ClientHandle>>)>>
    where
        P: FnOnce(&ClientHandle) -> bool,
        F: FnOnce(&SessionId) -> PairgateResult<Arc<ClientHandle>>,
    {
        let mut handles = self.handles.write();
        let Some((id, current)) = handles.get_key_value(session_id) else {
            return Ok(None);
        };
        if !should_replace(current.as_ref()) {
            return Ok(Some((current.clone(), None)));
        }
        let id = id.clone();
        let replacement = build(&id)?;
        let old = handles.insert(id, replacement.clone());
        Ok(Some((replacement, old)))
    }

    /// Unregister `session_id`, returning its handle.
    pub fn remove(&self, session_id: &str) -> Option<Arc<ClientHandle>> {
        self.handles.write().remove(session_id)
    }

    /// Remove `session_id` only if `predicate` still holds under the lock.
    pub fn remove_if<P>(&self, session_id: &str, predicate: P) -> Option<Arc<ClientHandle>>
    where
        P: FnOnce(&ClientHandle) -> bool,
    {
        let mut handles = self.handles.write();
        if handles.get(session_id).is_some_and(|h| predicate(h.as_ref())) {
            handles.remove(session_id)
        } else {
            None
        }
    }

    /// Remove and return every handle.
    pub fn drain(&self) -> Vec<Arc<ClientHandle>> {
        self.handles.write().drain().map(|(_, h)| h).collect()
    }

    /// Snapshot of all handles, sorted by session id.
    pub fn handles(&self) -> Vec<Arc<ClientHandle>> {
        let mut handles: Vec<_> = self.handles.read().values().cloned().collect();
        handles.sort_by(|a, b| a.session_id().cmp(b.session_id()));
        handles
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    /// Whether no session is registered.
    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::handle::ConnectionStatus;
    use pairgate_channels::{ScriptedTransport, TransportEvent};
    use pairgate_core::PairgateError;
    use std::path::PathBuf;

    fn make(id: &SessionId) -> PairgateResult<Arc<ClientHandle>> {
        let (transport, _rx) = ScriptedTransport::new(id.clone(), PathBuf::from("/tmp"), vec![]);
        Ok(Arc::new(ClientHandle::new(
            id.clone(),
            PathBuf::from("/tmp"),
            Arc::new(transport),
        )))
    }

    #[test]
    fn test_get_or_insert_is_idempotent() {
        let registry = SessionRegistry::new();
        let id = SessionId::parse("alice").unwrap();

        let (first, created) = registry.get_or_insert_with(&id, || make(&id)).unwrap();
        assert!(created);
        let (second, created) = registry
            .get_or_insert_with(&id, || panic!("must not build twice"))
            .unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_build_failure_leaves_no_entry() {
        let registry = SessionRegistry::new();
        let id = SessionId::parse("broken").unwrap();
        let result = registry.get_or_insert_with(&id, || Err(PairgateError::Transport("nope".into())));
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_replace_if() {
        let registry = SessionRegistry::new();
        let id = SessionId::parse("alice").unwrap();
        let (original, _) = registry.get_or_insert_with(&id, || make(&id)).unwrap();

        let (kept, old) = registry
            .replace_if("alice", |h| h.status() == ConnectionStatus::Disconnected, make)
            .unwrap()
            .unwrap();
        assert!(old.is_none());
        assert!(Arc::ptr_eq(&kept, &original));

        original.apply(&TransportEvent::Disconnected {
            reason: "gone".into(),
        });
        let (fresh, old) = registry
            .replace_if("alice", |h| h.status() == ConnectionStatus::Disconnected, make)
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&old.unwrap(), &original));
        assert_eq!(fresh.status(), ConnectionStatus::Initializing);
        assert_eq!(registry.len(), 1);

        assert!(registry.replace_if("nobody", |_| true, make).unwrap().is_none());
    }

    #[test]
    fn test_remove_if_rechecks() {
        let registry = SessionRegistry::new();
        let id = SessionId::parse("alice").unwrap();
        registry.get_or_insert_with(&id, || make(&id)).unwrap();

        assert!(registry.remove_if("alice", |_| false).is_none());
        assert!(registry.remove_if("alice", |_| true).is_some());
        assert!(!registry.contains("alice"));
    }
}
