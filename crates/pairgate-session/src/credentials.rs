use pairgate_core::{PairgateResult, SessionId};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory tree holding one credential directory per session.
///
/// The contents of each directory belong to the transport; this store only
/// derives paths, discovers existing sessions and deletes them on request.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    root: PathBuf,
}

/// Outcome of scanning the credential root.
#[derive(Debug, Default)]
pub struct CredentialScan {
    /// Directories whose names are valid session ids, sorted.
    pub sessions: Vec<SessionId>,
    /// Entries that looked like sessions but could not be used, with the reason.
    pub skipped: Vec<(String, String)>,
}

impl CredentialStore {
    /// A store rooted at `root`. The directory is not created.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory containing every session's credentials.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Credential directory for `session_id`.
    pub fn path_for(&self, session_id: &SessionId) -> PathBuf {
        self.root.join(session_id.as_str())
    }

    /// Whether `session_id` has credentials on disk.
    pub fn exists(&self, session_id: &SessionId) -> bool {
        self.path_for(session_id).is_dir()
    }

    /// List every directory under the root.
    ///
    /// A missing root yields an empty scan. Plain files are ignored. Entries
    /// that cannot be inspected or whose names are not valid session ids are
    /// reported in [`CredentialScan::skipped`].
    pub async fn scan(&self) -> PairgateResult<CredentialScan> {
        let mut scan = CredentialScan::default();

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(root = %self.root.display(), "Credential root missing, nothing to scan");
                return Ok(scan);
            }
            Err(e) => return Err(e.into()),
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(root = %self.root.display(), error = %e, "Credential scan interrupted");
                    scan.skipped.push((self.root.display().to_string(), e.to_string()));
                    break;
                }
            };

            let name = entry.file_name().to_string_lossy().into_owned();

            // Follows symlinks, so a linked credential directory still counts.
            let metadata = match tokio::fs::metadata(entry.path()).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    scan.skipped.push((name, e.to_string()));
                    continue;
                }
            };
            if !metadata.is_dir() {
                debug!(entry = %name, "Ignoring non-directory in credential root");
                continue;
            }

            match SessionId::parse(name.clone()) {
                Ok(id) => scan.sessions.push(id),
                Err(e) => scan.skipped.push((name, e.to_string())),
            }
        }

        scan.sessions.sort();
        Ok(scan)
    }

    /// Delete the credential directory for `session_id`.
    ///
    /// Returns `false` when there was nothing to delete.
    pub async fn purge(&self, session_id: &SessionId) -> PairgateResult<bool> {
        match tokio::fs::remove_dir_all(self.path_for(session_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_root_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(tmp.path().join("does-not-exist"));
        let scan = store.scan().await.unwrap();
        assert!(scan.sessions.is_empty());
        assert!(scan.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_scan_dirs_only() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir(root.join("bob")).unwrap();
        std::fs::create_dir(root.join("alice")).unwrap();
        std::fs::write(root.join("notes.txt"), "x").unwrap();
        std::fs::write(root.join("carol"), "not a dir").unwrap();

        let scan = CredentialStore::new(root).scan().await.unwrap();
        let names: Vec<&str> = scan.sessions.iter().map(SessionId::as_str).collect();
        assert_eq!(names, vec!["alice", "bob"]);
        assert!(scan.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_scan_skips_invalid_names() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("ok")).unwrap();
        std::fs::create_dir(tmp.path().join("has space")).unwrap();

        let scan = CredentialStore::new(tmp.path()).scan().await.unwrap();
        assert_eq!(scan.sessions.len(), 1);
        assert_eq!(scan.skipped.len(), 1);
        assert_eq!(scan.skipped[0].0, "has space");
    }

    #[tokio::test]
    async fn test_path_and_purge() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(tmp.path());
        let id = SessionId::parse("alice").unwrap();
        assert_eq!(store.path_for(&id), tmp.path().join("alice"));
        assert!(!store.exists(&id));

        std::fs::create_dir_all(store.path_for(&id).join("Default")).unwrap();
        assert!(store.exists(&id));
        assert!(store.purge(&id).await.unwrap());
        assert!(!store.exists(&id));
        assert!(!store.purge(&id).await.unwrap());
    }
}
