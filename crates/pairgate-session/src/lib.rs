//! Session lifecycle for Pairgate.
//!
//! A session is one logged-in chat account. The [`SessionManager`] creates
//! clients on demand, restores them from the [`CredentialStore`] on start,
//! and keeps at most one live [`ClientHandle`] per id in its
//! [`SessionRegistry`].

/// On-disk credential directories.
pub mod credentials;
/// The live client for one session.
pub mod handle;
/// Session orchestration.
pub mod manager;
/// Terminal rendering of pairing codes.
pub mod qr;
/// In-memory session map.
pub mod registry;

pub use credentials::{CredentialScan, CredentialStore};
pub use handle::{AuthOutcome, ClientHandle, ConnectionStatus, HandleSnapshot};
pub use manager::{RestoreReport, SessionConfig, SessionManager};
pub use registry::SessionRegistry;
