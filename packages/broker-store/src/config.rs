//! Store configuration (spec.md §6 "Configuration keys").
//!
//! Modeled on the teacher workspace's `service::config::ServerConfig`: a
//! flat struct with a sensible `Default`, constructed by the embedder
//! (there is no config-file loader in scope here — see `SPEC_FULL.md`
//! §"Configuration").

use std::time::Duration;

/// Tuning knobs shared by every store a [`crate::store::registry::StoreRegistry`]
/// manages.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// How often a master scans for due expiries (spec.md §4.3 "tick").
    pub tick_interval: Duration,
    /// How long a [`Frontend`](crate::store::frontend::Frontend) call waits
    /// for a reply before failing with `ErrorKind::RequestTimeout`.
    pub request_timeout: Duration,
    /// Directory new SQLite-backed stores persist their database file under.
    /// `None` means every store defaults to an in-memory backend.
    pub sqlite_dir: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            sqlite_dir: None,
        }
    }
}

impl StoreConfig {
    /// The path a store named `name` would persist to under `sqlite_dir`,
    /// if configured.
    #[must_use]
    pub fn sqlite_path(&self, name: &str) -> Option<String> {
        self.sqlite_dir.as_ref().map(|dir| format!("{dir}/{name}.sqlite3"))
    }
}
