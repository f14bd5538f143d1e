//! Backend construction (spec.md §4.2 "A constructor-time failure is
//! reportable by `init_failed`").
//!
//! Modeled on the teacher workspace's `storage::factory` module: a small
//! enum naming the available concrete backends plus a function building the
//! trait object, rather than callers matching on config themselves.

use broker_core::ErrorKind;
use tracing::{error, info};

use super::Backend;

/// Recognizes the `path` configuration key for persistent backends
/// (spec.md §6 "Configuration keys").
#[derive(Debug, Clone)]
pub enum BackendKind {
    Memory,
    #[cfg(feature = "sqlite")]
    Sqlite { path: String },
}

impl BackendKind {
    /// Constructs the concrete backend.
    ///
    /// Clones always use [`BackendKind::Memory`] regardless of this
    /// argument (spec.md design notes §9 "Clones always use in-memory") —
    /// callers building a clone's backend should pass `Memory` directly
    /// rather than relying on this function to downgrade a persistent
    /// request.
    ///
    /// # Errors
    /// `ErrorKind::CannotOpenFile` if a persistent backend fails to open
    /// (spec.md §4.2 "the backend remains in a degenerate state where all
    /// subsequent operations fail `backend_failure`" — here we fail the
    /// constructor instead of returning a degenerate instance, since a
    /// `Box<dyn Backend>` has nowhere to store "poisoned" state).
    pub async fn build(&self) -> Result<Box<dyn Backend>, ErrorKind> {
        match self {
            BackendKind::Memory => {
                info!("constructing in-memory backend");
                Ok(Box::new(super::memory::MemoryBackend::new()))
            }
            #[cfg(feature = "sqlite")]
            BackendKind::Sqlite { path } => {
                info!(path, "constructing sqlite backend");
                match super::sqlite::SqliteBackend::open(path).await {
                    Ok(backend) => Ok(Box::new(backend)),
                    Err(e) => {
                        error!(path, error = %e, "sqlite backend failed to open");
                        Err(ErrorKind::CannotOpenFile)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_always_builds() {
        let backend = BackendKind::Memory.build().await;
        assert!(backend.is_ok());
    }
}
