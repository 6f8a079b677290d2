//! Persistence Adapters
//!
//! Implementations of the `SnapshotStore` port.
//!
//! - `InMemorySnapshotStore`: process-local, for development and tests
//! - `JsonlSnapshotStore`: append-only JSON lines files

use std::sync::Arc;

use crate::application::ports::{PersistenceError, SnapshotStore};
use crate::infrastructure::config::PersistenceBackend;

pub mod in_memory;
pub mod jsonl;

pub use in_memory::{DEFAULT_TRADE_HISTORY, InMemorySnapshotStore};
pub use jsonl::JsonlSnapshotStore;

/// Build the store selected by configuration.
///
/// # Errors
///
/// Returns `PersistenceError::Io` if the JSON lines directory cannot be
/// created.
pub async fn open_store(
    backend: &PersistenceBackend,
) -> Result<Arc<dyn SnapshotStore>, PersistenceError> {
    match backend {
        PersistenceBackend::Memory => Ok(Arc::new(InMemorySnapshotStore::new())),
        PersistenceBackend::Jsonl { dir } => {
            let store = JsonlSnapshotStore::open(dir.clone()).await?;
            Ok(Arc::new(store))
        }
    }
}
