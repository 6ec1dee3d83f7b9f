// State store boundary: full-snapshot persistence of the application state.
//
// Stores are last-write-wins on content, but every save lands under a
// version strictly above the one it replaces, assigned in the same atomic
// step as the write. Version-gated application on load is done by the engine
// (see `AuctionEngine::sync`).

use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::auction::state::AppState;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to read persisted state: {0}")]
    Read(String),

    #[error("failed to write persisted state: {0}")]
    Write(String),

    #[error("persisted state is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Versioned persistence of the full [`AppState`].
pub trait StateStore: Send + Sync {
    /// Read the most recently saved state, or `None` if nothing was saved yet.
    fn load(&self) -> Result<Option<AppState>, StorageError>;

    /// Persist `state`, replacing whatever was stored before.
    ///
    /// If `state`'s version is not above the stored one it is raised to
    /// `stored + 1` first. Reading the stored version and writing happen as
    /// one atomic step, so concurrent writers never share a version. The
    /// version written is left in `state` and returned.
    fn save(&self, state: &mut AppState) -> Result<u64, StorageError>;

    /// Version of the persisted state without materializing it. Backends
    /// that can answer this cheaply should override it; the store watcher
    /// calls it on every poll.
    fn stored_version(&self) -> Result<Option<u64>, StorageError> {
        Ok(self.load()?.map(|s| s.version()))
    }
}

/// In-process store. Clones share the same slot, so several engines built
/// on clones behave like observers of one shared store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<AppState>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<Option<AppState>, StorageError> {
        let slot = self
            .slot
            .lock()
            .map_err(|e| StorageError::Read(e.to_string()))?;
        Ok(slot.clone())
    }

    fn save(&self, state: &mut AppState) -> Result<u64, StorageError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|e| StorageError::Write(e.to_string()))?;
        let floor = slot.as_ref().map_or(0, |s| s.version() + 1);
        let version = state.version().max(floor);
        state.auction.state_version = version;
        *slot = Some(state.clone());
        Ok(version)
    }

    fn stored_version(&self) -> Result<Option<u64>, StorageError> {
        let slot = self
            .slot
            .lock()
            .map_err(|e| StorageError::Read(e.to_string()))?;
        Ok(slot.as_ref().map(AppState::version))
    }
}
