//! Persistence of the whole [`RaceState`] document.

mod json_file;
mod memory;

use std::{sync::Arc, time::SystemTime};

use futures::future::BoxFuture;

use crate::{
    config::{StorageBackend, StorageConfig},
    dao::storage::StorageResult,
    state::race::RaceState,
};

pub use self::{json_file::JsonFileRaceStore, memory::MemoryRaceStore};

/// Where and how big the persisted document currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    /// Human-readable location (file path or `memory`).
    pub location: String,
    /// Whether a document has been written yet.
    pub exists: bool,
    /// Size of the stored document in bytes.
    pub size_bytes: Option<u64>,
    /// Last time the document was written.
    pub last_modified: Option<SystemTime>,
}

/// Abstraction over the durable store holding the full race state.
///
/// Every save overwrites the previous document wholesale.
pub trait RaceStore: Send + Sync {
    /// Load the stored state; `Ok(None)` when nothing was ever saved.
    fn load(&self) -> BoxFuture<'static, StorageResult<Option<RaceState>>>;
    /// Replace the stored document with `state`.
    fn save(&self, state: Arc<RaceState>) -> BoxFuture<'static, StorageResult<()>>;
    /// Report metadata about the stored document.
    fn describe(&self) -> BoxFuture<'static, StorageResult<StoreInfo>>;
}

/// Build the store selected by the configuration.
pub fn from_config(config: &StorageConfig) -> Arc<dyn RaceStore> {
    match config.backend {
        StorageBackend::File => Arc::new(JsonFileRaceStore::new(config.path.clone())),
        StorageBackend::Memory => Arc::new(MemoryRaceStore::new()),
    }
}
