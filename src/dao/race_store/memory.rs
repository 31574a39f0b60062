use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::SystemTime,
};

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use crate::{
    dao::{
        race_store::{RaceStore, StoreInfo},
        storage::StorageResult,
    },
    state::race::RaceState,
};

#[derive(Default)]
struct Inner {
    document: RwLock<Option<(RaceState, SystemTime)>>,
    saves: AtomicUsize,
}

/// Keeps the last saved state in process memory. Nothing survives a restart.
#[derive(Clone, Default)]
pub struct MemoryRaceStore {
    inner: Arc<Inner>,
}

impl MemoryRaceStore {
    /// Empty store, as if no document was ever written.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a document, as if it had been saved by a previous run.
    pub fn with_state(state: RaceState) -> Self {
        let inner = Inner {
            document: RwLock::new(Some((state, SystemTime::now()))),
            saves: AtomicUsize::new(0),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Last saved document.
    pub async fn saved(&self) -> Option<RaceState> {
        let guard = self.inner.document.read().await;
        guard.as_ref().map(|(state, _)| state.clone())
    }

    /// Number of saves performed so far.
    pub fn save_count(&self) -> usize {
        self.inner.saves.load(Ordering::SeqCst)
    }
}

impl RaceStore for MemoryRaceStore {
    fn load(&self) -> BoxFuture<'static, StorageResult<Option<RaceState>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let guard = inner.document.read().await;
            Ok(guard.as_ref().map(|(state, _)| state.clone()))
        })
    }

    fn save(&self, state: Arc<RaceState>) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.document.write().await;
            *guard = Some(((*state).clone(), SystemTime::now()));
            inner.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn describe(&self) -> BoxFuture<'static, StorageResult<StoreInfo>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let guard = inner.document.read().await;
            Ok(StoreInfo {
                location: "memory".into(),
                exists: guard.is_some(),
                size_bytes: None,
                last_modified: guard.as_ref().map(|(_, at)| *at),
            })
        })
    }
}
