pub mod race;
pub mod sessions;

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::sync::{Mutex, MutexGuard};

use crate::{
    config::RaceRules,
    dao::race_store::RaceStore,
    services::{persistence::PersistenceHandle, results::ResultsHandle},
    state::{race::RaceState, sessions::SessionRegistry},
};

pub type SharedState = Arc<AppState>;

/// Hook run after every accepted mutation, while the state lock is still held.
///
/// Listeners are invoked in registration order with the new snapshot, so two mutations can
/// never be observed out of order. Implementations must not block.
pub trait StateListener: Send + Sync {
    /// React to a new state snapshot.
    fn state_changed(&self, state: &Arc<RaceState>);
}

/// Central application state: the race document plus the handles reacting to its changes.
pub struct AppState {
    races: Mutex<RaceState>,
    sessions: Arc<SessionRegistry>,
    listeners: Vec<Arc<dyn StateListener>>,
    persistence: PersistenceHandle,
    results: ResultsHandle,
    store: Arc<dyn RaceStore>,
    rules: RaceRules,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// Persistence runs first, then the session broadcast.
    pub fn new(
        initial: RaceState,
        store: Arc<dyn RaceStore>,
        persistence: PersistenceHandle,
        results: ResultsHandle,
        rules: RaceRules,
    ) -> SharedState {
        let sessions = Arc::new(SessionRegistry::new());
        let listeners: Vec<Arc<dyn StateListener>> =
            vec![Arc::new(persistence.clone()), sessions.clone()];
        Arc::new(Self {
            races: Mutex::new(initial),
            sessions,
            listeners,
            persistence,
            results,
            store,
            rules,
        })
    }

    /// Exclusive access to the race document. Hold the guard for the whole
    /// mutate-then-notify sequence.
    pub async fn lock_races(&self) -> MutexGuard<'_, RaceState> {
        self.races.lock().await
    }

    /// Copy of the current race document.
    pub async fn snapshot(&self) -> Arc<RaceState> {
        Arc::new(self.races.lock().await.clone())
    }

    /// Registry of connected clients.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Ordered persistence queue.
    pub fn persistence(&self) -> &PersistenceHandle {
        &self.persistence
    }

    /// Queue feeding the results publisher.
    pub fn results(&self) -> &ResultsHandle {
        &self.results
    }

    /// Store backing the persistence queue, used for metadata queries.
    pub fn store(&self) -> &Arc<dyn RaceStore> {
        &self.store
    }

    /// Defaults applied by the command handlers.
    pub fn rules(&self) -> &RaceRules {
        &self.rules
    }

    /// Run every listener with `state`. Callers hold the race lock.
    pub fn notify_state_changed(&self, state: &Arc<RaceState>) {
        for listener in &self.listeners {
            listener.state_changed(state);
        }
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
