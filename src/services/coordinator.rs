//! Single writer for the race state.
//!
//! Every mutation goes through [`dispatch`]: the handler runs under the state lock, then
//! the new snapshot is handed to the listeners (persistence queue, client broadcast)
//! before the lock is released. Connecting clients receive their first snapshot under
//! the same lock, so no client ever sees an older state after a newer one.

use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::{AppConfig, RaceRules},
    dao::race_store::{self, RaceStore},
    dto::ws::ClientCommand,
    error::ServiceError,
    services::{
        commands::{self, CommandContext, CommandRejected, Effect},
        persistence::PersistenceHandle,
        results::{HtmlResultsPublisher, ResultsHandle, ResultsPublisher},
    },
    state::{AppState, SharedState, now_millis, race::RaceState, sessions::ClientSession},
};

/// Running application: shared state plus the background workers it feeds.
pub struct Runtime {
    /// Shared state handed to the HTTP layer.
    pub state: SharedState,
    /// Persistence worker; ends once every handle is dropped.
    pub persistence_worker: JoinHandle<()>,
    /// Results worker; ends once every handle is dropped.
    pub results_worker: JoinHandle<()>,
}

/// Build the store and publisher selected by `config`, then [`start`].
pub async fn bootstrap(config: &AppConfig) -> Runtime {
    let store = race_store::from_config(&config.storage);
    let publisher: Arc<dyn ResultsPublisher> =
        Arc::new(HtmlResultsPublisher::new(config.results.clone()));
    start(store, publisher, config.race.clone()).await
}

/// Load the persisted state (or create the default one) and spawn the workers.
pub async fn start(
    store: Arc<dyn RaceStore>,
    publisher: Arc<dyn ResultsPublisher>,
    rules: RaceRules,
) -> Runtime {
    let (initial, needs_save) = load_initial_state(store.as_ref(), &rules).await;
    let (persistence, persistence_worker) = PersistenceHandle::spawn(store.clone());
    let (results, results_worker) = ResultsHandle::spawn(publisher);

    if needs_save {
        persistence.save(Arc::new(initial.clone()));
    }

    info!(
        races = initial.races.len(),
        current_race_id = ?initial.current_race_id,
        "race state ready"
    );
    let state = AppState::new(initial, store, persistence, results, rules);
    Runtime {
        state,
        persistence_worker,
        results_worker,
    }
}

/// Returns the state to serve and whether it must be written back immediately.
async fn load_initial_state(store: &dyn RaceStore, rules: &RaceRules) -> (RaceState, bool) {
    match store.load().await {
        Ok(Some(mut state)) => {
            state.repair();
            info!(races = state.races.len(), "loaded persisted race state");
            (state, false)
        }
        Ok(None) => {
            info!("no persisted race state; creating the default race");
            (RaceState::with_default_race(rules.default_max_laps), true)
        }
        Err(err) => {
            warn!(error = %err, "failed to load race state; starting from the default race");
            (RaceState::with_default_race(rules.default_max_laps), true)
        }
    }
}

/// Apply one client command. Accepted commands are persisted and broadcast in order;
/// rejected ones leave the state untouched and notify nobody.
pub async fn dispatch(
    state: &SharedState,
    command: ClientCommand,
) -> Result<Effect, CommandRejected> {
    let kind = command.kind();
    let mut races = state.lock_races().await;
    let ctx = CommandContext {
        now: now_millis(),
        rules: state.rules(),
    };

    let effect = commands::apply(&mut races, command, &ctx)?;
    let snapshot = Arc::new(races.clone());
    state.notify_state_changed(&snapshot);

    if let Effect::RaceFinished(race) = &effect {
        state.results().submit(race.clone());
    }
    drop(races);

    debug!(command = kind, "command applied");
    Ok(effect)
}

/// Register a client and queue the current snapshot as its first message.
pub async fn connect_client(state: &SharedState, tx: mpsc::UnboundedSender<Message>) -> Uuid {
    let id = Uuid::new_v4();
    let races = state.lock_races().await;
    state.sessions().register(ClientSession { id, tx });
    if !state.sessions().send_state(&id, &races) {
        debug!(session_id = %id, "client closed before the initial snapshot");
    }
    drop(races);

    info!(session_id = %id, clients = state.sessions().len(), "client connected");
    id
}

/// Forget a client; its queued messages are dropped.
pub fn disconnect_client(state: &SharedState, id: &Uuid) {
    if state.sessions().remove(id) {
        info!(session_id = %id, clients = state.sessions().len(), "client disconnected");
    }
}

/// Write the current state and wait for the write to finish.
pub async fn flush(state: &SharedState) -> Result<(), ServiceError> {
    // Queue under the lock so no later mutation can be saved before this snapshot.
    let pending = {
        let races = state.lock_races().await;
        state.persistence().flush(Arc::new(races.clone()))
    };
    pending.await
}
