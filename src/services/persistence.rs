//! Ordered, non-blocking persistence of race state snapshots.
//!
//! The coordinator queues every new snapshot here instead of awaiting disk I/O. A single
//! worker drains the queue in order, so an older state is never written after a newer one.

use std::{future::Future, sync::Arc};

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    dao::{race_store::RaceStore, storage::StorageResult},
    error::ServiceError,
    state::{StateListener, race::RaceState},
};

enum PersistRequest {
    Save(Arc<RaceState>),
    Flush {
        state: Arc<RaceState>,
        done: oneshot::Sender<StorageResult<()>>,
    },
}

/// Sending side of the persistence worker.
#[derive(Clone)]
pub struct PersistenceHandle {
    tx: mpsc::UnboundedSender<PersistRequest>,
}

impl PersistenceHandle {
    /// Spawn the worker task writing into `store`.
    pub fn spawn(store: Arc<dyn RaceStore>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run(store, rx));
        (Self { tx }, worker)
    }

    /// Queue a snapshot for saving without waiting for the write.
    pub fn save(&self, state: Arc<RaceState>) {
        if self.tx.send(PersistRequest::Save(state)).is_err() {
            warn!("persistence worker stopped; snapshot not saved");
        }
    }

    /// Queue a snapshot now and return a future resolving once it has been written.
    pub fn flush(
        &self,
        state: Arc<RaceState>,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send + 'static {
        let (done, result) = oneshot::channel();
        let queued = self.tx.send(PersistRequest::Flush { state, done }).is_ok();
        async move {
            if !queued {
                return Err(ServiceError::PersistenceStopped);
            }
            result
                .await
                .map_err(|_| ServiceError::PersistenceStopped)?
                .map_err(ServiceError::from)
        }
    }
}

impl StateListener for PersistenceHandle {
    fn state_changed(&self, state: &Arc<RaceState>) {
        self.save(state.clone());
    }
}

async fn run(store: Arc<dyn RaceStore>, mut rx: mpsc::UnboundedReceiver<PersistRequest>) {
    while let Some(request) = rx.recv().await {
        // Only the newest queued snapshot matters; stop early at a flush so it is answered.
        let mut latest = request;
        while matches!(latest, PersistRequest::Save(_)) {
            match rx.try_recv() {
                Ok(next) => latest = next,
                Err(_) => break,
            }
        }

        match latest {
            PersistRequest::Save(state) => match store.save(state).await {
                Ok(()) => debug!("race state saved"),
                Err(err) => warn!(error = %err, "failed to save race state; keeping in-memory state"),
            },
            PersistRequest::Flush { state, done } => {
                let result = store.save(state).await;
                match &result {
                    Ok(()) => info!("race state flushed"),
                    Err(err) => warn!(error = %err, "failed to flush race state"),
                }
                let _ = done.send(result);
            }
        }
    }
    debug!("persistence worker stopped");
}
