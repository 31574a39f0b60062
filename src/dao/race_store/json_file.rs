use std::{io::ErrorKind, path::PathBuf, sync::Arc};

use futures::future::BoxFuture;
use tokio::fs;

use crate::{
    dao::{
        race_store::{RaceStore, StoreInfo},
        storage::{StorageError, StorageResult},
    },
    state::race::RaceState,
};

/// Stores the race state as one pretty-printed JSON document.
///
/// Writes go to a sibling temporary file first and are renamed over the document, so a
/// crash mid-write leaves the previous state readable.
#[derive(Debug, Clone)]
pub struct JsonFileRaceStore {
    path: Arc<PathBuf>,
}

impl JsonFileRaceStore {
    /// Store backed by the document at `path`.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path: Arc::new(path),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl RaceStore for JsonFileRaceStore {
    fn load(&self) -> BoxFuture<'static, StorageResult<Option<RaceState>>> {
        let path = self.path.clone();
        Box::pin(async move {
            let bytes = match fs::read(path.as_path()).await {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
                Err(err) => {
                    return Err(StorageError::unavailable(
                        format!("reading {}", path.display()),
                        err,
                    ));
                }
            };

            serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|err| StorageError::invalid(format!("decoding {}", path.display()), err))
        })
    }

    fn save(&self, state: Arc<RaceState>) -> BoxFuture<'static, StorageResult<()>> {
        let path = self.path.clone();
        let temp = self.temp_path();
        Box::pin(async move {
            let bytes = serde_json::to_vec_pretty(&*state)
                .map_err(|err| StorageError::invalid("encoding race state".into(), err))?;

            fs::write(&temp, bytes).await.map_err(|err| {
                StorageError::unavailable(format!("writing {}", temp.display()), err)
            })?;
            fs::rename(&temp, path.as_path()).await.map_err(|err| {
                StorageError::unavailable(format!("replacing {}", path.display()), err)
            })
        })
    }

    fn describe(&self) -> BoxFuture<'static, StorageResult<StoreInfo>> {
        let path = self.path.clone();
        Box::pin(async move {
            let location = path.display().to_string();
            match fs::metadata(path.as_path()).await {
                Ok(metadata) => Ok(StoreInfo {
                    location,
                    exists: true,
                    size_bytes: Some(metadata.len()),
                    last_modified: metadata.modified().ok(),
                }),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(StoreInfo {
                    location,
                    exists: false,
                    size_bytes: None,
                    last_modified: None,
                }),
                Err(err) => Err(StorageError::unavailable(
                    format!("inspecting {}", path.display()),
                    err,
                )),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::state::race::{DEFAULT_MAX_LAPS, Rider};

    fn store_in(dir: &TempDir) -> JsonFileRaceStore {
        JsonFileRaceStore::new(dir.path().join("race_data.json"))
    }

    #[tokio::test]
    async fn missing_document_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert!(store.load().await.unwrap().is_none());
        let info = store.describe().await.unwrap();
        assert!(!info.exists);
        assert!(info.location.ends_with("race_data.json"));
    }

    #[tokio::test]
    async fn saved_state_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let mut state = RaceState::with_default_race(DEFAULT_MAX_LAPS);
        let race = &mut state.races[0];
        race.classes.insert("Cross".into());
        let mut rider = Rider::new("r1".into(), "12".into(), "Smith".into(), "Cross".into());
        rider.record_lap(61_234, 1_700_000_061_234);
        rider.add_penalty();
        race.riders.push(rider);
        race.is_running = true;
        race.start_time = Some(1_700_000_000_000);
        race.update_current_lap();

        store.save(Arc::new(state.clone())).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();

        assert_eq!(loaded, state);
        let info = store.describe().await.unwrap();
        assert!(info.exists);
        assert!(info.size_bytes.unwrap() > 0);
        assert!(!dir.path().join("race_data.json.tmp").exists());
    }

    #[tokio::test]
    async fn structurally_invalid_documents_are_reported() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::write(dir.path().join("race_data.json"), r#"{"races": 3}"#).unwrap();

        assert!(matches!(
            store.load().await,
            Err(StorageError::Invalid { .. })
        ));
    }
}
