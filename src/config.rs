//! Application-level configuration loading: listen address, storage, results output and race defaults.

use std::{env, fs, io::ErrorKind, net::IpAddr, path::PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::race::DEFAULT_MAX_LAPS;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "RACE_TIMING_CONFIG_PATH";
const DEFAULT_PORT: u16 = 8765;
const DEFAULT_DATA_FILE: &str = "race_data.json";
const DEFAULT_RESULTS_FILE: &str = "results.html";
const DEFAULT_STATIC_DIR: &str = "dist";
const DEFAULT_RIDER_CLASS: &str = "Cross";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Listen address.
    pub server: ServerConfig,
    /// Where the race state is persisted.
    pub storage: StorageConfig,
    /// Where finished races are published.
    pub results: ResultsConfig,
    /// Defaults applied by the command handlers.
    pub race: RaceRules,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Address the HTTP/WebSocket server binds to.
pub struct ServerConfig {
    /// Interface to bind, all interfaces by default so phones on the LAN can connect.
    pub host: IpAddr,
    /// TCP port.
    pub port: u16,
    /// Built operator/viewer web app served on the same port, `None` to disable.
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Selects the [`crate::dao::race_store::RaceStore`] implementation.
pub enum StorageBackend {
    /// Single JSON document on disk.
    File,
    /// Process memory only, nothing survives a restart.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Persistence settings.
pub struct StorageConfig {
    /// Backend used for the race state document.
    pub backend: StorageBackend,
    /// Path of the JSON document for the file backend.
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Results document settings.
pub struct ResultsConfig {
    /// Cumulative HTML document finished races are appended to.
    pub document_path: PathBuf,
    /// Optional copy of the document in a publicly served directory.
    pub mirror_path: Option<PathBuf>,
    /// Optional program plus arguments run after each update (e.g. a git push script).
    pub publish_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Defaults used when a command leaves a value out.
pub struct RaceRules {
    /// Class given to riders added without one.
    pub default_class: String,
    /// Lap cap of newly created races.
    pub default_max_laps: u32,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to baked-in defaults, then apply
    /// environment overrides.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let raw = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    info!(path = %path.display(), "loaded configuration file");
                    raw
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    RawConfig::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                RawConfig::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                RawConfig::default()
            }
        };

        let mut config: Self = raw.into();
        config.apply_env_overrides(|key| env::var(key).ok());
        config
    }

    /// Apply `PORT`/`SERVER_PORT`, `RACE_DATA_FILE`, `RESULTS_FILE` and `STATIC_DIR` overrides.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("PORT")
            .or_else(|| lookup("SERVER_PORT"))
            .and_then(|value| value.parse::<u16>().ok())
        {
            self.server.port = port;
        }
        if let Some(path) = lookup("RACE_DATA_FILE").filter(|value| !value.is_empty()) {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(path) = lookup("RESULTS_FILE").filter(|value| !value.is_empty()) {
            self.results.document_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("STATIC_DIR").filter(|value| !value.is_empty()) {
            self.server.static_dir = Some(PathBuf::from(path));
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

impl Default for RaceRules {
    fn default() -> Self {
        Self {
            default_class: DEFAULT_RIDER_CLASS.into(),
            default_max_laps: DEFAULT_MAX_LAPS,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    server: RawServer,
    storage: RawStorage,
    results: RawResults,
    race: RawRace,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawServer {
    host: Option<IpAddr>,
    port: Option<u16>,
    serve_static: Option<bool>,
    static_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStorage {
    backend: Option<StorageBackend>,
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawResults {
    document_path: Option<PathBuf>,
    mirror_path: Option<PathBuf>,
    publish_command: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRace {
    default_class: Option<String>,
    default_max_laps: Option<u32>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            server: ServerConfig {
                host: value.server.host.unwrap_or(IpAddr::from([0, 0, 0, 0])),
                port: value.server.port.unwrap_or(DEFAULT_PORT),
                static_dir: match value.server.serve_static {
                    Some(false) => None,
                    _ => Some(
                        value
                            .server
                            .static_dir
                            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR)),
                    ),
                },
            },
            storage: StorageConfig {
                backend: value.storage.backend.unwrap_or(StorageBackend::File),
                path: value
                    .storage
                    .path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_FILE)),
            },
            results: ResultsConfig {
                document_path: value
                    .results
                    .document_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_RESULTS_FILE)),
                mirror_path: value.results.mirror_path,
                publish_command: value
                    .results
                    .publish_command
                    .filter(|command| !command.is_empty()),
            },
            race: RaceRules {
                default_class: value
                    .race
                    .default_class
                    .map(|class| class.trim().to_string())
                    .filter(|class| !class.is_empty())
                    .unwrap_or_else(|| DEFAULT_RIDER_CLASS.into()),
                default_max_laps: value.race.default_max_laps.unwrap_or(DEFAULT_MAX_LAPS),
            },
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
