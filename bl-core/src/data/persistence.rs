//! JSON persistence for controller settings
//!
//! Every controller's settings live in one versioned `controllers.json`. The
//! daemon builds its controllers from this file at startup and each controller
//! writes its own entry back after a settings change and at shutdown.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants::paths;
use crate::data::types::{ChannelSettings, HysteresisThresholds, Mode, TempScale};
use crate::error::{BrewloopError, Result};

/// Current on-disk format version
const STORE_VERSION: u32 = 1;

/// Settings of one controller as written to disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedController {
    pub name: String,
    /// 1-Wire device id (e.g. `28-0000055a1b2c`) or an absolute path to a `w1_slave` file
    #[serde(default)]
    pub probe: String,
    #[serde(default)]
    pub scale: TempScale,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub setpoint: f64,
    /// Manual-mode duty cycle
    #[serde(default)]
    pub duty: f64,
    #[serde(default)]
    pub manual_cycle: f64,
    #[serde(default)]
    pub heat: ChannelSettings,
    #[serde(default)]
    pub cool: ChannelSettings,
    #[serde(default)]
    pub hysteresis: HysteresisThresholds,
    #[serde(default)]
    pub aux_gpio: Option<String>,
    #[serde(default)]
    pub invert_aux: bool,
    #[serde(default)]
    pub updated_at: u64,
}

/// Collection of all persisted controllers
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ControllerStore {
    pub version: u32,
    pub controllers: BTreeMap<String, PersistedController>,
}

impl ControllerStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            version: STORE_VERSION,
            controllers: BTreeMap::new(),
        }
    }

    /// Add or replace a controller entry
    pub fn upsert(&mut self, mut controller: PersistedController) {
        controller.updated_at = current_timestamp();
        self.controllers.insert(controller.name.clone(), controller);
    }

    pub fn get(&self, name: &str) -> Option<&PersistedController> {
        self.controllers.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<PersistedController> {
        self.controllers.remove(name)
    }

    pub fn all(&self) -> impl Iterator<Item = &PersistedController> {
        self.controllers.values()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }
}

/// Persistence capability handed to each controller
#[cfg_attr(test, mockall::automock)]
pub trait SettingsStore: Send + Sync {
    /// Write one controller's settings
    fn save(&self, controller: &PersistedController) -> Result<()>;
}

/// `SettingsStore` backed by a JSON file
#[derive(Debug)]
pub struct JsonSettingsStore {
    path: PathBuf,
    /// Serializes load-modify-write cycles between controllers in this process
    write_lock: Mutex<()>,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store at `<dir>/controllers.json`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(paths::CONTROLLERS_FILE))
    }

    /// Store in the resolved configuration directory
    pub fn default_location() -> Self {
        Self::in_dir(paths::config_dir())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the store; a missing file yields an empty store
    pub fn load(&self) -> Result<ControllerStore> {
        load_store(&self.path)
    }

    /// Remove a controller entry
    pub fn delete(&self, name: &str) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let mut store = load_store(&self.path)?;
        let removed = store.remove(name).is_some();
        if removed {
            write_store(&self.path, &store)?;
            info!("Deleted controller {}", name);
        }
        Ok(removed)
    }
}

impl SettingsStore for JsonSettingsStore {
    /// Fails without writing when the existing file cannot be read, so the
    /// other controllers' entries are never replaced by this one alone
    fn save(&self, controller: &PersistedController) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut store = load_store(&self.path)?;
        store.upsert(controller.clone());
        write_store(&self.path, &store)
    }
}

fn load_store(path: &Path) -> Result<ControllerStore> {
    if !path.exists() {
        debug!("No controller file found at {:?}, returning empty store", path);
        return Ok(ControllerStore::new());
    }

    let contents = fs::read_to_string(path).map_err(|e| BrewloopError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut store: ControllerStore = serde_json::from_str(&contents)?;

    // Entries keyed by a stale name would be saved twice under different keys
    let misfiled: Vec<String> = store
        .controllers
        .iter()
        .filter(|(key, c)| **key != c.name)
        .map(|(key, _)| key.clone())
        .collect();
    for key in misfiled {
        if let Some(mut controller) = store.controllers.remove(&key) {
            if controller.name.is_empty() {
                controller.name = key;
            }
            store.controllers.insert(controller.name.clone(), controller);
        }
    }

    info!("Loaded {} controllers from {:?}", store.len(), path);
    Ok(store)
}

fn write_store(path: &Path, store: &ControllerStore) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(store)?;

    // Atomic write - write to temp file then rename
    let temp_path = path.with_extension("json.tmp");
    let write_err = |p: &Path| {
        let p = p.to_path_buf();
        move |e| BrewloopError::FileWrite { path: p, source: e }
    };

    let mut file = fs::File::create(&temp_path).map_err(write_err(&temp_path))?;
    file.write_all(json.as_bytes()).map_err(write_err(&temp_path))?;
    file.sync_all().map_err(write_err(&temp_path))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(write_err(path))?;

    debug!("Saved {} controllers to {:?}", store.len(), path);
    Ok(())
}

fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
