//! Persisted named string slots (current assistant, thread and run).

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use tracing::debug;

use crate::error::RunError;

const STATE_FILE_VERSION: u32 = 1;

/// The slots a run reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display)]
pub enum StateKey {
    #[strum(serialize = "currentAssistant")]
    CurrentAssistant,
    #[strum(serialize = "currentThread")]
    CurrentThread,
    #[strum(serialize = "currentRun")]
    CurrentRun,
}

/// Storage abstraction for small string values.
///
/// A missing key is `Ok(None)`, never an error.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, RunError>;
    fn put(&self, key: &str, value: &str) -> Result<(), RunError>;
}

/// File-backed store keeping every slot in one TOML file.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StateFile, RunError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StateFile::default())
            }
            Err(err) => return Err(RunError::State(format!("{}: {err}", self.path.display()))),
        };
        toml::from_str(&raw)
            .map_err(|e| RunError::State(format!("{}: {e}", self.path.display())))
    }

    fn save(&self, mut file: StateFile) -> Result<(), RunError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        file.version = STATE_FILE_VERSION;
        file.saved_at = Some(Utc::now());
        let serialized =
            toml::to_string(&file).map_err(|e| RunError::State(e.to_string()))?;
        fs::write(&self.path, serialized)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &str) -> Result<Option<String>, RunError> {
        Ok(self.load()?.values.remove(key))
    }

    fn put(&self, key: &str, value: &str) -> Result<(), RunError> {
        let mut file = self.load()?;
        file.values.insert(key.to_string(), value.to_string());
        self.save(file)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    values: BTreeMap<String, String>,
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<String>, RunError> {
        let values = self
            .values
            .lock()
            .map_err(|_| RunError::State("state lock poisoned".into()))?;
        Ok(values.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), RunError> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| RunError::State("state lock poisoned".into()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Typed access to the application's slots.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn StateStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, key: StateKey) -> Result<Option<String>, RunError> {
        Ok(self.store.get(key.as_ref())?.filter(|v| !v.is_empty()))
    }

    pub fn put(&self, key: StateKey, value: &str) -> Result<(), RunError> {
        debug!(key = key.as_ref(), value, "persisting state");
        self.store.put(key.as_ref(), value)
    }

    /// The selected assistant; unset is a configuration error.
    pub fn current_assistant(&self) -> Result<String, RunError> {
        self.get(StateKey::CurrentAssistant)?
            .ok_or_else(|| RunError::Configuration("no current assistant".to_string()))
    }

    /// The current thread; unset is a configuration error.
    pub fn current_thread(&self) -> Result<String, RunError> {
        self.get(StateKey::CurrentThread)?
            .ok_or_else(|| RunError::Configuration("no current thread".to_string()))
    }

    /// The current run; unset is a configuration error.
    pub fn current_run(&self) -> Result<String, RunError> {
        self.get(StateKey::CurrentRun)?
            .ok_or_else(|| RunError::Configuration("no current run".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, FileStateStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path().join("nested").join("state.toml"));
        (dir, store)
    }

    #[test]
    fn missing_key_is_not_found_not_error() {
        let (_dir, store) = temp_store();
        assert_eq!(store.get("currentThread").unwrap(), None);
    }

    #[test]
    fn values_round_trip_and_persist_across_instances() {
        let (_dir, store) = temp_store();
        store.put("currentThread", "thread_1").unwrap();
        store.put("currentRun", "run_1").unwrap();
        store.put("currentThread", "thread_2").unwrap();

        let reopened = FileStateStore::new(store.path());
        assert_eq!(reopened.get("currentThread").unwrap().as_deref(), Some("thread_2"));
        assert_eq!(reopened.get("currentRun").unwrap().as_deref(), Some("run_1"));
    }

    #[cfg(unix)]
    #[test]
    fn state_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, store) = temp_store();
        store.put("currentAssistant", "asst_1").unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn corrupt_file_is_a_state_error() {
        let (_dir, store) = temp_store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "values = [not toml").unwrap();
        assert!(matches!(store.get("currentRun"), Err(RunError::State(_))));
    }

    #[test]
    fn state_keys_use_camel_case_names() {
        assert_eq!(StateKey::CurrentAssistant.as_ref(), "currentAssistant");
        assert_eq!(StateKey::CurrentThread.to_string(), "currentThread");
        assert_eq!(StateKey::CurrentRun.as_ref(), "currentRun");
    }

    #[test]
    fn app_state_reports_unset_assistant() {
        let state = AppState::new(Arc::new(MemoryStateStore::new()));
        let err = state.current_assistant().unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: no current assistant");

        state.put(StateKey::CurrentAssistant, "asst_1").unwrap();
        assert_eq!(state.current_assistant().unwrap(), "asst_1");
        assert_eq!(state.get(StateKey::CurrentRun).unwrap(), None);
    }
}
