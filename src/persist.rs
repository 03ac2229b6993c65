//! JSON file mirroring for the in-process stores.
//!
//! Stores keep their state in memory and write the whole state back after
//! every mutation. A missing file means first run; an unparsable one is
//! moved aside to `<file>.corrupt` before starting empty.

use log::{error, info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::PathBuf;

/// A JSON document on disk holding one store's full state.
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn corrupt_path(&self) -> PathBuf {
        let mut path = self.path.clone().into_os_string();
        path.push(".corrupt");
        PathBuf::from(path)
    }

    /// Load the stored state, falling back to the default when absent or unreadable.
    pub fn load<T: DeserializeOwned + Default>(&self) -> T {
        match fs::read(&self.path) {
            Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
                Ok(state) => {
                    info!("Loaded {:?}", self.path);
                    state
                }
                Err(e) => {
                    let aside = self.corrupt_path();
                    warn!("Failed to parse {:?}: {}, moving it to {:?}", self.path, e, aside);
                    if let Err(e) = fs::rename(&self.path, &aside) {
                        error!("Failed to move {:?} aside: {}", self.path, e);
                    }
                    T::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No state found at {:?} (first run)", self.path);
                T::default()
            }
            Err(e) => {
                error!("Failed to read {:?}: {}", self.path, e);
                T::default()
            }
        }
    }

    pub fn save<T: Serialize>(&self, state: &T) -> Result<(), std::io::Error> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(state)?;
        fs::write(&self.path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let file = JsonFile::new(dir.path().join("absent.json"));
        let state: BTreeMap<String, u32> = file.load();
        assert!(state.is_empty());
    }

    #[test]
    fn test_save_creates_parent_and_reloads() {
        let dir = TempDir::new().unwrap();
        let file = JsonFile::new(dir.path().join("nested/state.json"));
        let mut state = BTreeMap::new();
        state.insert("GPIO4".to_string(), 7u32);
        file.save(&state).unwrap();

        let loaded: BTreeMap<String, u32> = file.load();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_corrupt_file_is_moved_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{not json").unwrap();
        let file = JsonFile::new(&path);
        let state: BTreeMap<String, u32> = file.load();
        assert!(state.is_empty());
        assert!(!path.exists());
        assert_eq!(
            fs::read(dir.path().join("state.json.corrupt")).unwrap(),
            b"{not json"
        );

        // Next save starts a fresh file and leaves the old content alone
        file.save(&BTreeMap::from([("GPIO4".to_string(), 7u32)])).unwrap();
        assert!(path.exists());
        assert!(dir.path().join("state.json.corrupt").exists());
    }
}
