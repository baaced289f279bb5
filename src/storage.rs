use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const SETTINGS_KEY: &str = "openscans-settings";
pub const RECENT_STUDIES_KEY: &str = "openscans-recent-studies";
pub const FAVORITES_KEY: &str = "openscans-favorites";

/// Key-value JSON store, one `<key>.json` file per key.
#[derive(Debug, Clone)]
pub struct Storage {
    dir: Option<PathBuf>,
}

impl Storage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// Store rooted in the per-user config directory, or in
    /// `OPENSCANS_CONFIG_DIR` when that is set.
    pub fn user() -> Self {
        match env::var_os("OPENSCANS_CONFIG_DIR").filter(|value| !value.is_empty()) {
            Some(dir) => Self::new(dir),
            None => Self {
                dir: config_dir_path(),
            },
        }
    }

    /// Store that never touches disk.
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    fn path_for(&self, key: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(format!("{key}.json")))
    }

    /// Missing or unreadable values load as `None`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key)?;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                log::warn!("Could not read {}: {err}", path.display());
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(err) => {
                log::warn!("Ignoring corrupt {}: {err}", path.display());
                None
            }
        }
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let Some(path) = self.path_for(key) else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Could not create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(value)
            .with_context(|| format!("Could not serialize {key}"))?;
        write_atomically(&path, json.as_bytes())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let Some(path) = self.path_for(key) else {
            return Ok(());
        };
        match fs::remove_file(&path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                Err(err).with_context(|| format!("Could not remove {}", path.display()))
            }
            _ => Ok(()),
        }
    }
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents).with_context(|| format!("Could not write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Could not replace {}", path.display()))
}

fn config_dir_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        return env::var_os("APPDATA")
            .map(PathBuf::from)
            .map(|base| base.join("openscans"));
    }

    #[cfg(target_os = "macos")]
    {
        return env::var_os("HOME").map(PathBuf::from).map(|home| {
            home.join("Library")
                .join("Application Support")
                .join("openscans")
        });
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        if let Some(xdg) = env::var_os("XDG_CONFIG_HOME").filter(|value| !value.is_empty()) {
            return Some(PathBuf::from(xdg).join("openscans"));
        }
        env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join(".config").join("openscans"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().expect("temp dir");
        let storage = Storage::new(dir.path().join("nested"));
        let sample = Sample {
            name: "T1 SAG".to_string(),
            count: 3,
        };

        storage.save("sample", &sample).expect("save");
        assert_eq!(storage.load::<Sample>("sample"), Some(sample));
        assert!(dir.path().join("nested").join("sample.json").exists());
    }

    #[test]
    fn missing_and_corrupt_values_load_as_none() {
        let dir = tempfile::tempdir().expect("temp dir");
        let storage = Storage::new(dir.path());
        assert_eq!(storage.load::<Sample>("absent"), None);

        fs::write(dir.path().join("broken.json"), "{ not json").expect("write");
        assert_eq!(storage.load::<Sample>("broken"), None);
    }

    #[test]
    fn remove_is_quiet_for_missing_keys() {
        let dir = tempfile::tempdir().expect("temp dir");
        let storage = Storage::new(dir.path());
        storage.save("k", &1u32).expect("save");
        storage.remove("k").expect("remove");
        storage.remove("k").expect("second remove");
        assert_eq!(storage.load::<u32>("k"), None);
    }

    #[test]
    fn disabled_storage_is_a_no_op() {
        let storage = Storage::disabled();
        storage.save("k", &1u32).expect("save");
        assert_eq!(storage.load::<u32>("k"), None);
    }
}
