use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kvorum_client_core::session::KeyValueStore;

pub const ENV_TOKEN_STORE: &str = "KVORUM_TOKEN_STORE";
const DEFAULT_STORE_FILE: &str = ".kvorum-session.json";
#[cfg(unix)]
const STORE_FILE_MODE: u32 = 0o600;

/// Key-value store persisted as one JSON object. Every call rereads the
/// file, so two CLI invocations never see stale state.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$HOME/.kvorum-session.json`, or the working directory without a home.
    pub fn default_path() -> PathBuf {
        std::env::var_os("HOME")
            .filter(|home| !home.is_empty())
            .map_or_else(PathBuf::new, PathBuf::from)
            .join(DEFAULT_STORE_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to read {}", self.path.display()));
            }
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))
    }

    fn write_entries(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if entries.is_empty() {
            return match fs::remove_file(&self.path) {
                Err(error) if error.kind() != ErrorKind::NotFound => Err(error)
                    .with_context(|| format!("failed to remove {}", self.path.display())),
                _ => Ok(()),
            };
        }
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let encoded = serde_json::to_string_pretty(entries)?;
        write_owner_only(&self.path, encoded.as_bytes())
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

/// Writes `contents` readable by the owner alone, tightening a file that
/// already exists with wider permissions.
fn write_owner_only(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(STORE_FILE_MODE);
    }
    let mut file = options.open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(STORE_FILE_MODE))?;
    }
    file.write_all(contents)?;
    file.flush()
}

impl KeyValueStore for FileStore {
    type Error = anyhow::Error;

    fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        Ok(self.read_entries()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Self::Error> {
        let mut entries = self.read_entries()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_entries(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), Self::Error> {
        let mut entries = self.read_entries()?;
        if entries.remove(key).is_some() {
            self.write_entries(&entries)?;
        }
        Ok(())
    }
}
