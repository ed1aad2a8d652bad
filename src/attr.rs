use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::script::{ScriptConfiguration, ScriptId};
use crate::stamp::InputsStamp;

/// Persisted per-script configurations under the user cache directory.
///
/// This is loader state, not engine state: the engine never reads it
/// directly. The directive loader writes an entry after every successful
/// resolve; the attribute-cache loader trusts an entry whose stamp is still
/// up to date and applies it without re-resolving.
pub struct AttributeStore {
    dir: PathBuf,
}

/// Default store location for this user. `SCL_CACHE_DIR` overrides the base
/// directory (useful for sandboxed environments and tests).
pub fn default_dir() -> Option<PathBuf> {
    if let Ok(base) = std::env::var("SCL_CACHE_DIR") {
        return Some(PathBuf::from(base).join("attributes"));
    }
    dirs::cache_dir().map(|d| d.join("scl").join("attributes"))
}

/// SHA-256 hex digest of a script path, used as entry key.
fn path_hash(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One on-disk entry (internal format).
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StoredAttribute {
    path: String,
    saved_at: String,
    inputs: InputsStamp,
    configuration: ScriptConfiguration,
}

/// Information about a single stored entry.
#[derive(Debug)]
pub struct AttributeInfo {
    /// The script path the entry was saved for.
    pub path: String,
    /// ISO 8601 timestamp of when the entry was saved.
    pub saved_at: String,
    /// Size of the entry file in bytes.
    pub size: u64,
}

/// Result of listing stored entries.
pub struct AttributeListResult {
    /// Successfully read entries, sorted by script path.
    pub entries: Vec<AttributeInfo>,
    /// Number of entry files that could not be read or parsed.
    pub skipped: usize,
}

/// Result of clearing the store.
#[derive(Debug)]
pub enum AttributeClearResult {
    /// Store was cleared successfully.
    Cleared,
    /// Store directory did not exist (already empty).
    AlreadyEmpty,
}

impl AttributeStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Read the stored configuration for a script, if any. Corrupt or
    /// unreadable entries read as absent; the store is advisory.
    pub fn get(&self, id: &ScriptId) -> Option<(InputsStamp, ScriptConfiguration)> {
        let entry_path = self.dir.join(format!("{}.json", path_hash(id.path())));
        let content = fs::read_to_string(&entry_path).ok()?;
        let stored: StoredAttribute = serde_json::from_str(&content).ok()?;
        Some((stored.inputs, stored.configuration))
    }

    /// Persist the configuration for a script, overwriting any prior entry.
    ///
    /// Refuses to follow symlinks (consistent with [`AttributeStore::clear`]).
    pub fn put(
        &self,
        id: &ScriptId,
        inputs: &InputsStamp,
        configuration: &ScriptConfiguration,
    ) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.dir)?;
        let entry_path = self.dir.join(format!("{}.json", path_hash(id.path())));

        if let Ok(m) = fs::symlink_metadata(&entry_path)
            && m.file_type().is_symlink()
        {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "attribute entry is a symlink; refusing to write: {}",
                    entry_path.display()
                ),
            ));
        }

        let stored = StoredAttribute {
            path: id.path().to_string_lossy().into_owned(),
            saved_at: jiff::Timestamp::now().to_string(),
            inputs: inputs.clone(),
            configuration: configuration.clone(),
        };
        let json = serde_json::to_string_pretty(&stored).unwrap();
        fs::write(&entry_path, json)?;
        Ok(())
    }

    /// List all stored entries.
    ///
    /// Returns entries sorted by script path. Corrupt or unreadable entry
    /// files are counted in `skipped` rather than silently ignored.
    pub fn list(&self) -> Result<AttributeListResult, std::io::Error> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(AttributeListResult {
                    entries: vec![],
                    skipped: 0,
                });
            }
            Err(e) => return Err(e),
        };

        let mut infos: Vec<AttributeInfo> = Vec::new();
        let mut skipped: usize = 0;

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let content = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };
            let stored: StoredAttribute = match serde_json::from_str(&content) {
                Ok(s) => s,
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };

            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

            infos.push(AttributeInfo {
                path: stored.path,
                saved_at: stored.saved_at,
                size,
            });
        }

        infos.sort_unstable_by(|a, b| a.path.cmp(&b.path));

        Ok(AttributeListResult {
            entries: infos,
            skipped,
        })
    }

    /// Clear all stored entries.
    ///
    /// Refuses to operate if the store directory is a symlink.
    pub fn clear(&self) -> Result<AttributeClearResult, std::io::Error> {
        match fs::symlink_metadata(&self.dir) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "attribute store directory is a symlink; refusing to clear",
                ));
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(AttributeClearResult::AlreadyEmpty);
            }
            Err(e) => return Err(e),
        }

        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(AttributeClearResult::Cleared),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(AttributeClearResult::AlreadyEmpty)
            }
            Err(e) => Err(e),
        }
    }
}
