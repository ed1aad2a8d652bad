use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::host::DocumentStore;
use crate::script::ScriptId;

/// Fingerprint of one transitive input (an `import:` target).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStamp {
    pub path: PathBuf,
    /// Last-modified time at capture; `None` if the file could not be statted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<Timestamp>,
}

/// Value summarizing the load-affecting state of a script at a moment in
/// time: a digest of its text plus a fingerprint per transitive input.
///
/// Equality means "the same inputs seen again". [`InputsStamp::is_up_to_date`]
/// is stronger: it queries the live document and disk state and may fail even
/// when a captured snapshot would compare equal (an import changed underneath).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputsStamp {
    content_hash: String,
    #[serde(default)]
    imports: Vec<ImportStamp>,
}

impl InputsStamp {
    /// Capture a stamp for the given script text and its import targets.
    pub fn capture(text: &str, imports: &[PathBuf]) -> Self {
        Self {
            content_hash: text_hash(text),
            imports: imports
                .iter()
                .map(|path| ImportStamp {
                    path: path.clone(),
                    modified: file_modified(path),
                })
                .collect(),
        }
    }

    /// Whether the stamp still describes the live state of the script: the
    /// document text hashes to the same digest and every import is unchanged
    /// on disk. A vanished script is out of date; an import that appears,
    /// disappears, or changes its modification time invalidates the stamp.
    pub fn is_up_to_date(&self, files: &dyn DocumentStore, id: &ScriptId) -> bool {
        let Some(text) = files.read(id) else {
            return false;
        };
        if text_hash(&text) != self.content_hash {
            return false;
        }
        self.imports
            .iter()
            .all(|import| file_modified(&import.path) == import.modified)
    }
}

/// SHA-256 hex digest of the script text.
fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn file_modified(path: &Path) -> Option<Timestamp> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Timestamp::try_from(modified).ok()
}
