//! Collaborator interfaces the engine consumes. The engine owns no UI, no
//! indexer, and no document storage; the embedding editor provides them.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::diagnostic::ScriptDiagnostic;
use crate::script::{ScriptDefinition, ScriptId};

/// Live script text, as the editor's document layer sees it.
pub trait DocumentStore: Send + Sync {
    /// Current text of the script; `None` if the file no longer exists.
    fn read(&self, id: &ScriptId) -> Option<String>;
}

/// Registry of script definitions. Definitions may become available late
/// (e.g. after project model load); the engine is a no-op until then.
pub trait DefinitionRegistry: Send + Sync {
    fn is_ready(&self) -> bool;

    /// The definition governing a script; `None` means the file is not a
    /// tracked script.
    fn find(&self, id: &ScriptId) -> Option<Arc<ScriptDefinition>>;
}

#[derive(Debug, Clone, Error)]
#[error("root indexing failed: {reason}")]
pub struct IndexError {
    pub reason: String,
}

/// The indexer behind the reindex transaction.
pub trait RootsIndexer: Send + Sync {
    /// Index the given roots. Called exactly once per reindex transaction,
    /// at outermost scope exit.
    fn index_roots(&self, roots: &[PathBuf]) -> Result<(), IndexError>;
}

/// Receives load diagnostics. The engine writes; other subsystems read.
pub trait ReportSink: Send + Sync {
    fn attach(&self, id: &ScriptId, reports: &[ScriptDiagnostic]);

    /// Request re-analysis of the script after an apply or a reports change.
    /// Fire-and-forget; must tolerate being called during engine shutdown.
    fn rehighlight(&self, id: &ScriptId);
}

/// The "new configuration available" affordance. The panel holds no
/// callbacks: acceptance and dismissal flow back through the engine
/// (`apply_pending` / `dismiss_pending`).
pub trait NotificationPanel: Send + Sync {
    fn show(&self, id: &ScriptId);
    fn hide(&self, id: &ScriptId);
    fn is_visible(&self, id: &ScriptId) -> bool;
}

/// User-level scripting settings.
pub trait ScriptingSettings: Send + Sync {
    /// Apply freshly loaded configurations without asking.
    fn auto_reload_enabled(&self) -> bool;
}
