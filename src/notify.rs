use std::path::Path;

use crate::engine::ScriptConfigurationEngine;
use crate::script::ScriptId;

/// Receives document and editor events from the host and pushes the
/// resulting invalidations into the engine.
#[derive(Clone)]
pub struct ChangeNotifier {
    engine: ScriptConfigurationEngine,
}

impl ChangeNotifier {
    pub fn new(engine: ScriptConfigurationEngine) -> Self {
        Self { engine }
    }

    /// The document layer reports a change to a file's contents.
    pub fn document_changed(&self, path: &Path) {
        self.engine.invalidate(&ScriptId::new(path));
    }

    /// An editor for the file gained focus: make sure the suggestion shown
    /// to the user (if any) is up to date.
    pub fn editor_focused(&self, path: &Path) {
        self.engine.ensure_up_to_date_suggested(&ScriptId::new(path));
    }
}
