use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::diagnostic::ScriptDiagnostic;
use crate::stamp::InputsStamp;

/// Identity of a tracked script file. Stable across edits of its contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptId(Arc<PathBuf>);

impl ScriptId {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(Arc::new(path.into()))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl std::fmt::Display for ScriptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// A script definition: the kind of script a file is, as matched by the
/// project config. Determines whether its configuration is resolved on the
/// caller thread or on the background worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDefinition {
    /// Display name, e.g. "build-script".
    pub name: String,
    /// Resolve on the background worker rather than the caller thread.
    pub background: bool,
}

impl ScriptDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            background: true,
        }
    }
}

/// The compile configuration derived for a script. Opaque to the engine
/// beyond equality; consumed by downstream analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptConfiguration {
    /// Dependency roots (libraries/archives) to put on the compile path.
    #[serde(default)]
    pub dependency_roots: Vec<PathBuf>,
    /// Additional source roots.
    #[serde(default)]
    pub source_roots: Vec<PathBuf>,
    /// Compiler options passed through verbatim.
    #[serde(default)]
    pub compiler_options: Vec<String>,
}

impl ScriptConfiguration {
    /// All roots that require indexing once this configuration is applied.
    pub fn roots(&self) -> impl Iterator<Item = &Path> {
        self.dependency_roots
            .iter()
            .chain(self.source_roots.iter())
            .map(PathBuf::as_path)
    }
}

/// Outcome of one loader run. A missing configuration is a valid outcome
/// (reports only) and never overwrites a previously applied one.
#[derive(Debug, Clone)]
pub struct LoadedConfiguration {
    pub inputs: InputsStamp,
    pub configuration: Option<ScriptConfiguration>,
    pub reports: Vec<ScriptDiagnostic>,
}

impl LoadedConfiguration {
    pub fn new(inputs: InputsStamp, configuration: ScriptConfiguration) -> Self {
        Self {
            inputs,
            configuration: Some(configuration),
            reports: vec![],
        }
    }

    /// A load that produced diagnostics but no configuration.
    pub fn reports_only(inputs: InputsStamp, reports: Vec<ScriptDiagnostic>) -> Self {
        Self {
            inputs,
            configuration: None,
            reports,
        }
    }
}

/// A configuration that has been applied: visible to analysis, roots indexed.
#[derive(Debug, Clone)]
pub struct AppliedConfiguration {
    pub inputs: InputsStamp,
    pub configuration: ScriptConfiguration,
}
