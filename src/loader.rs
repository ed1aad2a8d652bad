use std::path::PathBuf;
use std::sync::Arc;

use crate::attr::AttributeStore;
use crate::diagnostic::{ScriptDiagnostic, Severity};
use crate::host::DocumentStore;
use crate::resolve::{self, DirectiveKey};
use crate::script::{LoadedConfiguration, ScriptConfiguration, ScriptDefinition, ScriptId};
use crate::stamp::InputsStamp;

/// Receives load outcomes from a loader. Implemented by the engine.
pub trait LoadSink: Send + Sync {
    /// Route the result through the suggestion path: it becomes pending and
    /// the user is asked, unless policy auto-applies.
    fn suggest(&self, id: &ScriptId, loaded: LoadedConfiguration);

    /// Apply the result immediately, bypassing suggestion. For loaders whose
    /// source is already trusted (e.g. a persisted attribute).
    fn save(&self, id: &ScriptId, loaded: LoadedConfiguration);
}

/// The narrow capability a loader gets while loading.
pub struct LoadContext<'a> {
    sink: &'a dyn LoadSink,
    files: &'a dyn DocumentStore,
}

impl<'a> LoadContext<'a> {
    pub fn new(sink: &'a dyn LoadSink, files: &'a dyn DocumentStore) -> Self {
        Self { sink, files }
    }

    /// Live text of the script; `None` if it no longer exists.
    pub fn read(&self, id: &ScriptId) -> Option<String> {
        self.files.read(id)
    }

    pub fn files(&self) -> &dyn DocumentStore {
        self.files
    }

    pub fn suggest(&self, id: &ScriptId, loaded: LoadedConfiguration) {
        self.sink.suggest(id, loaded);
    }

    pub fn save(&self, id: &ScriptId, loaded: LoadedConfiguration) {
        self.sink.save(id, loaded);
    }
}

/// A pluggable configuration loading strategy. Loaders are tried in order;
/// the first one that handles a script stops the chain.
pub trait ConfigurationLoader: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this loader runs on the background worker for scripts of the
    /// given definition. Loaders that answer `false` run on the caller
    /// thread and may block it.
    fn runs_in_background(&self, definition: &ScriptDefinition) -> bool;

    /// Try to load a configuration. Returns `true` if this loader handled
    /// the script (whatever the outcome); the chain stops.
    fn load(
        &self,
        is_first_load: bool,
        id: &ScriptId,
        definition: &ScriptDefinition,
        ctx: &LoadContext<'_>,
    ) -> bool;
}

/// Resolves a configuration from the script's directive header.
///
/// Runs in the background for definitions that ask for it. Results route
/// through the suggestion path: the header is user-controlled input. After a
/// successful resolve the configuration is persisted to the attribute store
/// so the next session can apply it without re-resolving.
pub struct DirectiveLoader {
    attributes: Option<Arc<AttributeStore>>,
}

impl DirectiveLoader {
    pub fn new(attributes: Option<Arc<AttributeStore>>) -> Self {
        Self { attributes }
    }
}

impl ConfigurationLoader for DirectiveLoader {
    fn name(&self) -> &str {
        "directives"
    }

    fn runs_in_background(&self, definition: &ScriptDefinition) -> bool {
        definition.background
    }

    fn load(
        &self,
        _is_first_load: bool,
        id: &ScriptId,
        _definition: &ScriptDefinition,
        ctx: &LoadContext<'_>,
    ) -> bool {
        let Some(text) = ctx.read(id) else {
            // Vanished between schedule and run: transient, keep whatever is
            // applied. The next invalidation retries.
            log::debug!("script vanished before load: {id}");
            return true;
        };
        let text = resolve::strip_bom(&text);

        let header = resolve::scan_header(text);
        let mut reports = header.diagnostics.clone();

        let base_dir = id
            .path()
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut configuration = ScriptConfiguration::default();
        let mut imports: Vec<PathBuf> = Vec::new();
        let line_starts = resolve::compute_line_starts(text);

        for directive in &header.directives {
            if directive.key == DirectiveKey::Option {
                configuration.compiler_options.push(directive.value.clone());
                continue;
            }

            let target = resolve_target(&base_dir, &directive.value);
            if !target.exists() {
                reports.push(missing_target(directive, &target, &line_starts));
                if directive.key == DirectiveKey::Import {
                    // Still part of the inputs: its appearance invalidates.
                    imports.push(target);
                }
                continue;
            }
            match directive.key {
                DirectiveKey::Require => configuration.dependency_roots.push(target),
                DirectiveKey::Source => configuration.source_roots.push(target),
                DirectiveKey::Import => imports.push(target),
                DirectiveKey::Option => {}
            }
        }

        let inputs = InputsStamp::capture(text, &imports);

        let failed = reports.iter().any(|r| r.severity == Severity::Error);
        if failed {
            ctx.suggest(id, LoadedConfiguration::reports_only(inputs, reports));
            return true;
        }

        if let Some(attributes) = &self.attributes
            && let Err(e) = attributes.put(id, &inputs, &configuration)
        {
            log::warn!("failed to persist attribute entry for {id}: {e}");
        }

        let mut loaded = LoadedConfiguration::new(inputs, configuration);
        loaded.reports = reports;
        ctx.suggest(id, loaded);
        true
    }
}

fn resolve_target(base_dir: &std::path::Path, value: &str) -> PathBuf {
    let path = std::path::Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn missing_target(
    directive: &resolve::Directive,
    target: &std::path::Path,
    line_starts: &[usize],
) -> ScriptDiagnostic {
    let key = directive.key.as_str();
    ScriptDiagnostic {
        code: format!("{key}(missing)"),
        message: format!("{key} target not found: {}", target.display()),
        severity: Severity::Error,
        span: Some(directive.value_span.clone()),
        location: Some(resolve::locate(line_starts, &directive.value_span)),
        label: Some("not found".into()),
        help: Some(format!(
            "Paths are resolved relative to the script's directory. \
             Check the {key} path for typos."
        )),
        directive: Some(key.to_string()),
    }
}

/// Applies a previously persisted configuration when its stamp is still up
/// to date. Synchronous and trusted: the entry was written by a past
/// successful resolve, so it bypasses suggestion via the save route.
pub struct AttributeCacheLoader {
    attributes: Arc<AttributeStore>,
}

impl AttributeCacheLoader {
    pub fn new(attributes: Arc<AttributeStore>) -> Self {
        Self { attributes }
    }
}

impl ConfigurationLoader for AttributeCacheLoader {
    fn name(&self) -> &str {
        "attribute-cache"
    }

    fn runs_in_background(&self, _definition: &ScriptDefinition) -> bool {
        false
    }

    fn load(
        &self,
        _is_first_load: bool,
        id: &ScriptId,
        _definition: &ScriptDefinition,
        ctx: &LoadContext<'_>,
    ) -> bool {
        let Some((inputs, configuration)) = self.attributes.get(id) else {
            return false;
        };
        if !inputs.is_up_to_date(ctx.files(), id) {
            return false;
        }
        ctx.save(id, LoadedConfiguration::new(inputs, configuration));
        true
    }
}
