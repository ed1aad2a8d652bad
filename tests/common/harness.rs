//! In-memory collaborators and a scripted loader for driving the engine in
//! tests. Plays the role the LSP test client plays for the server: the
//! tests act as the editor.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use scl::diagnostic::{ScriptDiagnostic, Severity};
use scl::engine::{Collaborators, EngineOptions, ScriptConfigurationEngine};
use scl::host::{
    DefinitionRegistry, DocumentStore, IndexError, NotificationPanel, ReportSink, RootsIndexer,
    ScriptingSettings,
};
use scl::loader::{ConfigurationLoader, LoadContext};
use scl::script::{
    LoadedConfiguration, ScriptConfiguration, ScriptDefinition, ScriptId,
};
use scl::stamp::InputsStamp;

/// The configuration the scripted loader derives from a given script text.
pub fn config_for(text: &str) -> ScriptConfiguration {
    ScriptConfiguration {
        dependency_roots: vec![PathBuf::from(format!("/deps/{}", text.replace('/', "_")))],
        source_roots: vec![],
        compiler_options: vec![format!("-Dcontent={text}")],
    }
}

/// Shared in-memory document store the tests edit.
#[derive(Default)]
pub struct TestDocuments {
    docs: Mutex<HashMap<ScriptId, String>>,
}

impl TestDocuments {
    pub fn set(&self, id: &ScriptId, text: &str) {
        self.docs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), text.to_string());
    }

    pub fn remove(&self, id: &ScriptId) {
        self.docs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }
}

impl DocumentStore for TestDocuments {
    fn read(&self, id: &ScriptId) -> Option<String> {
        self.docs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }
}

/// Records panel visibility and show counts per script.
#[derive(Default)]
pub struct TestPanel {
    visible: Mutex<HashSet<ScriptId>>,
    shows: AtomicUsize,
}

impl TestPanel {
    pub fn shows(&self) -> usize {
        self.shows.load(Ordering::SeqCst)
    }
}

impl NotificationPanel for TestPanel {
    fn show(&self, id: &ScriptId) {
        self.shows.fetch_add(1, Ordering::SeqCst);
        self.visible
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone());
    }

    fn hide(&self, id: &ScriptId) {
        self.visible
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    fn is_visible(&self, id: &ScriptId) -> bool {
        self.visible
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id)
    }
}

/// Records attached reports and rehighlight requests.
#[derive(Default)]
pub struct TestReports {
    attached: Mutex<HashMap<ScriptId, Vec<ScriptDiagnostic>>>,
    attaches: AtomicUsize,
    rehighlights: AtomicUsize,
}

impl TestReports {
    pub fn attached(&self, id: &ScriptId) -> Vec<ScriptDiagnostic> {
        self.attached
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn attaches(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn rehighlights(&self) -> usize {
        self.rehighlights.load(Ordering::SeqCst)
    }
}

impl ReportSink for TestReports {
    fn attach(&self, id: &ScriptId, reports: &[ScriptDiagnostic]) {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        self.attached
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), reports.to_vec());
    }

    fn rehighlight(&self, _id: &ScriptId) {
        self.rehighlights.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counts reindex transactions; can be told to fail.
#[derive(Default)]
pub struct TestIndexer {
    calls: AtomicUsize,
    roots: Mutex<Vec<Vec<PathBuf>>>,
    pub fail: AtomicBool,
}

impl TestIndexer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_roots(&self) -> Vec<PathBuf> {
        self.roots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
            .unwrap_or_default()
    }
}

impl RootsIndexer for TestIndexer {
    fn index_roots(&self, roots: &[PathBuf]) -> Result<(), IndexError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.roots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(roots.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            return Err(IndexError {
                reason: "injected failure".into(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct TestSettings {
    pub auto_reload: AtomicBool,
}

impl ScriptingSettings for TestSettings {
    fn auto_reload_enabled(&self) -> bool {
        self.auto_reload.load(Ordering::SeqCst)
    }
}

/// Registry with a readiness toggle; every script matches one definition.
pub struct TestRegistry {
    pub ready: AtomicBool,
    definition: Mutex<Arc<ScriptDefinition>>,
}

impl Default for TestRegistry {
    fn default() -> Self {
        Self {
            ready: AtomicBool::new(true),
            definition: Mutex::new(Arc::new(ScriptDefinition::new("test"))),
        }
    }
}

impl TestRegistry {
    /// Swap the definition all scripts resolve to.
    pub fn set_definition(&self, definition: ScriptDefinition) {
        *self.definition.lock().unwrap_or_else(|e| e.into_inner()) = Arc::new(definition);
    }
}

impl DefinitionRegistry for TestRegistry {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn find(&self, _id: &ScriptId) -> Option<Arc<ScriptDefinition>> {
        Some(Arc::clone(
            &self.definition.lock().unwrap_or_else(|e| e.into_inner()),
        ))
    }
}

/// Scripted loader: derives the configuration from the document text, counts
/// invocations, tracks concurrency, and runs a one-shot hook in the middle
/// of a load (to model edits arriving while the loader runs).
#[derive(Default)]
pub struct TestLoader {
    loads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    on_load: Mutex<Option<Box<dyn FnMut() + Send>>>,
    pub panic_on_load: AtomicBool,
    /// Produce a reports-only outcome (no configuration).
    pub produce_reports_only: AtomicBool,
    /// Produce this configuration regardless of the script text.
    pub fixed_configuration: Mutex<Option<ScriptConfiguration>>,
}

impl TestLoader {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Run `hook` once, inside the next load, before its result is produced.
    pub fn on_next_load(&self, hook: impl FnMut() + Send + 'static) {
        *self.on_load.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(hook));
    }
}

impl ConfigurationLoader for TestLoader {
    fn name(&self) -> &str {
        "scripted"
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
            return true;
        };

        let entered = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(entered, Ordering::SeqCst);

        // The mid-load hook models the user editing while the loader runs.
        let hook = self.on_load.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut hook) = hook {
            hook();
        }

        self.loads.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panic_on_load.load(Ordering::SeqCst) {
            panic!("scripted loader failure");
        }

        let inputs = InputsStamp::capture(&text, &[]);
        if self.produce_reports_only.load(Ordering::SeqCst) {
            let diag = ScriptDiagnostic::bare(
                "resolver(error)",
                "scripted resolver failure",
                Severity::Error,
            );
            ctx.suggest(id, LoadedConfiguration::reports_only(inputs, vec![diag]));
            return true;
        }

        let configuration = self
            .fixed_configuration
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| config_for(&text));
        ctx.suggest(id, LoadedConfiguration::new(inputs, configuration));
        true
    }
}

/// An engine wired to in-memory collaborators and the scripted loader.
pub struct EngineHarness {
    pub engine: ScriptConfigurationEngine,
    pub docs: Arc<TestDocuments>,
    pub panel: Arc<TestPanel>,
    pub reports: Arc<TestReports>,
    pub indexer: Arc<TestIndexer>,
    pub settings: Arc<TestSettings>,
    pub registry: Arc<TestRegistry>,
    pub loader: Arc<TestLoader>,
}

impl EngineHarness {
    pub fn new() -> Self {
        Self::with_options(EngineOptions::default())
    }

    pub fn with_options(options: EngineOptions) -> Self {
        let docs = Arc::new(TestDocuments::default());
        let panel = Arc::new(TestPanel::default());
        let reports = Arc::new(TestReports::default());
        let indexer = Arc::new(TestIndexer::default());
        let settings = Arc::new(TestSettings::default());
        let registry = Arc::new(TestRegistry::default());
        let loader = Arc::new(TestLoader::default());

        let engine = ScriptConfigurationEngine::new(
            Collaborators {
                files: Arc::clone(&docs) as Arc<dyn DocumentStore>,
                definitions: Arc::clone(&registry) as Arc<dyn DefinitionRegistry>,
                indexer: Arc::clone(&indexer) as Arc<dyn RootsIndexer>,
                reports: Arc::clone(&reports) as Arc<dyn ReportSink>,
                panel: Arc::clone(&panel) as Arc<dyn NotificationPanel>,
                settings: Arc::clone(&settings) as Arc<dyn ScriptingSettings>,
            },
            vec![Arc::clone(&loader) as Arc<dyn ConfigurationLoader>],
            options,
        );

        Self {
            engine,
            docs,
            panel,
            reports,
            indexer,
            settings,
            registry,
            loader,
        }
    }

    /// Create a tracked script with the given text.
    pub fn script(&self, name: &str, text: &str) -> ScriptId {
        let id = ScriptId::new(PathBuf::from(format!("/project/{name}")));
        self.docs.set(&id, text);
        id
    }

    /// Edit the script and notify the engine, as the document layer would.
    pub fn edit(&self, id: &ScriptId, text: &str) {
        self.docs.set(id, text);
        self.engine.invalidate(id);
    }

    pub fn applied(&self, id: &ScriptId) -> Option<ScriptConfiguration> {
        self.engine.cached_configuration(id)
    }

    pub fn pending(&self, id: &ScriptId) -> Option<ScriptConfiguration> {
        self.engine.pending_configuration(id)
    }

    /// Load the script's first configuration and let it auto-apply.
    pub fn load_initial(&self, id: &ScriptId, text: &str) {
        self.docs.set(id, text);
        assert_eq!(self.engine.get_configuration(id), None);
        self.engine.drain();
        assert_eq!(self.applied(id), Some(config_for(text)));
        assert!(!self.engine.has_pending(id));
    }
}
