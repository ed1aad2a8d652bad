use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::cache::ConfigurationCache;
use crate::diagnostic::{ScriptDiagnostic, Severity};
use crate::executor::BackgroundExecutor;
use crate::host::{
    DefinitionRegistry, DocumentStore, NotificationPanel, ReportSink, RootsIndexer,
    ScriptingSettings,
};
use crate::loader::{ConfigurationLoader, LoadContext, LoadSink};
use crate::script::{
    AppliedConfiguration, LoadedConfiguration, ScriptConfiguration, ScriptDefinition, ScriptId,
};

/// The engine's external collaborators (see the `host` module).
pub struct Collaborators {
    pub files: Arc<dyn DocumentStore>,
    pub definitions: Arc<dyn DefinitionRegistry>,
    pub indexer: Arc<dyn RootsIndexer>,
    pub reports: Arc<dyn ReportSink>,
    pub panel: Arc<dyn NotificationPanel>,
    pub settings: Arc<dyn ScriptingSettings>,
}

/// Options fixed at engine construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// Apply every load unconditionally and never raise a panel. For batch
    /// harnesses and tests.
    pub test_mode: bool,
}

/// Orchestrates configuration loading for tracked scripts: staleness
/// detection, scheduling, the suggest-vs-apply decision, and the
/// notification lifecycle.
///
/// Cheap to clone; all clones share one state machine and one worker.
#[derive(Clone)]
pub struct ScriptConfigurationEngine {
    shared: Arc<EngineShared>,
}

struct EngineShared {
    collab: Collaborators,
    loaders: Vec<Arc<dyn ConfigurationLoader>>,
    cache: ConfigurationCache,
    executor: BackgroundExecutor,
    /// Serializes suggest-or-save decisions across load completions, so
    /// concurrent completions for different scripts do not interleave the
    /// notification bookkeeping.
    save_lock: Mutex<()>,
    /// Reports last attached per script; the sink is only written on change.
    last_reports: Mutex<HashMap<ScriptId, Vec<ScriptDiagnostic>>>,
    reindex: Mutex<ReindexState>,
    /// Cleared on shutdown; worker tasks and host calls become no-ops.
    alive: AtomicBool,
    test_mode: bool,
}

// Lock order: save_lock → reindex → cache → executor queue. The
// last_reports mutex is a leaf (never held while acquiring another lock).

#[derive(Default)]
struct ReindexState {
    depth: u32,
    touched: Vec<ScriptId>,
}

enum Route {
    Suggest,
    Save,
}

impl ScriptConfigurationEngine {
    pub fn new(
        collab: Collaborators,
        loaders: Vec<Arc<dyn ConfigurationLoader>>,
        options: EngineOptions,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                collab,
                loaders,
                cache: ConfigurationCache::new(),
                executor: BackgroundExecutor::new(),
                save_lock: Mutex::new(()),
                last_reports: Mutex::new(HashMap::new()),
                reindex: Mutex::new(ReindexState::default()),
                alive: AtomicBool::new(true),
                test_mode: options.test_mode,
            }),
        }
    }

    /// The configuration visible to analysis, after ensuring a load was at
    /// least scheduled if the entry is absent or stale. Never blocks, except
    /// when a synchronous loader handles the script on this thread.
    pub fn get_configuration(&self, id: &ScriptId) -> Option<ScriptConfiguration> {
        self.shared.update(id, false);
        self.shared.cache.get(id).map(|a| a.configuration)
    }

    /// The applied configuration without triggering any load.
    pub fn cached_configuration(&self, id: &ScriptId) -> Option<ScriptConfiguration> {
        self.shared.cache.get(id).map(|a| a.configuration)
    }

    /// The live file changed: mark the applied entry stale and schedule a
    /// reload. A still-fresh pending suggestion survives; the background
    /// task re-raises or supersedes it once it runs.
    pub fn invalidate(&self, id: &ScriptId) {
        self.shared.cache.mark_stale(id);
        self.shared.update(id, true);
    }

    /// Make sure an up-to-date configuration has been loaded and suggested
    /// for this script. Called after user edits and on editor focus.
    pub fn ensure_up_to_date_suggested(&self, id: &ScriptId) {
        self.invalidate(id);
    }

    pub fn has_pending(&self, id: &ScriptId) -> bool {
        self.shared.cache.has_pending(id)
    }

    /// The configuration awaiting acceptance, for the panel UI to render.
    pub fn pending_configuration(&self, id: &ScriptId) -> Option<ScriptConfiguration> {
        self.shared.cache.pending(id).and_then(|l| l.configuration)
    }

    /// User accepted the suggestion: move the pending configuration into the
    /// applied cache inside a reindex transaction and request re-analysis.
    /// Returns `false` if no pending entry exists. An indexer failure is
    /// surfaced through diagnostics, never as an error value.
    pub fn apply_pending(&self, id: &ScriptId) -> bool {
        let shared = &self.shared;
        let _guard = shared.save_lock.lock().unwrap_or_else(|e| e.into_inner());

        let Some(pending) = shared.cache.take_pending(id) else {
            return false;
        };
        shared.collab.panel.hide(id);

        let LoadedConfiguration {
            inputs,
            configuration,
            ..
        } = pending;
        let Some(configuration) = configuration else {
            return false;
        };

        shared.with_reindex(|| {
            shared.cache.store(
                id,
                AppliedConfiguration {
                    inputs,
                    configuration,
                },
            );
            shared.touch(id);
        });
        shared.rehighlight(id);
        true
    }

    /// User dismissed the suggestion: drop the pending entry.
    pub fn dismiss_pending(&self, id: &ScriptId) -> bool {
        let shared = &self.shared;
        let _guard = shared.save_lock.lock().unwrap_or_else(|e| e.into_inner());

        let removed = shared.cache.take_pending(id).is_some();
        if removed {
            shared.collab.panel.hide(id);
        }
        removed
    }

    /// Run `f` inside one reindex transaction. Applies performed inside
    /// (nested scopes included) are indexed exactly once, at exit of the
    /// outermost scope.
    pub fn reindex_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        self.shared.with_reindex(f)
    }

    /// Whether a load for this script is queued or running.
    pub fn is_load_scheduled(&self, id: &ScriptId) -> bool {
        self.shared.executor.is_scheduled(id)
    }

    /// Block until every load task scheduled before this call has completed.
    /// Tasks scheduled while draining are left for a later drain.
    /// Test/harness facility; the editor never drains.
    pub fn drain(&self) {
        self.shared.executor.drain();
    }

    /// Stop the engine: drop queued loads, join the worker, and turn the
    /// remaining host calls into no-ops.
    pub fn shutdown(&self) {
        self.shared.alive.store(false, Ordering::SeqCst);
        self.shared.executor.shutdown();
    }
}

impl EngineShared {
    /// The reload decision. Checks readiness and freshness, then runs the
    /// synchronous loader chain on this thread; if none handles the script,
    /// schedules the background phase.
    fn update(self: &Arc<Self>, id: &ScriptId, load_even_will_not_be_applied: bool) {
        if !self.alive.load(Ordering::SeqCst) {
            return;
        }
        if !self.collab.definitions.is_ready() {
            return;
        }
        let Some(definition) = self.collab.definitions.find(id) else {
            return;
        };
        if self.cache.up_to_date(id, self.collab.files.as_ref()) {
            return;
        }

        let is_first_load = self.cache.get(id).is_none();
        let should_load = is_first_load
            || load_even_will_not_be_applied
            || self.collab.settings.auto_reload_enabled()
            || self.test_mode;
        if !should_load {
            return;
        }

        // Synchronous chain first; the first loader that handles the script
        // decides suggest-vs-save on its own.
        let ctx = LoadContext::new(self.as_ref(), self.collab.files.as_ref());
        for loader in &self.loaders {
            if !loader.runs_in_background(&definition)
                && loader.load(is_first_load, id, &definition, &ctx)
            {
                return;
            }
        }

        let shared = Arc::clone(self);
        let task_id = id.clone();
        let task_definition = Arc::clone(&definition);
        let scheduled = self.executor.ensure_scheduled(id, move || {
            shared.background_load(&task_id, &task_definition);
        });
        if scheduled {
            log::debug!("scheduled configuration load for {id}");
        }
    }

    /// Body of one background task. Runs on the worker thread.
    fn background_load(self: &Arc<Self>, id: &ScriptId, definition: &ScriptDefinition) {
        if !self.alive.load(Ordering::SeqCst) {
            return;
        }
        let files = self.collab.files.as_ref();

        // The live file may already match the applied configuration again
        // (A→B→A within the queue window); nothing to load.
        if self.cache.up_to_date(id, files) {
            return;
        }

        // A still-fresh pending suggestion: re-raise it (the notification
        // may have been dismissed) instead of loading again.
        if let Some(prev) = self.cache.pending(id)
            && prev.inputs.is_up_to_date(files, id)
        {
            self.suggest_or_save(id, prev, Route::Suggest);
            return;
        }

        // A new load supersedes whatever was pending.
        self.cache.take_pending(id);
        let is_first_load = self.cache.get(id).is_none();

        let ctx = LoadContext::new(self.as_ref(), files);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            for loader in &self.loaders {
                if loader.runs_in_background(definition)
                    && loader.load(is_first_load, id, definition, &ctx)
                {
                    return true;
                }
            }
            false
        }));

        match outcome {
            Ok(true) => {}
            Ok(false) => log::debug!("no applicable loader for {id}"),
            Err(_) => {
                log::error!("configuration loader panicked for {id}");
                let diag = ScriptDiagnostic::bare(
                    "loader(panic)",
                    format!("configuration loader panicked for {id}"),
                    Severity::Error,
                );
                let _guard = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());
                self.attach_reports_if_changed(id, &[diag]);
            }
        }
    }

    /// The suggest-or-save decision for one completed load. Serialized by
    /// the save lock.
    fn suggest_or_save(&self, id: &ScriptId, loaded: LoadedConfiguration, route: Route) {
        if !self.alive.load(Ordering::SeqCst) {
            return;
        }
        let _guard = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());

        self.attach_reports_if_changed(id, &loaded.reports);

        // No configuration: a transient failure. Reports are recorded; the
        // previously applied configuration stays.
        let Some(new_configuration) = loaded.configuration.clone() else {
            return;
        };

        let old = self.cache.get(id);
        if let Some(applied) = &old
            && applied.configuration == new_configuration
        {
            // Same configuration seen again: refresh the stamp so freshness
            // checks short-circuit, and withdraw any stale suggestion. No
            // reindex transaction, no notification.
            self.collab.panel.hide(id);
            self.cache.refresh_stamp(id, loaded.inputs);
            return;
        }

        let auto_apply = matches!(route, Route::Save)
            || old.is_none()
            || self.collab.settings.auto_reload_enabled()
            || self.test_mode;

        if auto_apply {
            self.collab.panel.hide(id);
            self.with_reindex(|| {
                self.cache.store(
                    id,
                    AppliedConfiguration {
                        inputs: loaded.inputs,
                        configuration: new_configuration,
                    },
                );
                self.touch(id);
            });
            self.rehighlight(id);
        } else {
            self.cache.put_pending(id, loaded);
            self.collab.panel.show(id);
        }
    }

    /// Attach reports to the sink only when they differ from the last
    /// attached set, and request re-analysis when they do.
    fn attach_reports_if_changed(&self, id: &ScriptId, reports: &[ScriptDiagnostic]) {
        let changed = {
            let mut map = self.last_reports.lock().unwrap_or_else(|e| e.into_inner());
            match map.get(id) {
                Some(prev) if prev.as_slice() == reports => false,
                _ => {
                    map.insert(id.clone(), reports.to_vec());
                    true
                }
            }
        };
        if changed {
            self.collab.reports.attach(id, reports);
            self.rehighlight(id);
        }
    }

    fn rehighlight(&self, id: &ScriptId) {
        // Fire-and-forget toward the host; dropped after shutdown.
        if self.alive.load(Ordering::SeqCst) {
            self.collab.reports.rehighlight(id);
        }
    }

    /// Run `f` inside a reindex scope. Nested scopes collapse into the
    /// outermost one; the indexer runs exactly once per transaction.
    fn with_reindex<R>(&self, f: impl FnOnce() -> R) -> R {
        {
            let mut state = self.reindex.lock().unwrap_or_else(|e| e.into_inner());
            state.depth += 1;
        }
        let result = f();
        self.commit_reindex();
        result
    }

    fn touch(&self, id: &ScriptId) {
        let mut state = self.reindex.lock().unwrap_or_else(|e| e.into_inner());
        state.touched.push(id.clone());
    }

    fn commit_reindex(&self) {
        let touched = {
            let mut state = self.reindex.lock().unwrap_or_else(|e| e.into_inner());
            state.depth -= 1;
            if state.depth > 0 {
                return;
            }
            std::mem::take(&mut state.touched)
        };
        if touched.is_empty() {
            return;
        }

        let mut roots: Vec<PathBuf> = Vec::new();
        for id in &touched {
            if let Some(applied) = self.cache.get(id) {
                for root in applied.configuration.roots() {
                    if !roots.iter().any(|r| r == root) {
                        roots.push(root.to_path_buf());
                    }
                }
            }
        }

        if let Err(e) = self.collab.indexer.index_roots(&roots) {
            // Fatal to the applies in this transaction: take them back out
            // of the cache and surface a diagnostic per script.
            log::error!("root indexing failed, rolling back {} applies: {e}", touched.len());
            for id in &touched {
                self.cache.remove(id);
                let diag = ScriptDiagnostic::bare(
                    "index(failed)",
                    format!("configuration was not applied: {e}"),
                    Severity::Error,
                );
                self.attach_reports_if_changed(id, &[diag]);
            }
        }
    }
}

impl LoadSink for EngineShared {
    fn suggest(&self, id: &ScriptId, loaded: LoadedConfiguration) {
        self.suggest_or_save(id, loaded, Route::Suggest);
    }

    fn save(&self, id: &ScriptId, loaded: LoadedConfiguration) {
        self.suggest_or_save(id, loaded, Route::Save);
    }
}
