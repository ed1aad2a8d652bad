//! The shipped loaders driven through the engine: synchronous vs background
//! resolution, the attribute store fast path, and directive diagnostics.

mod common;

use std::sync::Arc;

use common::harness::{
    TestDocuments, TestIndexer, TestPanel, TestRegistry, TestReports, TestSettings,
};
use scl::attr::AttributeStore;
use scl::engine::{Collaborators, EngineOptions, ScriptConfigurationEngine};
use scl::host::{
    DefinitionRegistry, DocumentStore, NotificationPanel, ReportSink, RootsIndexer,
    ScriptingSettings,
};
use scl::loader::{AttributeCacheLoader, ConfigurationLoader, DirectiveLoader};
use scl::script::{ScriptConfiguration, ScriptDefinition, ScriptId};
use scl::stamp::InputsStamp;

struct Rig {
    engine: ScriptConfigurationEngine,
    docs: Arc<TestDocuments>,
    reports: Arc<TestReports>,
    panel: Arc<TestPanel>,
}

fn rig(loaders: Vec<Arc<dyn ConfigurationLoader>>, background: bool) -> Rig {
    let docs = Arc::new(TestDocuments::default());
    let panel = Arc::new(TestPanel::default());
    let reports = Arc::new(TestReports::default());
    let registry = Arc::new(TestRegistry::default());
    registry.set_definition(ScriptDefinition {
        name: "test".into(),
        background,
    });

    let engine = ScriptConfigurationEngine::new(
        Collaborators {
            files: Arc::clone(&docs) as Arc<dyn DocumentStore>,
            definitions: registry as Arc<dyn DefinitionRegistry>,
            indexer: Arc::new(TestIndexer::default()) as Arc<dyn RootsIndexer>,
            reports: Arc::clone(&reports) as Arc<dyn ReportSink>,
            panel: Arc::clone(&panel) as Arc<dyn NotificationPanel>,
            settings: Arc::new(TestSettings::default()) as Arc<dyn ScriptingSettings>,
        },
        loaders,
        EngineOptions::default(),
    );

    Rig {
        engine,
        docs,
        reports,
        panel,
    }
}

/// A definition that resolves in the foreground blocks the caller and
/// returns the configuration from the same call.
#[test]
fn foreground_definition_resolves_on_the_caller_thread() {
    let r = rig(vec![Arc::new(DirectiveLoader::new(None))], false);
    let id = ScriptId::new("/project/main.scr");
    r.docs
        .set(&id, "//# option: -deprecation\n//# option: -strict\nbody\n");

    let configuration = r.engine.get_configuration(&id);
    assert_eq!(
        configuration.map(|c| c.compiler_options),
        Some(vec!["-deprecation".to_string(), "-strict".to_string()])
    );
    assert!(!r.engine.is_load_scheduled(&id));
}

/// A background definition schedules; a later edit goes through the
/// suggestion path.
#[test]
fn background_definition_suggests_on_edit() {
    let r = rig(vec![Arc::new(DirectiveLoader::new(None))], true);
    let id = ScriptId::new("/project/main.scr");
    r.docs.set(&id, "//# option: -one\nbody\n");

    assert_eq!(r.engine.get_configuration(&id), None);
    r.engine.drain();
    assert_eq!(
        r.engine.cached_configuration(&id).map(|c| c.compiler_options),
        Some(vec!["-one".to_string()])
    );

    r.docs.set(&id, "//# option: -two\nbody\n");
    r.engine.invalidate(&id);
    r.engine.drain();

    assert!(r.panel.is_visible(&id));
    assert_eq!(
        r.engine.pending_configuration(&id).map(|c| c.compiler_options),
        Some(vec!["-two".to_string()])
    );
    assert!(r.engine.apply_pending(&id));
    assert_eq!(
        r.engine.cached_configuration(&id).map(|c| c.compiler_options),
        Some(vec!["-two".to_string()])
    );
}

/// A persisted attribute entry whose stamp still matches the live text is
/// applied synchronously, without a background load.
#[test]
fn attribute_entry_is_applied_without_loading() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(AttributeStore::new(dir.path().join("attributes")));

    let id = ScriptId::new("/project/main.scr");
    let text = "//# option: -resolved\nbody\n";
    let cached = ScriptConfiguration {
        dependency_roots: vec![],
        source_roots: vec![],
        compiler_options: vec!["-from-cache".into()],
    };
    store
        .put(&id, &InputsStamp::capture(text, &[]), &cached)
        .unwrap();

    let r = rig(
        vec![
            Arc::new(AttributeCacheLoader::new(Arc::clone(&store))),
            Arc::new(DirectiveLoader::new(Some(store))),
        ],
        true,
    );
    r.docs.set(&id, text);

    let configuration = r.engine.get_configuration(&id);
    assert_eq!(
        configuration.map(|c| c.compiler_options),
        Some(vec!["-from-cache".to_string()])
    );
    assert!(!r.engine.is_load_scheduled(&id));
    assert_eq!(r.panel.shows(), 0);
}

/// A stale attribute entry is ignored; the directive loader re-resolves and
/// rewrites the entry.
#[test]
fn stale_attribute_entry_is_re_resolved() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(AttributeStore::new(dir.path().join("attributes")));

    let id = ScriptId::new("/project/main.scr");
    let stale_config = ScriptConfiguration {
        dependency_roots: vec![],
        source_roots: vec![],
        compiler_options: vec!["-stale".into()],
    };
    store
        .put(&id, &InputsStamp::capture("old text", &[]), &stale_config)
        .unwrap();

    let r = rig(
        vec![
            Arc::new(AttributeCacheLoader::new(Arc::clone(&store))),
            Arc::new(DirectiveLoader::new(Some(Arc::clone(&store)))),
        ],
        true,
    );
    let text = "//# option: -fresh\nbody\n";
    r.docs.set(&id, text);

    assert_eq!(r.engine.get_configuration(&id), None);
    r.engine.drain();
    assert_eq!(
        r.engine.cached_configuration(&id).map(|c| c.compiler_options),
        Some(vec!["-fresh".to_string()])
    );

    // The store was rewritten for the new text.
    let (inputs, configuration) = store.get(&id).expect("entry after resolve");
    assert!(inputs.is_up_to_date(r.docs.as_ref(), &id));
    assert_eq!(configuration.compiler_options, vec!["-fresh".to_string()]);
}

/// A missing require target is an error diagnostic with a source location;
/// nothing is applied.
#[test]
fn missing_require_target_reports_and_applies_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let r = rig(vec![Arc::new(DirectiveLoader::new(None))], true);

    let id = ScriptId::new(dir.path().join("main.scr"));
    r.docs.set(&id, "//# require: does-not-exist.jar\nbody\n");

    assert_eq!(r.engine.get_configuration(&id), None);
    r.engine.drain();

    assert_eq!(r.engine.cached_configuration(&id), None);
    let attached = r.reports.attached(&id);
    let missing = attached
        .iter()
        .find(|d| d.code == "require(missing)")
        .expect("missing-target diagnostic");
    let location = missing.location.as_ref().expect("source location");
    assert_eq!(location.line, 1);
    assert_eq!(missing.directive.as_deref(), Some("require"));
}

/// Deleting an import target invalidates the stamp: the reload reports the
/// vanished import, while the applied configuration stays.
#[test]
fn vanished_import_invalidates_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    let import_path = dir.path().join("shared.scr");
    std::fs::write(&import_path, "shared contents").unwrap();

    let r = rig(vec![Arc::new(DirectiveLoader::new(None))], true);
    let id = ScriptId::new(dir.path().join("main.scr"));
    let text = "//# import: shared.scr\n//# option: -a\nbody\n";
    r.docs.set(&id, text);

    assert_eq!(r.engine.get_configuration(&id), None);
    r.engine.drain();
    assert_eq!(
        r.engine.cached_configuration(&id).map(|c| c.compiler_options),
        Some(vec!["-a".to_string()])
    );

    std::fs::remove_file(&import_path).unwrap();
    r.engine.invalidate(&id);
    r.engine.drain();

    assert_eq!(
        r.engine.cached_configuration(&id).map(|c| c.compiler_options),
        Some(vec!["-a".to_string()]),
        "transient failure keeps the applied configuration"
    );
    let attached = r.reports.attached(&id);
    assert!(attached.iter().any(|d| d.code == "import(missing)"));
}
