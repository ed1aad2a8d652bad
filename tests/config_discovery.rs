//! scl.json loading, config-file discovery, and definition matching.

use scl::config::{CompiledDefinitions, Config, ConfigError, discover_files, find_config_file};
use scl::host::DefinitionRegistry;
use scl::script::ScriptId;

#[test]
fn loads_jsonc_with_comments_and_trailing_commas() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scl.json");
    std::fs::write(
        &path,
        r#"{
  // discovery patterns
  "files": ["src/**/*.scr", "!src/generated/**"],
  "definitions": [
    { "name": "build", "files": ["src/**/*.scr"], "background": false },
  ],
  "autoReload": true,
}"#,
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.files.len(), 2);
    assert_eq!(config.definitions.len(), 1);
    assert_eq!(config.definitions[0].name, "build");
    assert!(!config.definitions[0].background);
    assert!(config.auto_reload);
}

#[test]
fn unknown_fields_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scl.json");
    std::fs::write(&path, r#"{ "files": [], "unexpected": true }"#).unwrap();

    let err = Config::load(&path).expect_err("unknown field must fail");
    assert!(matches!(err, ConfigError::Shape { .. }));
}

#[test]
fn defaults_cover_scripts_with_one_background_definition() {
    let config = Config::default_config();
    assert_eq!(config.files, vec!["**/*.scr".to_string()]);
    assert_eq!(config.definitions.len(), 1);
    assert!(config.definitions[0].background);
    assert!(!config.auto_reload);
}

#[test]
fn config_file_is_found_by_walking_up() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("a/b/c")).unwrap();
    std::fs::write(dir.path().join("scl.json"), "{}").unwrap();

    let found = find_config_file(&dir.path().join("a/b/c")).expect("config file");
    assert_eq!(
        std::fs::canonicalize(found).unwrap(),
        std::fs::canonicalize(dir.path().join("scl.json")).unwrap()
    );
}

#[test]
fn discovery_applies_ordered_include_exclude_patterns() {
    let dir = tempfile::tempdir().unwrap();
    let root = std::fs::canonicalize(dir.path()).unwrap();
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::create_dir_all(root.join("vendor")).unwrap();
    std::fs::write(root.join("src/a.scr"), "body").unwrap();
    std::fs::write(root.join("vendor/b.scr"), "body").unwrap();
    std::fs::write(root.join("src/notes.txt"), "text").unwrap();

    let config: Config = serde_json::from_str(
        r#"{ "files": ["**/*.scr", "!vendor/**"], "definitions": [] }"#,
    )
    .unwrap();

    let (files, warnings) =
        discover_files(&root, std::slice::from_ref(&root), &config).unwrap();
    assert!(warnings.is_empty());

    let names: Vec<String> = files
        .iter()
        .map(|p| {
            p.strip_prefix(&root)
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    assert_eq!(names, vec!["src/a.scr".to_string()]);
}

#[test]
fn first_matching_definition_wins() {
    let dir = tempfile::tempdir().unwrap();
    let root = std::fs::canonicalize(dir.path()).unwrap();
    std::fs::create_dir_all(root.join("build")).unwrap();
    std::fs::write(root.join("build/setup.scr"), "body").unwrap();
    std::fs::write(root.join("main.scr"), "body").unwrap();

    let config: Config = serde_json::from_str(
        r#"{
  "definitions": [
    { "name": "build", "files": ["build/**/*.scr"], "background": false },
    { "name": "script", "files": ["**/*.scr"] }
  ]
}"#,
    )
    .unwrap();
    let definitions = CompiledDefinitions::compile(&config, &root).unwrap();

    let build = definitions
        .find(&ScriptId::new(root.join("build/setup.scr")))
        .expect("build definition");
    assert_eq!(build.name, "build");
    assert!(!build.background);

    let script = definitions
        .find(&ScriptId::new(root.join("main.scr")))
        .expect("script definition");
    assert_eq!(script.name, "script");
    assert!(script.background);

    assert!(
        definitions
            .find(&ScriptId::new(root.join("README.md")))
            .is_none()
    );
}

#[test]
fn invalid_glob_pattern_is_a_config_error() {
    let config: Config = serde_json::from_str(
        r#"{ "definitions": [ { "name": "bad", "files": ["[unclosed"] } ] }"#,
    )
    .unwrap();

    let err = CompiledDefinitions::compile(&config, std::path::Path::new("/"))
        .expect_err("invalid glob must fail");
    assert!(matches!(err, ConfigError::Pattern { .. }));
}
