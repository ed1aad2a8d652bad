use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::diagnostic::Warning;
use crate::host::DefinitionRegistry;
use crate::script::{ScriptDefinition, ScriptId};

/// Name of the project config file, discovered by walking up from the
/// working directory.
pub const CONFIG_FILE_NAME: &str = "scl.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is not valid JSONC: {message}", .path.display())]
    Syntax { path: PathBuf, message: String },
    #[error("{} does not describe an scl configuration: {source}", .path.display())]
    Shape {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{scope}: glob '{pattern}' does not compile: {source}")]
    Pattern {
        /// What the pattern belongs to: the discovery `files` list or a
        /// named definition.
        scope: String,
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

/// Configuration file for scl, the script configuration loader.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
#[schemars(rename = "scl configuration")]
pub struct Config {
    /// URL to the scl config schema for self-validation.
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    #[schemars(rename = "$schema")]
    pub schema_url: Option<String>,

    /// Glob patterns for script discovery. Patterns prefixed with `!` are
    /// excludes. Order matters: later patterns override earlier ones.
    #[serde(default = "default_files")]
    pub files: Vec<String>,

    /// Script definitions. Each entry associates a definition name with a
    /// set of file glob patterns; the first matching entry wins.
    #[serde(default = "default_definitions")]
    pub definitions: Vec<DefinitionConfig>,

    /// Apply freshly loaded configurations without asking.
    #[serde(rename = "autoReload", default)]
    pub auto_reload: bool,
}

fn default_files() -> Vec<String> {
    vec!["**/*.scr".into()]
}

fn default_definitions() -> Vec<DefinitionConfig> {
    vec![DefinitionConfig {
        name: "script".into(),
        files: default_files(),
        background: default_background(),
    }]
}

fn default_background() -> bool {
    true
}

/// A script definition entry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DefinitionConfig {
    /// Display name of the definition.
    pub name: String,

    /// Glob patterns matched against each file's path relative to the
    /// project root. At least one pattern is required.
    #[schemars(length(min = 1))]
    pub files: Vec<String>,

    /// Resolve configurations for these scripts on the background worker.
    #[serde(default = "default_background")]
    pub background: bool,
}

impl Config {
    /// Load a config file. The file is JSONC: comments and trailing commas
    /// are fine.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let value = jsonc_parser::parse_to_serde_value(&text, &jsonc_options()).map_err(|e| {
            ConfigError::Syntax {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        })?;
        let Some(value) = value else {
            return Err(ConfigError::Syntax {
                path: path.to_path_buf(),
                message: "the file is empty".into(),
            });
        };

        serde_json::from_value(value).map_err(|source| ConfigError::Shape {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Default config when no config file is found.
    pub fn default_config() -> Self {
        Config {
            schema_url: None,
            files: default_files(),
            definitions: default_definitions(),
            auto_reload: false,
        }
    }
}

/// JSONC leniency accepted in scl.json: comments and trailing commas only.
fn jsonc_options() -> jsonc_parser::ParseOptions {
    jsonc_parser::ParseOptions {
        allow_comments: true,
        allow_trailing_commas: true,
        allow_loose_object_property_names: false,
        allow_single_quoted_strings: false,
        allow_hexadecimal_numbers: false,
        allow_missing_commas: false,
        allow_unary_plus_numbers: false,
    }
}

/// Find the nearest config file at or above `start`.
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let dir = if start.is_file() { start.parent()? } else { start };
    dir.ancestors()
        .map(|ancestor| ancestor.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}

/// The `files` patterns compiled for matching.
///
/// All patterns live in one globset; a path's verdict is decided by the
/// last pattern that matches it (globset reports every matching pattern's
/// index, so "later overrides earlier" is just the highest index).
pub struct DiscoveryPatterns {
    set: GlobSet,
    excluded: Vec<bool>,
}

impl DiscoveryPatterns {
    pub fn compile(patterns: &[String]) -> Result<Self, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        let mut excluded = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let (bare, exclude) = match pattern.strip_prefix('!') {
                Some(rest) => (rest, true),
                None => (pattern.as_str(), false),
            };
            builder.add(Glob::new(bare).map_err(|source| ConfigError::Pattern {
                scope: "files".into(),
                pattern: pattern.clone(),
                source,
            })?);
            excluded.push(exclude);
        }
        let set = builder.build().map_err(|source| ConfigError::Pattern {
            scope: "files".into(),
            pattern: patterns.join(" "),
            source,
        })?;
        Ok(Self { set, excluded })
    }

    /// Whether a project-relative path is selected for discovery.
    pub fn is_match(&self, relative: &str) -> bool {
        self.set
            .matches(relative)
            .into_iter()
            .max()
            .is_some_and(|last| !self.excluded[last])
    }
}

/// Discover script files under the given roots, respecting .gitignore.
///
/// All roots feed one walker; every file is matched by its path relative to
/// `project_root`. The result is sorted so multi-root discovery is
/// deterministic. Walk errors become warnings, not failures.
pub fn discover_files(
    project_root: &Path,
    walk_roots: &[PathBuf],
    config: &Config,
) -> Result<(Vec<PathBuf>, Vec<Warning>), ConfigError> {
    let patterns = DiscoveryPatterns::compile(&config.files)?;

    let Some((first, rest)) = walk_roots.split_first() else {
        return Ok((vec![], vec![]));
    };
    let mut builder = WalkBuilder::new(first);
    for root in rest {
        builder.add(root);
    }
    // Scripts may live under dot-directories; gitignore filtering stays on.
    builder.hidden(false);

    let mut files = Vec::new();
    let mut warnings = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warnings.push(Warning {
                    code: "discover(walk)".into(),
                    message: e.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(project_root) else {
            continue;
        };
        if patterns.is_match(&relative.to_string_lossy()) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok((files, warnings))
}

/// Script definitions compiled for per-file resolution. Implements
/// [`DefinitionRegistry`] for the engine; always ready, since the CLI
/// compiles definitions before constructing the engine.
#[derive(Debug)]
pub struct CompiledDefinitions {
    project_root: PathBuf,
    entries: Vec<(GlobSet, Arc<ScriptDefinition>)>,
}

impl CompiledDefinitions {
    pub fn compile(config: &Config, project_root: &Path) -> Result<Self, ConfigError> {
        let mut entries = Vec::with_capacity(config.definitions.len());
        for def in &config.definitions {
            let scope = format!("definition '{}'", def.name);
            let mut builder = GlobSetBuilder::new();
            for pattern in &def.files {
                builder.add(Glob::new(pattern).map_err(|source| ConfigError::Pattern {
                    scope: scope.clone(),
                    pattern: pattern.clone(),
                    source,
                })?);
            }
            let globset = builder.build().map_err(|source| ConfigError::Pattern {
                scope,
                pattern: def.files.join(" "),
                source,
            })?;
            entries.push((
                globset,
                Arc::new(ScriptDefinition {
                    name: def.name.clone(),
                    background: def.background,
                }),
            ));
        }
        Ok(Self {
            project_root: project_root.to_path_buf(),
            entries,
        })
    }

    /// Resolve the definition for a path relative to the project root. The
    /// first definition whose patterns match wins.
    pub fn resolve(&self, relative: &str) -> Option<Arc<ScriptDefinition>> {
        self.entries
            .iter()
            .find(|(globset, _)| globset.is_match(relative))
            .map(|(_, definition)| Arc::clone(definition))
    }

    /// A file's path relative to the project root, for glob matching. Falls
    /// back to the path as given when it lies outside the project.
    fn project_relative(&self, path: &Path) -> String {
        std::fs::canonicalize(path)
            .ok()
            .as_deref()
            .and_then(|abs| abs.strip_prefix(&self.project_root).ok())
            .map(|rel| rel.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned())
    }
}

impl DefinitionRegistry for CompiledDefinitions {
    fn is_ready(&self) -> bool {
        true
    }

    fn find(&self, id: &ScriptId) -> Option<Arc<ScriptDefinition>> {
        self.resolve(&self.project_relative(id.path()))
    }
}
