use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use scl::attr::{self, AttributeClearResult, AttributeStore};
use scl::config::{self, CompiledDefinitions, Config};
use scl::diagnostic::{ScriptDiagnostic, ScriptOutcome, ScriptResult, Severity, Warning};
use scl::engine::{Collaborators, EngineOptions, ScriptConfigurationEngine};
use scl::host::{
    DefinitionRegistry, DocumentStore, IndexError, NotificationPanel, ReportSink, RootsIndexer,
    ScriptingSettings,
};
use scl::loader::{AttributeCacheLoader, ConfigurationLoader, DirectiveLoader};
use scl::output::{self, Format, Summary, VerboseScriptInfo};
use scl::resolve;
use scl::script::{ScriptConfiguration, ScriptId};

#[derive(Parser)]
#[command(name = "scl", version, about = "Script Configuration Loader")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve compile configurations for script files
    Check(CheckArgs),

    /// Manage scl configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Manage the persisted attribute store
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the resolved configuration
    Print(ConfigPrintArgs),

    /// Print the JSON Schema for scl.json config files
    Schema,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List persisted attribute entries
    List,

    /// Delete all persisted attribute entries
    Clear,
}

#[derive(clap::Args)]
struct ConfigPrintArgs {
    /// Path to config file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
}

#[derive(clap::Args)]
struct CheckArgs {
    /// Script files or directories to resolve
    files: Vec<PathBuf>,

    /// Path to config file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long, value_enum, default_value = "human")]
    format: Format,

    /// Error if any file has no matching script definition
    #[arg(long)]
    strict: bool,

    /// Bypass the persisted attribute store; always re-resolve
    #[arg(long)]
    no_cache: bool,

    /// Print verbose diagnostic information to stderr
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Check(args) => run_check(args),
        Commands::Config { command } => match command {
            ConfigCommands::Print(args) => run_config_print(args),
            ConfigCommands::Schema => run_config_schema(),
        },
        Commands::Cache { command } => match command {
            CacheCommands::List => run_cache_list(),
            CacheCommands::Clear => run_cache_clear(),
        },
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "scl", &mut std::io::stdout());
            ExitCode::SUCCESS
        }
    }
}

// --- Host implementations for the batch run ---

/// Scripts read straight from disk; `check` is a batch run over saved files.
struct DiskDocuments;

impl DocumentStore for DiskDocuments {
    fn read(&self, id: &ScriptId) -> Option<String> {
        std::fs::read_to_string(id.path())
            .ok()
            .map(|c| resolve::strip_bom(&c).to_owned())
    }
}

/// Collects attached reports for rendering after the run.
#[derive(Default)]
struct CollectingReports {
    reports: Mutex<HashMap<ScriptId, Vec<ScriptDiagnostic>>>,
}

impl CollectingReports {
    fn take(&self, id: &ScriptId) -> Vec<ScriptDiagnostic> {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .unwrap_or_default()
    }
}

impl ReportSink for CollectingReports {
    fn attach(&self, id: &ScriptId, reports: &[ScriptDiagnostic]) {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), reports.to_vec());
    }

    fn rehighlight(&self, _id: &ScriptId) {}
}

/// The batch run has no indexer; applies succeed without indexing.
struct NoopIndexer;

impl RootsIndexer for NoopIndexer {
    fn index_roots(&self, _roots: &[PathBuf]) -> Result<(), IndexError> {
        Ok(())
    }
}

/// Test mode auto-applies everything; a panel is never raised.
struct NoopPanel;

impl NotificationPanel for NoopPanel {
    fn show(&self, _id: &ScriptId) {}
    fn hide(&self, _id: &ScriptId) {}
    fn is_visible(&self, _id: &ScriptId) -> bool {
        false
    }
}

struct CliSettings {
    auto_reload: bool,
}

impl ScriptingSettings for CliSettings {
    fn auto_reload_enabled(&self) -> bool {
        self.auto_reload
    }
}

fn run_config_print(args: ConfigPrintArgs) -> ExitCode {
    let mut stderr = std::io::stderr().lock();

    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            output::tool_message(
                &mut stderr,
                Severity::Error,
                format!("cannot determine current directory: {e}"),
            );
            return ExitCode::from(2);
        }
    };

    let (loaded_config, _project_root) = match load_config(&args.config, &cwd) {
        Ok(result) => result,
        Err(e) => {
            output::tool_message(&mut stderr, Severity::Error, format!("failed to load config: {e}"));
            return ExitCode::from(2);
        }
    };

    let config = loaded_config.unwrap_or_else(Config::default_config);
    println!("{}", serde_json::to_string_pretty(&config).unwrap());
    ExitCode::SUCCESS
}

fn run_config_schema() -> ExitCode {
    let schema = schemars::schema_for!(scl::config::Config);
    let mut value = serde_json::to_value(&schema).unwrap();

    // schemars emits draft-07 spelling; republish it as 2020-12.
    modernize_defs(&mut value);
    if let Some(root) = value.as_object_mut() {
        root.insert(
            "$schema".into(),
            serde_json::json!("https://json-schema.org/draft/2020-12/schema"),
        );
        root.insert(
            "$id".into(),
            serde_json::json!("https://scl-tool.dev/v1/scl-config.schema.json"),
        );
    }

    println!("{}", serde_json::to_string_pretty(&value).unwrap());
    ExitCode::SUCCESS
}

/// Recursively move `definitions` to `$defs` and respell `$ref` targets.
fn modernize_defs(value: &mut serde_json::Value) {
    if let Some(map) = value.as_object_mut() {
        if let Some(defs) = map.remove("definitions") {
            map.insert("$defs".into(), defs);
        }
        if let Some(serde_json::Value::String(target)) = map.get_mut("$ref") {
            *target = target.replace("#/definitions/", "#/$defs/");
        }
        for nested in map.values_mut() {
            modernize_defs(nested);
        }
    } else if let Some(items) = value.as_array_mut() {
        for nested in items {
            modernize_defs(nested);
        }
    }
}

fn run_cache_list() -> ExitCode {
    let mut stderr = std::io::stderr().lock();

    let Some(dir) = attr::default_dir() else {
        output::tool_message(&mut stderr, Severity::Error, "cannot determine cache directory");
        return ExitCode::from(2);
    };

    let store = AttributeStore::new(dir);
    match store.list() {
        Ok(result) => {
            for entry in &result.entries {
                println!("{}\t{}\t{} bytes", entry.path, entry.saved_at, entry.size);
            }
            if result.skipped > 0 {
                output::tool_message(
                    &mut stderr,
                    Severity::Warning,
                    format!("skipped {} unreadable attribute entries", result.skipped),
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            output::tool_message(
                &mut stderr,
                Severity::Error,
                format!("failed to list attribute store: {e}"),
            );
            ExitCode::from(2)
        }
    }
}

fn run_cache_clear() -> ExitCode {
    let mut stderr = std::io::stderr().lock();

    let Some(dir) = attr::default_dir() else {
        output::tool_message(&mut stderr, Severity::Error, "cannot determine cache directory");
        return ExitCode::from(2);
    };

    let store = AttributeStore::new(dir);
    match store.clear() {
        Ok(AttributeClearResult::Cleared) => {
            println!("Attribute store cleared");
            ExitCode::SUCCESS
        }
        Ok(AttributeClearResult::AlreadyEmpty) => {
            println!("Attribute store already empty");
            ExitCode::SUCCESS
        }
        Err(e) => {
            output::tool_message(
                &mut stderr,
                Severity::Error,
                format!("failed to clear attribute store: {e}"),
            );
            ExitCode::from(2)
        }
    }
}

fn run_check(args: CheckArgs) -> ExitCode {
    let start = Instant::now();
    let mut stderr = std::io::stderr().lock();
    let mut warnings: Vec<Warning> = Vec::new();
    let verbose = args.verbose;

    // Resolve config
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            output::tool_message(
                &mut stderr,
                Severity::Error,
                format!("cannot determine current directory: {e}"),
            );
            return ExitCode::from(2);
        }
    };
    let (loaded_config, project_root) = match load_config(&args.config, &cwd) {
        Ok(result) => result,
        Err(e) => {
            output::tool_message(&mut stderr, Severity::Error, format!("failed to load config: {e}"));
            return ExitCode::from(2);
        }
    };
    let project_root = std::fs::canonicalize(&project_root).unwrap_or(project_root);

    if verbose && args.format == Format::Human {
        match (&loaded_config, &args.config) {
            (Some(_), Some(path)) => {
                output::verbose_log(&mut stderr, &format!("config: {}", path.display()));
            }
            (Some(_), None) => {
                output::verbose_log(
                    &mut stderr,
                    &format!(
                        "config: {} (auto-discovered)",
                        project_root.join(config::CONFIG_FILE_NAME).display()
                    ),
                );
            }
            (None, _) => {
                output::verbose_log(&mut stderr, "config: none found, using defaults");
            }
        }
        output::verbose_log(
            &mut stderr,
            &format!("project root: {}", project_root.display()),
        );
    }

    let config = loaded_config.unwrap_or_else(Config::default_config);

    // Pre-compile script definitions once
    let definitions = match CompiledDefinitions::compile(&config, &project_root) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            output::tool_message(
                &mut stderr,
                Severity::Error,
                format!("failed to compile script definitions: {e}"),
            );
            return ExitCode::from(2);
        }
    };

    // Discover files
    let files_to_check = if args.files.is_empty() {
        if verbose && args.format == Format::Human {
            output::verbose_log(
                &mut stderr,
                &format!("discovering scripts in: {}", cwd.display()),
            );
        }
        // No explicit arguments: discover from cwd
        match config::discover_files(&project_root, std::slice::from_ref(&cwd), &config) {
            Ok((files, walk_warnings)) => {
                warnings.extend(walk_warnings);
                if verbose && args.format == Format::Human {
                    output::verbose_log(
                        &mut stderr,
                        &format!("discovered {} scripts", files.len()),
                    );
                }
                files
            }
            Err(e) => {
                output::tool_message(
                    &mut stderr,
                    Severity::Error,
                    format!("failed to discover scripts: {e}"),
                );
                return ExitCode::from(2);
            }
        }
    } else {
        // Partition explicit args into directories and files
        let mut walk_roots: Vec<PathBuf> = Vec::new();
        let mut explicit_files: Vec<PathBuf> = Vec::new();

        for path in &args.files {
            let resolved = if path.is_absolute() {
                path.clone()
            } else {
                cwd.join(path)
            };
            if resolved.is_dir() {
                walk_roots.push(resolved);
            } else {
                explicit_files.push(path.clone());
            }
        }

        if !walk_roots.is_empty() {
            match config::discover_files(&project_root, &walk_roots, &config) {
                Ok((files, walk_warnings)) => {
                    warnings.extend(walk_warnings);
                    explicit_files.extend(files);
                }
                Err(e) => {
                    output::tool_message(
                        &mut stderr,
                        Severity::Error,
                        format!("failed to discover scripts: {e}"),
                    );
                    return ExitCode::from(2);
                }
            }
        }

        explicit_files
    };

    if files_to_check.is_empty() {
        if args.format == Format::Human {
            output::tool_message(&mut stderr, Severity::Warning, "no scripts to check");
        }
        return ExitCode::SUCCESS;
    }

    // Read all file contents upfront, stripping BOM at read time so all
    // downstream byte offsets are consistent with the stored source. A file
    // that cannot be read becomes a tool-error result instead of a script.
    let mut read_failures: Vec<ScriptResult> = Vec::new();
    let file_contents: Vec<(String, String)> = files_to_check
        .iter()
        .filter_map(|path| {
            let path_str = path.display().to_string();
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    let content = resolve::strip_bom(&content).to_owned();
                    Some((path_str, content))
                }
                Err(e) => {
                    read_failures.push(ScriptResult::tool_error(
                        &path_str,
                        vec![ScriptDiagnostic::bare(
                            "read(failed)",
                            format!("cannot read script: {e}"),
                            Severity::Error,
                        )],
                    ));
                    None
                }
            }
        })
        .collect();

    // Build the engine in test mode: every load applies without suggestion.
    let mut loaders: Vec<Arc<dyn ConfigurationLoader>> = Vec::new();
    match attr::default_dir() {
        Some(dir) if !args.no_cache => {
            let store = Arc::new(AttributeStore::new(dir));
            loaders.push(Arc::new(AttributeCacheLoader::new(Arc::clone(&store))));
            loaders.push(Arc::new(DirectiveLoader::new(Some(store))));
        }
        _ => loaders.push(Arc::new(DirectiveLoader::new(None))),
    }

    let reports = Arc::new(CollectingReports::default());
    let engine = ScriptConfigurationEngine::new(
        Collaborators {
            files: Arc::new(DiskDocuments),
            definitions: Arc::clone(&definitions) as Arc<dyn DefinitionRegistry>,
            indexer: Arc::new(NoopIndexer),
            reports: Arc::clone(&reports) as Arc<dyn ReportSink>,
            panel: Arc::new(NoopPanel),
            settings: Arc::new(CliSettings {
                auto_reload: config.auto_reload,
            }),
        },
        loaders,
        EngineOptions { test_mode: true },
    );

    // Resolve each script through the engine, draining after each so the
    // worker finishes before the result is read.
    let mut results: Vec<ScriptResult> = Vec::with_capacity(file_contents.len());
    let mut configurations: Vec<Option<ScriptConfiguration>> = Vec::new();
    let mut verbose_infos: Vec<Option<VerboseScriptInfo>> = Vec::new();

    for (path_str, _) in &file_contents {
        let abs = cwd.join(path_str);
        let id = ScriptId::new(abs);
        let file_start = Instant::now();

        let definition = definitions.find(&id);
        if definition.is_none() {
            if args.strict {
                results.push(ScriptResult::failed(
                    path_str,
                    vec![ScriptDiagnostic {
                        code: "no-definition".into(),
                        message: "no script definition matches this file".into(),
                        severity: Severity::Error,
                        span: None,
                        location: None,
                        label: None,
                        help: Some(
                            "Add a definition to scl.json whose files patterns match, \
                             or adjust the discovery patterns."
                                .into(),
                        ),
                        directive: None,
                    }],
                ));
            } else {
                results.push(ScriptResult::skipped(path_str));
            }
            configurations.push(None);
            verbose_infos.push(None);
            continue;
        }

        engine.get_configuration(&id);
        engine.drain();

        let configuration = engine.cached_configuration(&id);
        let attached = reports.take(&id);
        let (errors, report_warnings): (Vec<_>, Vec<_>) = attached
            .into_iter()
            .partition(|d| d.severity == Severity::Error);
        for w in report_warnings {
            warnings.push(Warning {
                code: w.code,
                message: format!("{path_str}: {}", w.message),
            });
        }

        let result = if !errors.is_empty() {
            ScriptResult::failed(path_str, errors)
        } else if configuration.is_some() {
            ScriptResult::resolved(path_str)
        } else {
            ScriptResult::failed(
                path_str,
                vec![ScriptDiagnostic::bare(
                    "resolve(failed)",
                    "no configuration could be resolved",
                    Severity::Error,
                )],
            )
        };

        let verbose_info = if verbose {
            Some(VerboseScriptInfo {
                definition: definition.map(|d| d.name.clone()).unwrap_or_default(),
                duration: file_start.elapsed(),
            })
        } else {
            None
        };

        results.push(result);
        configurations.push(configuration);
        verbose_infos.push(verbose_info);
    }

    engine.shutdown();

    // Render verbose per-script messages before results
    if verbose && args.format == Format::Human {
        for (result, info) in results.iter().zip(&verbose_infos) {
            if let Some(info) = info {
                let status = match result.outcome {
                    ScriptOutcome::Resolved => "resolved",
                    ScriptOutcome::Skipped => "skipped (no definition)",
                    ScriptOutcome::Failed => "failed",
                    ScriptOutcome::ToolError => "error",
                };
                output::verbose_log(
                    &mut stderr,
                    &format!(
                        "{}: {status} | definition: {} | {:.0?}",
                        result.path, info.definition, info.duration,
                    ),
                );
            }
        }
    }

    // Fold unreadable files in after the engine results, keeping the
    // configurations and verbose slices parallel.
    for failure in read_failures {
        results.push(failure);
        configurations.push(None);
        verbose_infos.push(None);
    }

    // Build sources map that borrows from file_contents (no cloning)
    let sources: HashMap<&str, &str> = file_contents
        .iter()
        .map(|(p, c)| (p.as_str(), c.as_str()))
        .collect();

    let summary = Summary::tally(&results, warnings.len(), start.elapsed());

    match args.format {
        Format::Human => {
            output::render_human(&results, &warnings, &summary, &sources, &mut stderr);
        }
        Format::Json => {
            let verbose_infos = if verbose {
                Some(verbose_infos.as_slice())
            } else {
                None
            };
            let mut stdout = std::io::stdout().lock();
            output::render_json(
                &results,
                &configurations,
                &warnings,
                &summary,
                verbose_infos,
                &mut stdout,
            );
        }
    }

    // Exit code: 2 for tool errors, 1 for resolve errors, 0 for all resolved
    if summary.has_tool_error {
        ExitCode::from(2)
    } else if summary.failed_scripts > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

/// Load config, returning an error if the config fails to parse.
fn load_config(
    config_path: &Option<PathBuf>,
    cwd: &Path,
) -> Result<(Option<Config>, PathBuf), config::ConfigError> {
    if let Some(path) = config_path {
        // Explicit --config: failure is a hard error
        let cfg = Config::load(path)?;
        let abs_path = if path.is_absolute() {
            path.clone()
        } else {
            cwd.join(path)
        };
        let root = abs_path.parent().unwrap_or(cwd).to_path_buf();
        Ok((Some(cfg), root))
    } else {
        // Auto-discover: a parse failure is a tool error, absence is not
        match config::find_config_file(cwd) {
            Some(path) => {
                let cfg = Config::load(&path)?;
                let root = path.parent().unwrap_or(cwd).to_path_buf();
                Ok((Some(cfg), root))
            }
            None => Ok((None, cwd.to_path_buf())),
        }
    }
}
