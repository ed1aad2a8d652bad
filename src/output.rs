use crate::diagnostic::{
    ResolveReport, ScriptOutcome, ScriptResult, Severity, SourceLocation, Warning, tool_report,
};
use crate::script::ScriptConfiguration;
use owo_colors::Stream::Stderr;
use owo_colors::{OwoColorize, Style};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

/// Summary statistics for an scl run.
pub struct Summary {
    pub checked_scripts: usize,
    pub resolved_scripts: usize,
    pub failed_scripts: usize,
    pub skipped_scripts: usize,
    pub total_errors: usize,
    pub total_warnings: usize,
    pub duration: Duration,
    pub has_tool_error: bool,
}

impl Summary {
    /// Tally per-script results into run statistics.
    pub fn tally(results: &[ScriptResult], total_warnings: usize, duration: Duration) -> Self {
        let mut summary = Summary {
            checked_scripts: 0,
            resolved_scripts: 0,
            failed_scripts: 0,
            skipped_scripts: 0,
            total_errors: 0,
            total_warnings,
            duration,
            has_tool_error: false,
        };
        for result in results {
            summary.total_errors += result.errors.len();
            match result.outcome {
                ScriptOutcome::Resolved => {
                    summary.checked_scripts += 1;
                    summary.resolved_scripts += 1;
                }
                ScriptOutcome::Skipped => summary.skipped_scripts += 1,
                ScriptOutcome::Failed => {
                    summary.checked_scripts += 1;
                    summary.failed_scripts += 1;
                }
                ScriptOutcome::ToolError => {
                    summary.checked_scripts += 1;
                    summary.failed_scripts += 1;
                    summary.has_tool_error = true;
                }
            }
        }
        summary
    }
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    Human,
    Json,
}

/// Per-script verbose diagnostic info collected during processing.
pub struct VerboseScriptInfo {
    /// Name of the definition that matched the script, empty if none.
    pub definition: String,
    /// Time spent resolving this script.
    pub duration: Duration,
}

/// "1 script" / "3 scripts".
fn count(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("1 {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

fn format_duration(d: Duration) -> String {
    if d.as_secs() == 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

/// Write a dimmed verbose line to stderr.
pub fn verbose_log(stderr: &mut impl Write, msg: &str) {
    let line = format!("verbose: {msg}");
    let _ = writeln!(
        stderr,
        "{}",
        line.if_supports_color(Stderr, |text| text.dimmed())
    );
}

/// Write a tool-level message to stderr through miette.
pub fn tool_message(stderr: &mut impl Write, severity: Severity, msg: impl Into<String>) {
    let _ = writeln!(stderr, "{:?}", tool_report(severity, msg));
}

/// Render results for a terminal: per-script reports first, then tool
/// warnings, then a one-glance summary.
pub fn render_human(
    results: &[ScriptResult],
    warnings: &[Warning],
    summary: &Summary,
    sources: &HashMap<&str, &str>,
    stderr: &mut impl Write,
) {
    for result in results {
        if result.outcome == ScriptOutcome::Skipped {
            continue;
        }
        let source = sources.get(result.path.as_str()).copied().unwrap_or("");
        for diagnostic in &result.errors {
            let report =
                miette::Report::new(ResolveReport::new(&result.path, source, diagnostic.clone()));
            let _ = writeln!(stderr, "{report:?}");
        }
    }

    for warning in warnings {
        tool_message(
            stderr,
            Severity::Warning,
            format!("{}: {}", warning.code, warning.message),
        );
    }

    let _ = writeln!(stderr);
    let duration = format_duration(summary.duration);
    let (headline, style) = if summary.failed_scripts == 0 {
        let text = if summary.checked_scripts == 0 {
            format!("✓ Nothing to resolve ({duration})")
        } else {
            format!(
                "✓ Resolved {} ({duration})",
                count(summary.checked_scripts, "script")
            )
        };
        (text, Style::new().green().bold())
    } else {
        (
            format!(
                "✗ {} in {}",
                count(summary.total_errors, "error"),
                count(summary.failed_scripts, "script")
            ),
            Style::new().red().bold(),
        )
    };
    let _ = writeln!(
        stderr,
        "{}",
        headline.if_supports_color(Stderr, |text| text.style(style))
    );

    let mut details: Vec<String> = Vec::new();
    if summary.failed_scripts > 0 {
        details.push(format!(
            "checked {} ({duration})",
            count(summary.checked_scripts, "script")
        ));
    }
    if summary.skipped_scripts > 0 {
        details.push(format!(
            "skipped {} (no matching definition)",
            count(summary.skipped_scripts, "file")
        ));
    }
    if !details.is_empty() {
        let line = format!("  {}", details.join(", "));
        let _ = writeln!(
            stderr,
            "{}",
            line.if_supports_color(Stderr, |text| text.dimmed())
        );
    }
}

// --- Typed JSON output, borrowing from the results ---

#[derive(Serialize)]
struct JsonReport<'a> {
    version: u32,
    resolved: bool,
    warnings: &'a [Warning],
    scripts: Vec<JsonScript<'a>>,
    summary: JsonSummary,
}

#[derive(Serialize)]
struct JsonScript<'a> {
    path: &'a str,
    resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    configuration: Option<&'a ScriptConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    definition: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
    errors: Vec<JsonError<'a>>,
}

#[derive(Serialize)]
struct JsonError<'a> {
    code: &'a str,
    message: &'a str,
    severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<JsonLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    directive: Option<&'a str>,
}

#[derive(Serialize)]
struct JsonLocation {
    line: usize,
    column: usize,
    offset: usize,
    length: usize,
}

impl From<&SourceLocation> for JsonLocation {
    fn from(loc: &SourceLocation) -> Self {
        Self {
            line: loc.line,
            column: loc.column,
            offset: loc.offset,
            length: loc.length,
        }
    }
}

#[derive(Serialize)]
struct JsonSummary {
    checked_scripts: usize,
    resolved_scripts: usize,
    failed_scripts: usize,
    skipped_scripts: usize,
    errors: usize,
    warnings: usize,
    duration_ms: u64,
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

/// Render results as JSON.
///
/// `configurations` is parallel to `results` and carries the resolved
/// configuration per script. When `verbose_infos` is `Some`, per-script
/// diagnostic fields (definition, duration) are included for agent/script
/// consumption.
pub fn render_json(
    results: &[ScriptResult],
    configurations: &[Option<ScriptConfiguration>],
    warnings: &[Warning],
    summary: &Summary,
    verbose_infos: Option<&[Option<VerboseScriptInfo>]>,
    stdout: &mut impl Write,
) {
    let scripts: Vec<JsonScript<'_>> = results
        .iter()
        .enumerate()
        .filter(|(_, result)| result.outcome != ScriptOutcome::Skipped)
        .map(|(i, result)| {
            let info = verbose_infos
                .and_then(|infos| infos.get(i))
                .and_then(Option::as_ref);
            JsonScript {
                path: &result.path,
                resolved: result.outcome == ScriptOutcome::Resolved,
                configuration: configurations.get(i).and_then(Option::as_ref),
                definition: info
                    .map(|info| info.definition.as_str())
                    .filter(|name| !name.is_empty()),
                duration_ms: info.map(|info| millis(info.duration)),
                errors: result
                    .errors
                    .iter()
                    .map(|e| JsonError {
                        code: &e.code,
                        message: &e.message,
                        severity: e.severity,
                        location: e.location.as_ref().map(JsonLocation::from),
                        directive: e.directive.as_deref(),
                    })
                    .collect(),
            }
        })
        .collect();

    let report = JsonReport {
        version: 1,
        resolved: summary.failed_scripts == 0 && !summary.has_tool_error,
        warnings,
        scripts,
        summary: JsonSummary {
            checked_scripts: summary.checked_scripts,
            resolved_scripts: summary.resolved_scripts,
            failed_scripts: summary.failed_scripts,
            skipped_scripts: summary.skipped_scripts,
            errors: summary.total_errors,
            warnings: summary.total_warnings,
            duration_ms: millis(summary.duration),
        },
    };
    let _ = writeln!(
        stdout,
        "{}",
        serde_json::to_string_pretty(&report).unwrap()
    );
}
