use std::fmt;
use std::ops::Range;

use miette::{Diagnostic, LabeledSpan};

/// The severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl From<Severity> for miette::Severity {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Error => miette::Severity::Error,
            Severity::Warning => miette::Severity::Warning,
        }
    }
}

/// Resolved source location for a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
    pub length: usize,
}

/// A structured diagnostic produced while resolving a script configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDiagnostic {
    pub code: String,
    pub message: String,
    pub severity: Severity,
    pub span: Option<Range<usize>>,
    pub location: Option<SourceLocation>,
    pub label: Option<String>,
    pub help: Option<String>,
    /// The directive key this diagnostic refers to, if any.
    pub directive: Option<String>,
}

impl ScriptDiagnostic {
    /// A diagnostic without a source location (loader failures, panics).
    pub fn bare(code: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity,
            span: None,
            location: None,
            label: None,
            help: None,
            directive: None,
        }
    }
}

/// A warning not tied to a specific script.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Warning {
    pub code: String,
    pub message: String,
}

/// How resolving one script ended, as reported by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOutcome {
    /// A configuration was resolved.
    Resolved,
    /// No script definition matched; nothing was attempted.
    Skipped,
    /// Resolution ran and produced errors (exit code 1).
    Failed,
    /// The tool itself could not process the file (exit code 2).
    ToolError,
}

/// The per-script CLI result: outcome plus the error diagnostics behind it.
#[derive(Debug, Clone)]
pub struct ScriptResult {
    pub path: String,
    pub outcome: ScriptOutcome,
    pub errors: Vec<ScriptDiagnostic>,
}

impl ScriptResult {
    pub fn resolved(path: &str) -> Self {
        Self::with_outcome(path, ScriptOutcome::Resolved, vec![])
    }

    pub fn skipped(path: &str) -> Self {
        Self::with_outcome(path, ScriptOutcome::Skipped, vec![])
    }

    pub fn failed(path: &str, errors: Vec<ScriptDiagnostic>) -> Self {
        Self::with_outcome(path, ScriptOutcome::Failed, errors)
    }

    pub fn tool_error(path: &str, errors: Vec<ScriptDiagnostic>) -> Self {
        Self::with_outcome(path, ScriptOutcome::ToolError, errors)
    }

    fn with_outcome(path: &str, outcome: ScriptOutcome, errors: Vec<ScriptDiagnostic>) -> Self {
        Self {
            path: path.to_string(),
            outcome,
            errors,
        }
    }
}

/// One resolve diagnostic prepared for terminal rendering.
///
/// Carries the diagnostic together with the script source so miette can
/// underline the offending directive. Severity is preserved (directive
/// warnings render as warnings), the label falls back to naming the
/// directive when the producer gave none, and a diagnostic without a span
/// renders as a plain message instead of pointing at an arbitrary offset.
#[derive(Debug)]
pub struct ResolveReport {
    diagnostic: ScriptDiagnostic,
    source: miette::NamedSource<String>,
}

impl ResolveReport {
    pub fn new(path: &str, source_text: &str, diagnostic: ScriptDiagnostic) -> Self {
        Self {
            diagnostic,
            source: miette::NamedSource::new(path, source_text.to_owned()),
        }
    }
}

impl fmt::Display for ResolveReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.diagnostic.code, self.diagnostic.message)
    }
}

impl std::error::Error for ResolveReport {}

impl Diagnostic for ResolveReport {
    fn severity(&self) -> Option<miette::Severity> {
        Some(self.diagnostic.severity.into())
    }

    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        self.diagnostic.span.as_ref()?;
        Some(&self.source)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let span = self.diagnostic.span.clone()?;
        let text = self.diagnostic.label.clone().or_else(|| {
            self.diagnostic
                .directive
                .as_ref()
                .map(|key| format!("in this {key} directive"))
        });
        Some(Box::new(std::iter::once(LabeledSpan::new(
            text,
            span.start,
            span.len(),
        ))))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.diagnostic
            .help
            .as_deref()
            .map(|help| Box::new(help) as Box<dyn fmt::Display + 'a>)
    }
}

/// Build a tool-level report (config failures, discovery problems) for
/// terminal rendering, preserving the severity.
pub fn tool_report(severity: Severity, message: impl Into<String>) -> miette::Report {
    miette::Report::new(
        miette::MietteDiagnostic::new(message.into()).with_severity(severity.into()),
    )
}
