use std::ops::Range;

use crate::diagnostic::{ScriptDiagnostic, Severity, SourceLocation};

/// Keys recognized in a script's directive header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKey {
    /// A dependency root (library/archive path).
    Require,
    /// An additional source root.
    Source,
    /// A compiler option, passed through verbatim.
    Option,
    /// Another script whose content affects this script's configuration.
    Import,
}

impl DirectiveKey {
    fn parse(key: &str) -> Option<Self> {
        match key {
            "require" => Some(Self::Require),
            "source" => Some(Self::Source),
            "option" => Some(Self::Option),
            "import" => Some(Self::Import),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Require => "require",
            Self::Source => "source",
            Self::Option => "option",
            Self::Import => "import",
        }
    }
}

/// One well-formed header directive.
#[derive(Debug, Clone)]
pub struct Directive {
    pub key: DirectiveKey,
    pub value: String,
    /// Byte span of the (trimmed) value within the source.
    pub value_span: Range<usize>,
}

/// Result of scanning a script header: the directives that parsed plus
/// diagnostics for the lines that did not.
#[derive(Debug, Default)]
pub struct ScriptHeader {
    pub directives: Vec<Directive>,
    pub diagnostics: Vec<ScriptDiagnostic>,
}

/// Scan the directive header of a script.
///
/// The header is the leading run of comment lines (and blank lines), after
/// an optional `#!` shebang on the first line. Lines of the form
/// `//# key: value` are directives; other `//` lines are plain comments.
/// The first non-comment, non-blank line ends the header.
pub fn scan_header(source: &str) -> ScriptHeader {
    let source = strip_bom(source);
    let line_starts = compute_line_starts(source);
    let mut header = ScriptHeader::default();

    let mut offset = 0;
    for (index, raw) in source.split_inclusive('\n').enumerate() {
        let next_offset = offset + raw.len();
        let line = raw.strip_suffix('\n').unwrap_or(raw);
        let line = line.strip_suffix('\r').unwrap_or(line);
        let trimmed = line.trim_start();
        let trimmed_start = offset + (line.len() - trimmed.len());

        if index == 0 && trimmed.starts_with("#!") {
            offset = next_offset;
            continue;
        }
        if trimmed.is_empty() {
            offset = next_offset;
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("//#") {
            scan_directive(rest, trimmed_start + 3, &line_starts, &mut header);
        } else if !trimmed.starts_with("//") {
            break;
        }
        offset = next_offset;
    }

    header
}

/// Parse the text after `//#` on one header line.
fn scan_directive(rest: &str, rest_start: usize, line_starts: &[usize], header: &mut ScriptHeader) {
    let trimmed = rest.trim();
    let span = subspan(rest, trimmed, rest_start);

    let Some(colon) = rest.find(':') else {
        header.diagnostics.push(diagnostic(
            "directive(syntax)",
            "missing ':' after directive key".to_string(),
            Severity::Error,
            span,
            line_starts,
            Some("Write directives as `//# key: value`.".into()),
            None,
        ));
        return;
    };

    let key = rest[..colon].trim();
    let key_span = subspan(&rest[..colon], key, rest_start);
    let value = rest[colon + 1..].trim();
    let value_span = subspan(&rest[colon + 1..], value, rest_start + colon + 1);

    let Some(parsed_key) = DirectiveKey::parse(key) else {
        header.diagnostics.push(diagnostic(
            "directive(unknown)",
            format!("unknown directive key '{key}'"),
            Severity::Warning,
            key_span,
            line_starts,
            Some("Known keys are `require`, `source`, `option`, and `import`.".into()),
            Some(key.to_string()),
        ));
        return;
    };

    if value.is_empty() {
        header.diagnostics.push(diagnostic(
            "directive(empty)",
            format!("directive '{key}' has no value"),
            Severity::Error,
            key_span,
            line_starts,
            None,
            Some(key.to_string()),
        ));
        return;
    }

    header.directives.push(Directive {
        key: parsed_key,
        value: value.to_string(),
        value_span,
    });
}

fn diagnostic(
    code: &str,
    message: String,
    severity: Severity,
    span: Range<usize>,
    line_starts: &[usize],
    help: Option<String>,
    directive: Option<String>,
) -> ScriptDiagnostic {
    let location = Some(locate(line_starts, &span));
    ScriptDiagnostic {
        code: code.to_string(),
        message,
        severity,
        span: Some(span),
        location,
        label: None,
        help,
        directive,
    }
}

/// Byte span of `part` (a trimmed slice of `text`) relative to `base`,
/// the offset of `text` within the source.
fn subspan(text: &str, part: &str, base: usize) -> Range<usize> {
    let leading = text.len() - text.trim_start().len();
    let start = base + leading;
    start..start + part.len()
}

/// Strip a leading UTF-8 BOM so byte offsets line up with the stored source.
pub fn strip_bom(source: &str) -> &str {
    source.strip_prefix('\u{feff}').unwrap_or(source)
}

/// Byte offsets of line starts, for offset→line/column conversion.
pub fn compute_line_starts(source: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, b) in source.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

/// Convert a byte offset to a 1-based (line, column) pair. Columns are byte
/// columns within the line.
pub fn offset_to_line_col(line_starts: &[usize], offset: usize) -> (usize, usize) {
    let line_idx = line_starts.partition_point(|&s| s <= offset).saturating_sub(1);
    (line_idx + 1, offset - line_starts[line_idx] + 1)
}

/// Resolve a byte span to a [`SourceLocation`].
pub fn locate(line_starts: &[usize], span: &Range<usize>) -> SourceLocation {
    let (line, column) = offset_to_line_col(line_starts, span.start);
    SourceLocation {
        line,
        column,
        offset: span.start,
        length: span.len(),
    }
}
