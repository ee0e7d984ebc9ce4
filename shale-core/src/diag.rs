//! Diagnostics produced during shader execution.
//!
//! Recoverable conditions (out-of-bounds accesses, non-finite loads) are
//! reported as diagnostic lists through the executor's callback sinks rather
//! than as `Err` values, so execution can continue with a substituted value.

use crate::source::Source;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub source: Option<Source>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, source: Option<Source>) -> Self {
        Diagnostic { severity: Severity::Error, message: message.into(), source }
    }

    pub fn warning(message: impl Into<String>, source: Option<Source>) -> Self {
        Diagnostic { severity: Severity::Warning, message: message.into(), source }
    }

    pub fn note(message: impl Into<String>, source: Option<Source>) -> Self {
        Diagnostic { severity: Severity::Note, message: message.into(), source }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            Some(source) if source.is_known() => {
                write!(f, "{}: {} [{}]", self.severity, self.message, source)
            }
            _ => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

pub type DiagList = Vec<Diagnostic>;

/// Formats a diagnostic list the way the default sink prints it, one
/// diagnostic per line with notes indented under their parent.
pub fn format_diags(diags: &[Diagnostic]) -> String {
    let mut out = String::new();
    for diag in diags {
        if diag.severity == Severity::Note {
            out.push_str("  ");
        }
        out.push_str(&diag.to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_source() {
        let d = Diagnostic::warning("out-of-bounds memory load", Some(Source::new(3, 7)));
        assert_eq!(d.to_string(), "warning: out-of-bounds memory load [3:7]");
    }

    #[test]
    fn display_without_source() {
        let d = Diagnostic::error("barrier not reached by all invocations", None);
        assert_eq!(d.to_string(), "error: barrier not reached by all invocations");
    }

    #[test]
    fn format_list_indents_notes() {
        let diags = vec![
            Diagnostic::warning("out-of-bounds memory load", None),
            Diagnostic::note("accessing 8 byte allocation", None),
        ];
        assert_eq!(
            format_diags(&diags),
            "warning: out-of-bounds memory load\n  note: accessing 8 byte allocation\n"
        );
    }
}
