// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used by name resolution and by the
// conversion of scheduling errors into user-facing reports.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0001`, `E0200`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable codes, grouped by the phase that reports them.
pub mod codes {
    use super::DiagCode;

    // Front end (parse / resolve)
    pub const E0001: DiagCode = DiagCode("E0001"); // syntax error
    pub const E0002: DiagCode = DiagCode("E0002"); // duplicate definition
    pub const E0003: DiagCode = DiagCode("E0003"); // undefined name
    pub const E0004: DiagCode = DiagCode("E0004"); // arity mismatch
    pub const E0005: DiagCode = DiagCode("E0005"); // unknown element type
    pub const E0006: DiagCode = DiagCode("E0006"); // misplaced update / output
    pub const E0007: DiagCode = DiagCode("E0007"); // invalid range
    pub const W0001: DiagCode = DiagCode("W0001"); // shadowed dimension name

    // Estimates and graph construction
    pub const E0100: DiagCode = DiagCode("E0100"); // missing output estimate
    pub const E0101: DiagCode = DiagCode("E0101"); // dependency cycle
    pub const E0102: DiagCode = DiagCode("E0102"); // dangling stage
    pub const E0103: DiagCode = DiagCode("E0103"); // other stage graph errors

    // Bounds
    pub const E0200: DiagCode = DiagCode("E0200"); // unbounded region

    // Configuration
    pub const E0300: DiagCode = DiagCode("E0300"); // malformed machine parameters
    pub const E0301: DiagCode = DiagCode("E0301"); // malformed target

    // Schedule text
    pub const E0400: DiagCode = DiagCode("E0400"); // malformed schedule

    // Internal
    pub const E0500: DiagCode = DiagCode("E0500"); // schedule verification failed
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint or related spans.
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
        }
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// Render a diagnostic with a `line:col` prefix resolved against `source`.
pub fn render(diag: &Diagnostic, path: &str, source: &str) -> String {
    let (line, col) = line_col(source, diag.span.start);
    let mut out = format!("{path}:{line}:{col}: {diag}");
    for related in &diag.related_spans {
        let (rl, rc) = line_col(source, related.span.start);
        out.push_str(&format!("\n  note: {} ({path}:{rl}:{rc})", related.label));
    }
    out
}

fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let col = before.rfind('\n').map_or(offset, |nl| offset - nl - 1) + 1;
    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_span() -> Span {
        (0..1).into()
    }

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, dummy_span(), "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code() {
        let d = Diagnostic::new(DiagLevel::Warning, dummy_span(), "shadowed dimension")
            .with_code(codes::W0001);
        assert_eq!(format!("{d}"), "warning[W0001]: shadowed dimension");
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::new(DiagLevel::Error, dummy_span(), "unbounded region")
            .with_code(codes::E0200)
            .with_hint("declare a domain")
            .with_related(dummy_span(), "stage defined here");

        assert_eq!(d.code, Some(codes::E0200));
        assert_eq!(d.hint.as_deref(), Some("declare a domain"));
        assert_eq!(d.related_spans.len(), 1);
        assert!(d.is_error());
    }

    #[test]
    fn render_resolves_line_and_column() {
        let source = "input a(x: [0, 4])\nfunc f(x) = b(x)\n";
        let d = Diagnostic::new(DiagLevel::Error, (31..32).into(), "undefined name 'b'")
            .with_code(codes::E0003);
        assert_eq!(
            render(&d, "p.stg", source),
            "p.stg:2:13: error[E0003]: undefined name 'b'"
        );
    }
}
