// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used across all compiler phases, the
// registered code table, and `path:line:col` rendering for the binary.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0101`, `W0301`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registered diagnostic codes.
pub mod codes {
    use super::DiagCode;

    // E01xx: lowering (source → actor machine)
    pub const E0101: DiagCode = DiagCode("E0101"); // index out of declaration order
    pub const E0102: DiagCode = DiagCode("E0102"); // unknown port name
    pub const E0103: DiagCode = DiagCode("E0103"); // duplicate port name
    pub const E0104: DiagCode = DiagCode("E0104"); // missing or repeated `initial`
    pub const E0105: DiagCode = DiagCode("E0105"); // duplicate actor name
    pub const E0106: DiagCode = DiagCode("E0106"); // port used with the wrong direction
    pub const E0107: DiagCode = DiagCode("E0107"); // literal out of range

    // E02xx: actor machine verification
    pub const E0201: DiagCode = DiagCode("E0201"); // index reference out of range
    pub const E0202: DiagCode = DiagCode("E0202"); // cyclic scope dependency
    pub const E0203: DiagCode = DiagCode("E0203"); // empty controller / bad initial state
    pub const E0204: DiagCode = DiagCode("E0204"); // control cycle made only of tests

    // W03xx: analysis warnings
    pub const W0301: DiagCode = DiagCode("W0301"); // exec not guarded by port tests
    pub const W0302: DiagCode = DiagCode("W0302"); // state unreachable from any entry

    // E06xx: pass postcondition certificates
    pub const E0601: DiagCode = DiagCode("E0601"); // actor machine verification failed
    pub const E0602: DiagCode = DiagCode("E0602"); // controller verification failed
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

/// A compiler diagnostic emitted by any phase.
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
    /// Create a new diagnostic with no code, hint, or related spans.
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

    pub fn error(span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, span, message)
    }

    pub fn warning(span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, span, message)
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

pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}

// ── Source locations ─────────────────────────────────────────────────────

/// 1-based line and column of a byte offset. Offsets past the end clamp to
/// the last position.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source.as_bytes()[..offset];
    let line = before.iter().filter(|&&b| b == b'\n').count() + 1;
    let line_start = before
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i + 1);
    (line, offset - line_start + 1)
}

impl Diagnostic {
    /// Render as `path:line:col: level[code]: message`, followed by one
    /// `note:` line per related span. Without source text (machines loaded
    /// from JSON) locations are omitted.
    pub fn render(&self, path: &str, source: Option<&str>) -> String {
        let at = |span: Span| match source {
            Some(src) => {
                let (line, col) = line_col(src, span.start);
                format!("{path}:{line}:{col}")
            }
            None => path.to_string(),
        };
        let mut out = format!("{}: {}", at(self.span), self);
        if source.is_some() {
            for related in &self.related_spans {
                out.push_str(&format!("\n  {}: note: {}", at(related.span), related.label));
            }
        }
        out
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
