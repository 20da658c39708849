//! Diagnostic rendering and the compiler error type
//!
//! A [`Diagnostic`] formats as `file:line:col: severity: message`, followed by
//! the offending source line and a caret underline. Attached notes render
//! after the main message (e.g. "first defined here" on a macro
//! redefinition). When the span originates from a macro expansion or an
//! included file, the invocation chain is reported first.

use crate::token::{OriginKind, Span};
use std::fmt;
use std::fmt::Write as _;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Severity {
    fn label(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
    pub notes: Vec<Diagnostic>,
}

impl Diagnostic {
    pub fn error(span: Span, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            span,
            notes: Vec::new(),
        }
    }

    pub fn warning(span: Span, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            span,
            notes: Vec::new(),
        }
    }

    pub fn note(span: Span, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Note,
            message: message.into(),
            span,
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: Diagnostic) -> Self {
        self.notes.push(note);
        self
    }

    /// Render the diagnostic, its origin chain, and its notes.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        for note in &self.notes {
            note.render_into(&mut out);
        }
        out
    }

    fn render_into(&self, out: &mut String) {
        // report the expansion chain first
        if let Some(origin) = &self.span.origin {
            match origin.kind {
                OriginKind::Included => {
                    Diagnostic::note(origin.token.span.clone(), "in file included from:")
                        .render_into(out);
                }
                OriginKind::Macro => {
                    let msg =
                        format!("in expansion of macro '{}':", origin.token.span.text());
                    Diagnostic::note(origin.token.span.clone(), msg).render_into(out);
                }
                OriginKind::MacroArg => {}
            }
        }

        let span = &self.span;
        let _ = writeln!(
            out,
            "{}:{}:{}: {}: {}",
            span.file.name,
            span.line,
            span.column(),
            self.severity.label(),
            self.message
        );

        let line = span.line_text();
        let trimmed = line.trim_start();
        let stripped = line.len() - trimmed.len();
        let _ = writeln!(out, "        {}", trimmed);

        // caret underline, tildes for the remainder of the span
        let col = span.start.saturating_sub(span.line_start);
        let mut underline = String::from("        ");
        for _ in stripped..col {
            underline.push(' ');
        }
        underline.push('^');
        for _ in 1..span.len.max(1) {
            underline.push('~');
        }
        let _ = writeln!(out, "{}", underline);
    }
}

/// Error type threaded through every compilation stage.
#[derive(Debug)]
pub enum CompileError {
    /// A user-facing diagnostic with source context
    Diag(Box<Diagnostic>),
    /// A file could not be read or written
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// A compiler bug: an invariant the stages maintain was violated.
    /// Never reachable from user input.
    Internal(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Diag(diag) => write!(f, "{}", diag.render().trim_end()),
            CompileError::Io { path, source } => {
                write!(f, "{}: {}", path.display(), source)
            }
            CompileError::Internal(msg) => write!(f, "internal compiler error: {}", msg),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<Diagnostic> for CompileError {
    fn from(diag: Diagnostic) -> Self {
        CompileError::Diag(Box::new(diag))
    }
}
