//! Compile-time diagnostics.
//!
//! Each error carries a kind, a message, and the byte span it points at.
//! Passes report into a [`Diagnostics`] collector and keep going where
//! recovery is safe; the driver aborts between passes when anything was
//! reported, so a single run surfaces as many independent errors as
//! possible.

use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

use crate::ast::CodeRange;

/// Categories of compile-time failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ErrorKind {
    ParseError,
    NameError,
    TypeError,
    /// Comptime evaluation failures (division by zero, out-of-bounds
    /// indexing of a constant). Never demoted to runtime.
    ValueError,
    AttributeError,
    ImportError,
    UnsupportedFeatureError,
}

#[derive(Debug, Clone)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    pub range: CodeRange,
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, range: CodeRange) -> Self {
        Self {
            kind,
            message: message.into(),
            range,
        }
    }

    /// Renders the error with line/column resolved against the source.
    pub fn render(&self, filename: &str, source: &str) -> String {
        let (line, col) = line_col(source, self.range.start as usize);
        format!("{filename}:{line}:{col}: {}: {}", self.kind, self.message)
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// 1-based line and column for a byte offset.
fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let clamped = offset.min(source.len());
    let before = &source[..clamped];
    let line = before.bytes().filter(|b| *b == b'\n').count() + 1;
    let col = before.rfind('\n').map_or(clamped + 1, |nl| clamped - nl);
    (line, col)
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Pass-level error collector.
///
/// Errors accumulate within a pass; `finish` converts the collection into
/// a pass result so the driver can stop before the next pass runs on
/// broken input.
#[derive(Debug, Default)]
pub struct Diagnostics {
    errors: Vec<CompileError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, error: CompileError) {
        self.errors.push(error);
    }

    pub fn error(&mut self, kind: ErrorKind, message: impl Into<String>, range: CodeRange) {
        self.report(CompileError::new(kind, message, range));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(self) -> Result<(), Vec<CompileError>> {
        if self.errors.is_empty() { Ok(()) } else { Err(self.errors) }
    }

    pub fn into_errors(self) -> Vec<CompileError> {
        self.errors
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::line_col;

    #[test]
    fn line_col_resolution() {
        let src = "a = 1\nb = 2\nc = 3\n";
        assert_eq!(line_col(src, 0), (1, 1));
        assert_eq!(line_col(src, 6), (2, 1));
        assert_eq!(line_col(src, 10), (2, 5));
    }
}
