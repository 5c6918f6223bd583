use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

use crate::compiler::CompiledForm;
use crate::parser::Document;

/// Source location of a token or construct. Lines and columns are 1-based,
/// columns count characters rather than bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub line: usize,
    pub column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize, end_line: usize, end_column: usize) -> Self {
        Self {
            line,
            column,
            end_line,
            end_column,
        }
    }

    /// Zero-width span at a single position
    pub fn point(line: usize, column: usize) -> Self {
        Self::new(line, column, line, column)
    }

    /// Create a span that covers both self and other
    pub fn merge(&self, other: &Span) -> Span {
        let (line, column) = (self.line, self.column).min((other.line, other.column));
        let (end_line, end_column) =
            (self.end_line, self.end_column).max((other.end_line, other.end_column));
        Span::new(line, column, end_line, end_column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A structured report produced by parsing, validation or execution.
///
/// Diagnostics are data: nothing in the core raises them as errors except
/// `Engine::run`, which refuses to execute a document with error diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub severity: Severity,
    /// Stable machine-readable code (e.g. `E_TASK`, `W_UNRESOLVED_REF`)
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, rename = "col", skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

impl Diagnostic {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Error,
            code: code.into(),
            line: None,
            column: None,
        }
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, message)
        }
    }

    /// Attach the start position of `span`
    pub fn at(mut self, span: Span) -> Self {
        self.line = Some(span.line);
        self.column = Some(span.column);
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match (self.line, self.column) {
            (Some(line), Some(col)) => write!(
                f,
                "{} at line {}, col {}: {} [{}]",
                severity, line, col, self.message, self.code
            ),
            _ => write!(f, "{}: {} [{}]", severity, self.message, self.code),
        }
    }
}

/// Outcome of `validate`. `ok` is true iff `diagnostics` holds no error.
///
/// Lexical and syntactic anomalies are listed separately in
/// `parse_diagnostics` and never affect `ok`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub ok: bool,
    pub diagnostics: Vec<Diagnostic>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parse_diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    pub fn from_diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            ok: !diagnostics.iter().any(Diagnostic::is_error),
            diagnostics,
            parse_diagnostics: Vec::new(),
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }
}

/// Outcome of `compile`: the parsed document, the compiled form, and every
/// parse and validation diagnostic (errors included).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileResult {
    pub ast: Document,
    pub json: CompiledForm,
    pub warnings: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Context handed to every capability resolver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctx: Option<Map<String, JsonValue>>,
}

/// Compiled form augmented with the outputs collected during execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    #[serde(flatten)]
    pub form: CompiledForm,
    /// Resolver outputs by reference kind, in source order
    pub resolved: BTreeMap<String, Vec<JsonValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub logs: Vec<String>,
    pub result: RunOutput,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}
