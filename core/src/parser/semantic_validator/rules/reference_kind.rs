//! Rule: Reference Kind
//!
//! Reference kinds must match `^[\w:-]+$`. The lexer only produces such
//! kinds, so in practice this catches `@{ ... }` with no kind at all,
//! `CALL API @kind` targets (read from plain statement text) and documents
//! assembled by hand.

use crate::parser::lexer::is_kind_char;
use crate::parser::statements::ApiTarget;
use crate::parser::Document;
use crate::types::Diagnostic;

use super::super::{ValidationContext, ValidationRule};
use super::E_REF_KIND;

pub fn is_valid_kind(kind: &str) -> bool {
    !kind.is_empty() && kind.chars().all(is_kind_char)
}

pub struct ReferenceKindRule;

impl ValidationRule for ReferenceKindRule {
    fn id(&self) -> &'static str {
        "reference-kind"
    }

    fn description(&self) -> &'static str {
        "Reference kinds may only contain word characters, ':' and '-'"
    }

    fn validate(&self, document: &Document, _context: &ValidationContext<'_>) -> Vec<Diagnostic> {
        let references = document
            .references
            .iter()
            .map(|reference| (reference.kind.as_str(), reference.span));
        let api_targets = document
            .api_calls
            .iter()
            .filter_map(|statement| match &statement.call.target {
                ApiTarget::Reference { kind } => Some((kind.as_str(), statement.span)),
                ApiTarget::Service { .. } => None,
            });

        references
            .chain(api_targets)
            .filter(|(kind, _)| !is_valid_kind(kind))
            .map(|(kind, span)| {
                Diagnostic::error(E_REF_KIND, format!("Invalid reference kind '{}'", kind)).at(span)
            })
            .collect()
    }
}
