//! Rule: Empty Section
//!
//! A section header with nothing after it (`TASK:` followed by a blank line)
//! is an error, reported once per occurrence.

use crate::parser::Document;
use crate::types::Diagnostic;

use super::super::{ValidationContext, ValidationRule};

pub struct EmptySectionRule;

impl ValidationRule for EmptySectionRule {
    fn id(&self) -> &'static str {
        "empty-section"
    }

    fn description(&self) -> &'static str {
        "Sections must contain text"
    }

    fn validate(&self, document: &Document, _context: &ValidationContext<'_>) -> Vec<Diagnostic> {
        document
            .sections
            .iter()
            .filter(|section| section.body.trim().is_empty())
            .map(|section| {
                Diagnostic::error(
                    format!("E_EMPTY_{}", section.kind.keyword()),
                    format!("Empty {} section", section.kind),
                )
                .at(section.span)
            })
            .collect()
    }
}
