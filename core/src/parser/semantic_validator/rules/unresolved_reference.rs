//! Rule: Unresolved Reference
//!
//! Warns about references whose kind has no resolver in the caller's
//! registry. Only a warning: a missing capability must not block validate or
//! compile, it only matters at run time. Without a registry the rule is silent.

use crate::parser::Document;
use crate::types::Diagnostic;

use super::super::{ValidationContext, ValidationRule};
use super::{is_valid_kind, W_UNRESOLVED_REF};

pub struct UnresolvedReferenceRule;

impl ValidationRule for UnresolvedReferenceRule {
    fn id(&self) -> &'static str {
        "unresolved-reference"
    }

    fn description(&self) -> &'static str {
        "References should have a registered capability resolver"
    }

    fn validate(&self, document: &Document, context: &ValidationContext<'_>) -> Vec<Diagnostic> {
        let Some(registry) = context.registry else {
            return Vec::new();
        };

        document
            .references
            .iter()
            // malformed kinds are reported by ReferenceKindRule
            .filter(|reference| is_valid_kind(&reference.kind))
            .filter(|reference| !registry.contains(&reference.kind))
            .map(|reference| {
                Diagnostic::warning(
                    W_UNRESOLVED_REF,
                    format!("No capability registered for '@{}'", reference.kind),
                )
                .at(reference.span)
            })
            .collect()
    }
}
