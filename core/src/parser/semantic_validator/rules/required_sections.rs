//! Rule: Required Sections
//!
//! Every document needs exactly one TASK, one ACTION and one GOAL.
//!
//! ```lmtagscript
//! ACTION: deploy        // Error E_TASK: Missing TASK
//! GOAL: success
//! GOAL: again           // Error E_DUP_GOAL: Duplicate GOAL section
//! ```

use crate::parser::{Document, SectionKind};
use crate::types::Diagnostic;

use super::super::{ValidationContext, ValidationRule};

pub struct RequiredSectionsRule;

impl ValidationRule for RequiredSectionsRule {
    fn id(&self) -> &'static str {
        "required-sections"
    }

    fn description(&self) -> &'static str {
        "TASK, ACTION and GOAL must each appear exactly once"
    }

    fn validate(&self, document: &Document, _context: &ValidationContext<'_>) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for kind in SectionKind::ALL {
            let mut occurrences = document.sections_of(kind);
            if occurrences.next().is_none() {
                diagnostics.push(Diagnostic::error(
                    format!("E_{}", kind.keyword()),
                    format!("Missing {}", kind),
                ));
                continue;
            }
            for duplicate in occurrences {
                diagnostics.push(
                    Diagnostic::error(
                        format!("E_DUP_{}", kind.keyword()),
                        format!("Duplicate {} section", kind),
                    )
                    .at(duplicate.span),
                );
            }
        }

        diagnostics
    }
}
