//! Semantic Validation for LMTagScript documents
//!
//! This module provides an extensible rule-based validation system that runs
//! after parsing to catch problems the grammar can't express: missing or
//! duplicated sections, empty sections, malformed reference kinds and
//! references no capability can serve.
//!
//! # Usage
//!
//! ```ignore
//! use lmtagscript_core::parser::{parse_source, semantic_validator::validate_document};
//!
//! let (document, _) = parse_source(source);
//! let result = validate_document(&document, None);
//! if !result.ok {
//!     // Handle validation errors
//! }
//! ```
//!
//! # Architecture
//!
//! 1. **ValidationRule trait** - Each rule implements this trait
//! 2. **Validator** - Collects and runs all rules
//! 3. **Diagnostic** - The output of validation (errors and warnings)
//!
//! Every rule runs even when an earlier one reported errors.
//!
//! # Adding a New Rule
//!
//! 1. Create a new file in `semantic_validator/rules/`
//! 2. Implement `ValidationRule` for your struct
//! 3. Add it to the `Validator::new()` constructor

pub mod rules;

use crate::interpreter::registry::CapabilityRegistry;
use crate::types::{Diagnostic, ValidationResult};

use super::Document;

/// What a rule may consult besides the document itself.
#[derive(Clone, Copy, Default)]
pub struct ValidationContext<'a> {
    /// Registry to check reference kinds against, when the caller has one
    pub registry: Option<&'a CapabilityRegistry>,
}

/// Trait that all validation rules must implement.
///
/// Rules should be independent: they never look at another rule's output.
pub trait ValidationRule: Send + Sync {
    /// Unique identifier for this rule (e.g., "required-sections")
    fn id(&self) -> &'static str;

    /// Human-readable description of what this rule checks
    fn description(&self) -> &'static str;

    /// Run the validation and return any diagnostics found.
    fn validate(&self, document: &Document, context: &ValidationContext<'_>) -> Vec<Diagnostic>;
}

/// The main validator that orchestrates all validation rules.
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    /// Create a new validator with all built-in rules.
    pub fn new() -> Self {
        Self {
            rules: vec![
                // Error rules
                Box::new(rules::RequiredSectionsRule),
                Box::new(rules::EmptySectionRule),
                Box::new(rules::ReferenceKindRule),
                // Warning rules
                Box::new(rules::UnresolvedReferenceRule),
            ],
        }
    }

    /// Run all validation rules and collect diagnostics in rule order.
    pub fn validate(&self, document: &Document, context: &ValidationContext<'_>) -> Vec<Diagnostic> {
        self.rules
            .iter()
            .flat_map(|rule| {
                let found = rule.validate(document, context);
                if !found.is_empty() {
                    tracing::debug!(rule = rule.id(), count = found.len(), "rule reported");
                }
                found
            })
            .collect()
    }

    /// Get a list of all registered rules (useful for documentation)
    pub fn rules(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.rules.iter().map(|r| (r.id(), r.description()))
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a parsed document.
///
/// Reference kinds are only checked for resolvers when `registry` is given;
/// an unresolved kind is a warning and never makes `ok` false.
pub fn validate_document(
    document: &Document,
    registry: Option<&CapabilityRegistry>,
) -> ValidationResult {
    let context = ValidationContext { registry };
    ValidationResult::from_diagnostics(Validator::new().validate(document, &context))
}
