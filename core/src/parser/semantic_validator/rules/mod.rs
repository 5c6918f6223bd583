//! Validation Rules
//!
//! Each file in this module contains one validation rule:
//!
//! - `required_sections.rs` - TASK, ACTION and GOAL present exactly once
//! - `empty_section.rs` - Sections with no text
//! - `reference_kind.rs` - Reference kinds that are not `[\w:-]+`
//! - `unresolved_reference.rs` - References no registered capability serves

mod empty_section;
mod reference_kind;
mod required_sections;
mod unresolved_reference;

pub use empty_section::EmptySectionRule;
pub use reference_kind::{is_valid_kind, ReferenceKindRule};
pub use required_sections::RequiredSectionsRule;
pub use unresolved_reference::UnresolvedReferenceRule;

pub const W_UNRESOLVED_REF: &str = "W_UNRESOLVED_REF";
pub const E_REF_KIND: &str = "E_REF_KIND";
