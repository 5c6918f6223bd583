//! # Interpreter
//!
//! Walks a [`CompiledForm`] and hands every reference annotation to the
//! resolver registered for its kind.
//!
//! ## Core Principles
//!
//! 1. **Sequential**: references resolve one at a time in source order, each
//!    awaited before the next, so identical input gives an identical log
//! 2. **Partial failure**: a missing or failing resolver is logged and
//!    diagnosed, and the run moves on to the next reference
//! 3. **Read-only registry**: the interpreter only borrows the registry
//!
//! Control blocks and `CALL API` statements in the form are data for the
//! host; the interpreter does not evaluate them. References written inside a
//! block resolve like any other.

pub mod registry;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::compiler::CompiledForm;
use crate::types::{Diagnostic, Span};

pub use registry::{CapabilityRegistry, CapabilityResolver, RegistryError, ResolveRequest};

pub const W_UNRESOLVED_REF: &str = crate::parser::semantic_validator::rules::W_UNRESOLVED_REF;
pub const E_RESOLVER: &str = "E_RESOLVER";

/// Append-only, ordered log of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionLog(Vec<String>);

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: impl Into<String>) {
        let entry = entry.into();
        tracing::debug!(entry = %entry, "log");
        self.0.push(entry);
    }

    pub fn entries(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_entries(self) -> Vec<String> {
        self.0
    }
}

/// What one pass over the references produced
#[derive(Debug, Clone, Default)]
pub struct Execution {
    pub log: ExecutionLog,
    /// Resolver outputs by kind, in source order
    pub resolved: BTreeMap<String, Vec<Value>>,
    pub diagnostics: Vec<Diagnostic>,
}

pub struct Interpreter<'r> {
    registry: &'r CapabilityRegistry,
    /// Source span of each reference, by index into `form.refs`
    locations: &'r [Span],
}

impl<'r> Interpreter<'r> {
    pub fn new(registry: &'r CapabilityRegistry) -> Self {
        Self {
            registry,
            locations: &[],
        }
    }

    /// Attach reference spans so diagnostics point at the source. A compiled
    /// form alone carries no positions.
    pub fn with_locations(mut self, locations: &'r [Span]) -> Self {
        self.locations = locations;
        self
    }

    fn locate(&self, index: usize, diagnostic: Diagnostic) -> Diagnostic {
        match self.locations.get(index) {
            Some(span) => diagnostic.at(*span),
            None => diagnostic,
        }
    }

    /// Resolve every reference of `form`, appending to `log`.
    pub async fn execute(
        &self,
        form: &CompiledForm,
        context: &Map<String, Value>,
        log: ExecutionLog,
    ) -> Execution {
        let mut execution = Execution {
            log,
            ..Execution::default()
        };

        for (index, reference) in form.refs.iter().enumerate() {
            let kind = reference.kind.as_str();
            let Some(resolver) = self.registry.lookup(kind) else {
                execution.log.push(format!("unresolved: {}", kind));
                execution.diagnostics.push(self.locate(
                    index,
                    Diagnostic::warning(
                        W_UNRESOLVED_REF,
                        format!("No capability registered for '@{}'", kind),
                    ),
                ));
                continue;
            };

            let request = ResolveRequest {
                kind,
                target: reference.target.as_deref(),
                body: &reference.body,
                params: &reference.params,
                context,
            };
            match resolver.resolve(request).await {
                Ok(value) => {
                    execution.log.push(format!("resolved: {}", kind));
                    execution
                        .resolved
                        .entry(kind.to_string())
                        .or_default()
                        .push(value);
                }
                Err(err) => {
                    let message = format!("{:#}", err);
                    tracing::warn!(kind = %kind, error = %message, "capability resolver failed");
                    execution.log.push(format!("error in {}: {}", kind, message));
                    execution.diagnostics.push(self.locate(
                        index,
                        Diagnostic::error(
                            E_RESOLVER,
                            format!("Resolver for '@{}' failed: {}", kind, message),
                        ),
                    ));
                }
            }
        }

        execution
    }
}
