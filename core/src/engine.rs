//! # Engine
//!
//! Entry points shared by every adapter: `validate`, `compile` and `run`.
//!
//! An [`Engine`] binds a capability registry. The free functions at the
//! bottom of this module use an empty one.
//!
//! ## Run phases
//!
//! ```text
//! Init -> Validating -> Valid   -> Compiling -> Executing -> Done
//!                    \-> Invalid (terminal, RunError::Invalid)
//! ```

use std::sync::Arc;

use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use crate::compiler::{compile_source, lower};
use crate::interpreter::{CapabilityRegistry, ExecutionLog, Interpreter};
use crate::parser::parse_source;
use crate::parser::semantic_validator::validate_document;
use crate::types::{
    CompileResult, Diagnostic, RunOptions, RunOutput, RunResult, Span, ValidationResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Validating,
    Valid,
    Invalid,
    Compiling,
    Executing,
    Done,
}

impl RunPhase {
    fn can_advance_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Init, Validating)
                | (Validating, Valid)
                | (Validating, Invalid)
                | (Valid, Compiling)
                | (Compiling, Executing)
                | (Executing, Done)
        )
    }

    fn advance(&mut self, next: RunPhase) {
        debug_assert!(
            self.can_advance_to(next),
            "illegal run transition {:?} -> {:?}",
            self,
            next
        );
        tracing::debug!(from = ?self, to = ?next, "run phase");
        *self = next;
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    /// Validation reported at least one error; nothing was executed
    #[error("Invalid LMTagScript: {}", diagnostics_json(.diagnostics))]
    Invalid { diagnostics: Vec<Diagnostic> },
}

impl RunError {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            RunError::Invalid { diagnostics } => diagnostics,
        }
    }
}

fn diagnostics_json(diagnostics: &[Diagnostic]) -> String {
    serde_json::to_string(diagnostics).unwrap_or_else(|_| format!("{:?}", diagnostics))
}

#[derive(Debug, Clone, Default)]
pub struct Engine {
    registry: Arc<CapabilityRegistry>,
}

impl Engine {
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// An empty registry has nothing to check references against.
    fn checked_registry(&self) -> Option<&CapabilityRegistry> {
        Some(self.registry.as_ref()).filter(|registry| !registry.is_empty())
    }

    /// Check the required sections and references. Lexical and syntactic
    /// problems are returned in `parse_diagnostics` and never affect `ok`.
    pub fn validate(&self, source: &str) -> ValidationResult {
        let (document, parse_diagnostics) = parse_source(source);
        let mut result = validate_document(&document, self.checked_registry());
        result.parse_diagnostics = parse_diagnostics;
        result
    }

    /// Best-effort compilation; every diagnostic comes back in `warnings`.
    pub fn compile(&self, source: &str) -> CompileResult {
        let output = compile_source(source, self.checked_registry());
        CompileResult {
            ast: output.document,
            json: output.form,
            warnings: output.diagnostics,
        }
    }

    /// Validate, compile and execute `source`. Fails only when validation
    /// reports an error; resolver problems end up in the log and diagnostics.
    pub async fn run(&self, source: &str, options: RunOptions) -> Result<RunResult, RunError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", run_id = %run_id);
        self.run_phases(source, options).instrument(span).await
    }

    async fn run_phases(&self, source: &str, options: RunOptions) -> Result<RunResult, RunError> {
        let mut phase = RunPhase::Init;
        let mut log = ExecutionLog::new();

        phase.advance(RunPhase::Validating);
        let (document, parse_diagnostics) = parse_source(source);
        // Unresolved kinds are reported by the interpreter, once per reference
        let validation = validate_document(&document, None);
        if !validation.ok {
            phase.advance(RunPhase::Invalid);
            tracing::info!(errors = validation.errors().count(), "rejected invalid source");
            return Err(RunError::Invalid {
                diagnostics: validation.diagnostics,
            });
        }
        phase.advance(RunPhase::Valid);
        log.push("validate: ok");

        phase.advance(RunPhase::Compiling);
        let form = lower(&document);
        log.push(format!("compile: task='{}'", form.task));

        phase.advance(RunPhase::Executing);
        let context = options.ctx.unwrap_or_default();
        let locations: Vec<Span> = document.references.iter().map(|r| r.span).collect();
        let execution = Interpreter::new(&self.registry)
            .with_locations(&locations)
            .execute(&form, &context, log)
            .await;

        phase.advance(RunPhase::Done);
        tracing::info!(
            refs = form.refs.len(),
            resolved = execution.resolved.values().map(Vec::len).sum::<usize>(),
            "run finished"
        );

        let mut diagnostics = parse_diagnostics;
        diagnostics.extend(validation.diagnostics);
        diagnostics.extend(execution.diagnostics);

        Ok(RunResult {
            logs: execution.log.into_entries(),
            result: RunOutput {
                form,
                resolved: execution.resolved,
            },
            diagnostics,
        })
    }
}

/// Validate with no registry
pub fn validate(source: &str) -> ValidationResult {
    Engine::default().validate(source)
}

/// Compile with no registry
pub fn compile(source: &str) -> CompileResult {
    Engine::default().compile(source)
}

/// Run with an empty registry: every reference is logged as unresolved
pub async fn run(source: &str, options: RunOptions) -> Result<RunResult, RunError> {
    Engine::default().run(source, options).await
}
