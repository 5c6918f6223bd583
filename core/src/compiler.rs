//! Compiler: lowers a parsed document into the versioned `CompiledForm`.
//!
//! Compilation never fails. It always parses and validates first and returns
//! the form together with every diagnostic, so editors and other tooling get
//! a usable result while the user is still typing. Missing sections lower to
//! empty strings and duplicates keep their first occurrence.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::interpreter::registry::CapabilityRegistry;
use crate::parser::semantic_validator::validate_document;
use crate::parser::statements::{ApiCall, Block};
use crate::parser::{parse_source, Document, ReferenceAnnotation, ReferenceType, SectionKind};
use crate::types::Diagnostic;

pub const FORM_TYPE: &str = "LMTagScript";

/// Bump whenever the serialized shape of `CompiledForm` changes.
pub const FORMAT_VERSION: &str = "0.2";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledRef {
    pub kind: String,
    #[serde(rename = "type")]
    pub ref_type: ReferenceType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub body: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl From<&ReferenceAnnotation> for CompiledRef {
    fn from(reference: &ReferenceAnnotation) -> Self {
        CompiledRef {
            kind: reference.kind.clone(),
            ref_type: reference.ref_type(),
            name: reference.name().to_string(),
            target: reference.target.clone(),
            body: reference.body.clone(),
            params: reference.params.clone(),
        }
    }
}

/// Stable, serializable result of compilation. This is the only structure
/// meant to cross process boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledForm {
    #[serde(rename = "type")]
    pub form_type: String,
    pub format_version: String,
    pub task: String,
    pub action: String,
    pub goal: String,
    pub refs: Vec<CompiledRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<Block>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_calls: Vec<ApiCall>,
}

impl CompiledForm {
    pub fn section(&self, kind: SectionKind) -> &str {
        match kind {
            SectionKind::Task => &self.task,
            SectionKind::Action => &self.action,
            SectionKind::Goal => &self.goal,
        }
    }

    /// Serialize back to LMTagScript source. Compiling the rendered text
    /// yields a form equal to `self`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for kind in SectionKind::ALL {
            let _ = write!(out, "{}: {}\n\n", kind, self.section(kind));
        }
        for block in &self.blocks {
            render_block(&mut out, block);
        }
        for call in &self.api_calls {
            let _ = writeln!(out, "{}", call);
        }
        for reference in &self.refs {
            render_ref(&mut out, reference);
        }
        out
    }
}

fn render_block(out: &mut String, block: &Block) {
    let mut branch = |header: String, body: &str| {
        out.push_str(&header);
        out.push('\n');
        if !body.is_empty() {
            out.push_str(body);
            out.push('\n');
        }
    };
    match block {
        Block::If {
            condition,
            then_body,
            else_body,
        } => {
            branch(format!("IF {} THEN", condition), then_body);
            if !else_body.is_empty() {
                branch("ELSE".to_string(), else_body);
            }
        }
        Block::ForEach {
            variable,
            collection,
            body,
        } => branch(format!("FOR EACH {} IN {} DO", variable, collection), body),
        Block::OnError { body } => branch("ON ERROR".to_string(), body),
    }
    out.push_str("END\n\n");
}

fn render_ref(out: &mut String, reference: &CompiledRef) {
    out.push('@');
    out.push_str(&reference.kind);
    if let Some(target) = &reference.target {
        let _ = write!(out, ":\"{}\"", target);
    }
    if closes_cleanly(&reference.body) {
        let _ = writeln!(out, "{{ {} }}", reference.body);
    } else {
        // A body recovered from an unterminated reference has more `{` than
        // `}`; write it unterminated again so it reads back the same.
        let _ = writeln!(out, "{{ {}", reference.body);
    }
}

/// `{ body }` closes at its last brace
fn closes_cleanly(body: &str) -> bool {
    let mut depth = 1usize;
    for ch in body.chars() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 1
}

/// Lower a document. Never fails; see the module docs for the best-effort rules.
pub fn lower(document: &Document) -> CompiledForm {
    let text = |kind| {
        document
            .section(kind)
            .map(|s| s.body.clone())
            .unwrap_or_default()
    };

    CompiledForm {
        form_type: FORM_TYPE.to_string(),
        format_version: FORMAT_VERSION.to_string(),
        task: text(SectionKind::Task),
        action: text(SectionKind::Action),
        goal: text(SectionKind::Goal),
        refs: document.references.iter().map(CompiledRef::from).collect(),
        blocks: document.blocks.iter().map(|b| b.block.clone()).collect(),
        api_calls: document.api_calls.iter().map(|c| c.call.clone()).collect(),
    }
}

#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub document: Document,
    pub form: CompiledForm,
    /// Parse diagnostics followed by validation diagnostics
    pub diagnostics: Vec<Diagnostic>,
}

/// Parse, validate and lower `source`.
pub fn compile_source(source: &str, registry: Option<&CapabilityRegistry>) -> CompileOutput {
    let (document, mut diagnostics) = parse_source(source);
    let validation = validate_document(&document, registry);
    diagnostics.extend(validation.diagnostics);

    let form = lower(&document);
    tracing::debug!(
        refs = form.refs.len(),
        diagnostics = diagnostics.len(),
        "compiled document"
    );

    CompileOutput {
        document,
        form,
        diagnostics,
    }
}
