//! Parser for LMTagScript
//!
//! Consumes the lexer's tokens and builds a [`Document`]: the ordered TASK /
//! ACTION / GOAL sections, the `@kind{ body }` reference annotations and the
//! control statements (see [`statements`]).
//!
//! A section runs until a blank line, the next section or a statement. A
//! reference splices out of the text around it; a line holding only
//! references is dropped from the body and does not end the section.
//!
//! The parser never fails. Local problems become [`Diagnostic`]s and parsing
//! resumes at the next line or reference, so one bad block does not hide the
//! errors in the rest of the file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::iter::Peekable;

use crate::types::{Diagnostic, Span};

pub mod lexer;
pub mod params;
pub mod semantic_validator;
pub mod statements;


use lexer::{Lexer, Token, TokenKind};
use statements::{split_keyword, ApiCall, ApiCallStatement, Block, BlockStatement, Condition};

pub const E_UNTERMINATED_REF: &str = "E_UNTERMINATED_REF";
pub const E_REF_DEPTH: &str = "E_REF_DEPTH";
pub const E_UNEXPECTED_TOKEN: &str = "E_UNEXPECTED_TOKEN";
pub const E_UNTERMINATED_TARGET: &str = "E_UNTERMINATED_TARGET";
pub const E_UNCLOSED_BLOCK: &str = "E_UNCLOSED_BLOCK";
pub const E_MALFORMED_STATEMENT: &str = "E_MALFORMED_STATEMENT";

/* ===================== Document ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SectionKind {
    Task,
    Action,
    Goal,
}

impl SectionKind {
    pub const ALL: [SectionKind; 3] = [SectionKind::Task, SectionKind::Action, SectionKind::Goal];

    pub fn keyword(&self) -> &'static str {
        match self {
            SectionKind::Task => "TASK",
            SectionKind::Action => "ACTION",
            SectionKind::Goal => "GOAL",
        }
    }

    /// Section kind for a header token such as `Task :`
    pub fn from_header(header: &str) -> Option<Self> {
        let keyword = header.trim_end_matches(':').trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.keyword().eq_ignore_ascii_case(keyword))
    }
}

impl std::fmt::Display for SectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub kind: SectionKind,
    /// Section text with reference annotations spliced out, trimmed
    pub body: String,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceType {
    Tool,
    File,
    Project,
    Database,
    Unknown,
}

impl ReferenceType {
    pub fn from_namespace(namespace: &str) -> Self {
        match namespace {
            "tool" => ReferenceType::Tool,
            "file" => ReferenceType::File,
            "project" => ReferenceType::Project,
            "db" | "database" => ReferenceType::Database,
            _ => ReferenceType::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceAnnotation {
    pub kind: String,
    /// Quoted target, `/data/sales.csv` in `@file:"/data/sales.csv"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub body: String,
    /// Key/value view of `body`; empty when the body is free text
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    pub span: Span,
}

impl ReferenceAnnotation {
    /// Part of the kind before the first `:` (`tool` for `tool:search`)
    pub fn namespace(&self) -> Option<&str> {
        self.kind.split_once(':').map(|(ns, _)| ns)
    }

    /// Namespace of a targeted kind (`file`), else the part before `:`
    pub fn ref_type(&self) -> ReferenceType {
        let namespace = match (&self.target, self.namespace()) {
            (_, Some(ns)) => ns,
            (Some(_), None) => self.kind.as_str(),
            (None, None) => "",
        };
        ReferenceType::from_namespace(namespace)
    }

    /// The target if there is one, else the kind after its namespace, else the
    /// whole kind
    pub fn name(&self) -> &str {
        if let Some(target) = &self.target {
            return target;
        }
        self.kind
            .split_once(':')
            .map_or(self.kind.as_str(), |(_, name)| name)
    }
}

/// Parsed LMTagScript source. Duplicate sections are kept for the validator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub sections: Vec<Section>,
    /// Every reference in source order, including those inside blocks
    pub references: Vec<ReferenceAnnotation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<BlockStatement>,
    #[serde(rename = "apiCalls", default, skip_serializing_if = "Vec::is_empty")]
    pub api_calls: Vec<ApiCallStatement>,
}

impl Document {
    pub fn sections_of(&self, kind: SectionKind) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(move |s| s.kind == kind)
    }

    /// First occurrence of a section kind
    pub fn section(&self, kind: SectionKind) -> Option<&Section> {
        self.sections_of(kind).next()
    }
}

/* ===================== Parser ===================== */

/// Body text being collected for a section or a block branch
#[derive(Default)]
struct TextBuffer {
    text: String,
    /// Length of `text` at the start of the current line
    line_start: usize,
}

impl TextBuffer {
    fn push(&mut self, text: &str) {
        self.text.push_str(text);
        if text.ends_with('\n') {
            self.line_start = self.text.len();
        }
    }

    /// Text that ends its line, as after `THEN`
    fn push_line(&mut self, text: &str) {
        if !text.is_empty() {
            self.push(text);
            self.push("\n");
        }
    }

    /// Forget the current line
    fn drop_line(&mut self) {
        self.text.truncate(self.line_start);
    }

    fn finish(self) -> String {
        self.text.trim().to_string()
    }
}

struct SectionBuilder {
    kind: SectionKind,
    body: TextBuffer,
    span: Span,
}

enum OpenBlock {
    If { condition: Condition },
    ForEach { variable: String, collection: String },
    OnError,
}

struct BlockBuilder {
    block: OpenBlock,
    body: TextBuffer,
    /// Set once `ELSE` is seen
    else_body: Option<TextBuffer>,
    span: Span,
}

impl BlockBuilder {
    fn buffer(&mut self) -> &mut TextBuffer {
        match &mut self.else_body {
            Some(else_body) => else_body,
            None => &mut self.body,
        }
    }

    fn finish(self, end: Option<Span>) -> BlockStatement {
        let body = self.body.finish();
        let block = match self.block {
            OpenBlock::If { condition } => Block::If {
                condition,
                then_body: body,
                else_body: self.else_body.map(TextBuffer::finish).unwrap_or_default(),
            },
            OpenBlock::ForEach {
                variable,
                collection,
            } => Block::ForEach {
                variable,
                collection,
                body,
            },
            OpenBlock::OnError => Block::OnError { body },
        };
        BlockStatement {
            block,
            span: end.map_or(self.span, |end| self.span.merge(&end)),
        }
    }
}

struct Parser<'src, I: Iterator<Item = Token<'src>>> {
    tokens: Peekable<I>,
    document: Document,
    diagnostics: Vec<Diagnostic>,
    current: Option<SectionBuilder>,
    block: Option<BlockBuilder>,
    /// Only whitespace seen since the last newline
    line_blank: bool,
    /// A reference was spliced out of the current line
    line_has_ref: bool,
}

impl<'src, I: Iterator<Item = Token<'src>>> Parser<'src, I> {
    fn new(tokens: I) -> Self {
        Self {
            tokens: tokens.peekable(),
            document: Document::default(),
            diagnostics: Vec::new(),
            current: None,
            block: None,
            line_blank: true,
            line_has_ref: false,
        }
    }

    fn run(mut self) -> (Document, Vec<Diagnostic>) {
        while let Some(token) = self.tokens.next() {
            match token.kind {
                TokenKind::SectionKeyword => self.section_header(token),
                TokenKind::StatementKeyword => self.statement(token),
                TokenKind::Text => self.text(token),
                TokenKind::ReferenceStart => self.reference(token),
                TokenKind::Eof => break,
                TokenKind::Identifier
                | TokenKind::Target
                | TokenKind::BraceOpen
                | TokenKind::BraceClose
                | TokenKind::Error => self.unexpected(token),
            }
        }
        self.finish_section();
        self.close_unfinished_block();

        tracing::debug!(
            sections = self.document.sections.len(),
            references = self.document.references.len(),
            blocks = self.document.blocks.len(),
            api_calls = self.document.api_calls.len(),
            diagnostics = self.diagnostics.len(),
            "parsed document"
        );
        (self.document, self.diagnostics)
    }

    /// Where body text goes: the open block, else the open section
    fn buffer(&mut self) -> Option<&mut TextBuffer> {
        match (&mut self.block, &mut self.current) {
            (Some(block), _) => Some(block.buffer()),
            (None, Some(section)) => Some(&mut section.body),
            (None, None) => None,
        }
    }

    fn finish_section(&mut self) {
        if let Some(builder) = self.current.take() {
            self.document.sections.push(Section {
                kind: builder.kind,
                body: builder.body.finish(),
                span: builder.span,
            });
        }
    }

    fn close_unfinished_block(&mut self) {
        if let Some(block) = self.block.take() {
            self.diagnostics.push(
                Diagnostic::error(E_UNCLOSED_BLOCK, "Block is missing its END").at(block.span),
            );
            self.document.blocks.push(block.finish(None));
        }
    }

    fn section_header(&mut self, token: Token<'src>) {
        self.finish_section();
        self.close_unfinished_block();
        self.line_blank = false;
        self.line_has_ref = false;
        match SectionKind::from_header(token.text) {
            Some(kind) => {
                self.current = Some(SectionBuilder {
                    kind,
                    body: TextBuffer::default(),
                    span: token.span(),
                })
            }
            None => self.unexpected(token),
        }
    }

    fn text(&mut self, token: Token<'src>) {
        let blank = token.is_blank();
        let ends_line = token.text.ends_with('\n');

        if self.line_blank && blank && ends_line {
            if self.line_has_ref {
                // The line held nothing but references
                self.line_has_ref = false;
                if let Some(buffer) = self.buffer() {
                    buffer.drop_line();
                }
            } else if let Some(block) = self.block.as_mut() {
                block.buffer().push(token.text);
            } else {
                self.finish_section();
            }
            return;
        }

        // `current` is never open at the same time as a block
        if let Some(section) = self.current.as_mut().filter(|_| !blank) {
            section.span = section.span.merge(&token.span());
        }
        match self.buffer() {
            Some(buffer) => buffer.push(token.text),
            None if !blank => {
                tracing::trace!(line = token.line, "text outside of any section");
            }
            None => {}
        }
        self.line_blank = ends_line || (self.line_blank && blank);
        if ends_line {
            self.line_has_ref = false;
        }
    }

    fn statement(&mut self, keyword: Token<'src>) {
        let mut span = keyword.span();
        let args = match self.tokens.next_if(|t| t.kind == TokenKind::Text) {
            Some(rest) => {
                if !rest.is_blank() {
                    span = span.merge(&rest.span());
                }
                rest.text.trim()
            }
            None => "",
        };
        self.finish_section();
        self.line_blank = true;
        self.line_has_ref = false;

        let keyword_text = keyword.text.split_whitespace().collect::<Vec<_>>().join(" ");
        match keyword_text.as_str() {
            "IF" => {
                let (condition, rest) = match split_keyword(args, "THEN") {
                    Some((condition, rest)) if !condition.is_empty() => (condition, rest),
                    _ => {
                        self.malformed(span, "Expected 'IF <condition> THEN'");
                        (args, "")
                    }
                };
                let block = OpenBlock::If {
                    condition: Condition::parse(condition),
                };
                self.open_block(block, span, rest);
            }
            "FOR EACH" => {
                let parsed = split_keyword(args, "IN").and_then(|(variable, rest)| {
                    let (collection, body) = split_keyword(rest, "DO")?;
                    Some((variable, collection, body))
                });
                let (variable, collection, rest) = match parsed {
                    Some(parts) if !parts.0.is_empty() && !parts.1.is_empty() => parts,
                    _ => {
                        self.malformed(span, "Expected 'FOR EACH <item> IN <collection> DO'");
                        let (variable, collection) = split_keyword(args, "IN").unwrap_or((args, ""));
                        (variable, collection, "")
                    }
                };
                let block = OpenBlock::ForEach {
                    variable: variable.to_string(),
                    collection: collection.to_string(),
                };
                self.open_block(block, span, rest);
            }
            "ON ERROR" => self.open_block(OpenBlock::OnError, span, args),
            "ELSE" => match &mut self.block {
                Some(BlockBuilder {
                    block: OpenBlock::If { .. },
                    else_body: else_body @ None,
                    ..
                }) => {
                    let mut buffer = TextBuffer::default();
                    buffer.push_line(args);
                    *else_body = Some(buffer);
                }
                _ => self.stray(span, "ELSE without an open IF"),
            },
            "END" => match self.block.take() {
                Some(block) => self.document.blocks.push(block.finish(Some(keyword.span()))),
                None => self.stray(span, "END without an open block"),
            },
            "CALL API" => match ApiCall::parse(args) {
                Ok(call) => self.document.api_calls.push(ApiCallStatement { call, span }),
                Err(message) => self.malformed(span, message),
            },
            other => self.stray(span, format!("Unknown statement '{}'", other)),
        }
    }

    fn open_block(&mut self, block: OpenBlock, span: Span, rest: &str) {
        if let Some(open) = &self.block {
            let message = "Blocks cannot be nested; END the open block first";
            tracing::debug!(line = open.span.line, "nested block rejected");
            self.stray(span, message);
            return;
        }
        let mut body = TextBuffer::default();
        body.push_line(rest);
        self.block = Some(BlockBuilder {
            block,
            body,
            else_body: None,
            span,
        });
    }

    fn malformed(&mut self, span: Span, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::error(E_MALFORMED_STATEMENT, message).at(span));
    }

    fn stray(&mut self, span: Span, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::error(E_UNEXPECTED_TOKEN, message).at(span));
    }

    fn reference(&mut self, start: Token<'src>) {
        let mut span = start.span();
        let mut kind = "";
        let mut target = None;
        if let Some(ident) = self.tokens.next_if(|t| t.kind == TokenKind::Identifier) {
            kind = ident.text;
            span = span.merge(&ident.span());
        }
        if let Some(quoted) = self.tokens.next_if(|t| t.kind == TokenKind::Target) {
            target = Some(quoted.text.trim_matches('"').to_string());
            kind = kind.trim_end_matches(':');
            span = span.merge(&quoted.span());
        }

        let mut body = String::new();
        self.line_has_ref = true;

        match self.tokens.peek().copied() {
            Some(token) if token.kind == TokenKind::BraceOpen => {
                self.tokens.next();
                let mut depth = 1usize;
                let mut reported_depth = false;
                while let Some(token) = self.tokens.next() {
                    span = span.merge(&token.span());
                    match token.kind {
                        TokenKind::BraceOpen => {
                            depth += 1;
                            if depth > 2 && !reported_depth {
                                reported_depth = true;
                                self.diagnostics.push(
                                    Diagnostic::error(
                                        E_REF_DEPTH,
                                        format!(
                                            "Reference '@{}' nests braces more than one level deep",
                                            kind
                                        ),
                                    )
                                    .at(token.span()),
                                );
                            }
                        }
                        TokenKind::BraceClose => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        TokenKind::Eof => break,
                        _ => {}
                    }
                    body.push_str(token.text);
                }
            }
            Some(open) if open.kind == TokenKind::Error => {
                self.tokens.next();
                let (code, message) = if open.text == "\"" {
                    (E_UNTERMINATED_TARGET, format!("Unterminated target for reference '@{}'", kind))
                } else {
                    (E_UNTERMINATED_REF, format!("Unterminated body for reference '@{}'", kind))
                };
                self.diagnostics
                    .push(Diagnostic::error(code, message).at(open.span()));
                span = span.merge(&open.span());

                let mut ended_line = false;
                while let Some(token) = self.tokens.next_if(|t| t.kind == TokenKind::Text) {
                    body.push_str(token.text);
                    span = span.merge(&token.span());
                    ended_line = token.text.ends_with('\n');
                }
                if ended_line {
                    // The recovered body ran to the end of its line
                    if self.line_blank {
                        if let Some(buffer) = self.buffer() {
                            buffer.drop_line();
                        }
                    }
                    self.line_blank = true;
                    self.line_has_ref = false;
                }
            }
            _ => {}
        }

        let body = body.trim().to_string();
        self.document.references.push(ReferenceAnnotation {
            kind: kind.to_string(),
            target,
            params: params::parse_params(&body),
            body,
            span,
        });
    }

    /// Report a token the grammar does not allow here and skip to the next
    /// line start or reference.
    fn unexpected(&mut self, token: Token<'src>) {
        self.diagnostics.push(
            Diagnostic::error(
                E_UNEXPECTED_TOKEN,
                format!("Unexpected {:?} '{}'", token.kind, token.text.trim()),
            )
            .at(token.span()),
        );
        if token.text.ends_with('\n') {
            self.line_blank = true;
            self.line_has_ref = false;
            return;
        }
        while let Some(next) = self.tokens.next_if(|t| {
            !matches!(
                t.kind,
                TokenKind::ReferenceStart
                    | TokenKind::SectionKeyword
                    | TokenKind::StatementKeyword
                    | TokenKind::Eof
            )
        }) {
            if next.text.ends_with('\n') {
                self.line_blank = true;
                self.line_has_ref = false;
                return;
            }
        }
    }
}

/* ===================== Public API ===================== */

/// Build a document from a token stream
pub fn parse<'src>(tokens: impl IntoIterator<Item = Token<'src>>) -> (Document, Vec<Diagnostic>) {
    Parser::new(tokens.into_iter()).run()
}

/// Lex and parse a source string
pub fn parse_source(source: &str) -> (Document, Vec<Diagnostic>) {
    parse(Lexer::new(source))
}
