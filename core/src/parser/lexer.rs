//! Lexer for LMTagScript
//!
//! Two layers. [`RawToken`] is a `logos` scanner that splits the source into
//! context free pieces: words, keywords, whitespace runs, newlines and single
//! punctuation characters. Every character belongs to exactly one raw token.
//! [`Lexer`] walks the raw tokens and applies the context rules on top:
//!
//! - section keywords (`TASK:`) and statement keywords (`IF`, `FOR EACH`,
//!   `CALL API`, `ON ERROR`, `ELSE`, `END`) only count at the start of a line
//! - `#` at the start of a line comments out the rest of it
//! - `@` opens a reference unless it is glued to a preceding word
//! - braces only matter inside a reference body
//!
//! The lexer never fails. Malformed input (an unbalanced reference brace, an
//! unclosed target quote, a character `logos` rejects) becomes an `Error`
//! token and lexing continues in text mode.
//!
//! Text is produced in line fragments, so a `Text` token never extends past a
//! newline. The parser relies on this to find blank lines.

use logos::Logos;
use serde::Serialize;

use crate::types::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenKind {
    /// `TASK:`, `ACTION:` or `GOAL:` at the start of a line
    SectionKeyword,
    /// `IF`, `ELSE`, `END`, `FOR EACH`, `CALL API` or `ON ERROR` at the start
    /// of a line. The rest of the line follows as a single `Text` token.
    StatementKeyword,
    /// Reference kind following `@`
    Identifier,
    /// Quoted target after a kind ending in `:` (`"/data/sales.csv"`)
    Target,
    /// The `@` opening a reference annotation
    ReferenceStart,
    BraceOpen,
    BraceClose,
    Text,
    /// Lexical error; carries the offending text
    Error,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub text: &'src str,
    pub line: usize,
    pub column: usize,
}

impl Token<'_> {
    /// Span from the first character of the token to just past its last one
    pub fn span(&self) -> Span {
        let (mut line, mut column) = (self.line, self.column);
        for ch in self.text.chars() {
            if ch == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        Span::new(self.line, self.column, line, column)
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

pub(crate) fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// Characters allowed in a reference kind (`[\w:-]`)
pub(crate) fn is_kind_char(ch: char) -> bool {
    is_word_char(ch) || ch == ':' || ch == '-'
}

/* ===================== Raw tokens ===================== */

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawToken {
    #[token("\n")]
    Newline,
    /// Horizontal whitespace run
    #[regex(r"[^\S\n]+")]
    Space,

    // Section keywords, any case. The colon is matched by the lexer.
    #[regex("[Tt][Aa][Ss][Kk]|[Aa][Cc][Tt][Ii][Oo][Nn]|[Gg][Oo][Aa][Ll]")]
    Section,

    // Statement keywords, upper case only
    #[token("IF")]
    If,
    #[token("ELSE")]
    Else,
    #[token("END")]
    End,
    #[token("FOR")]
    For,
    #[token("EACH")]
    Each,
    #[token("CALL")]
    Call,
    #[token("API")]
    Api,
    #[token("ON")]
    On,
    #[token("ERROR")]
    ErrorKw,

    #[token("#")]
    Hash,
    /// `@` together with the reference kind glued to it
    #[regex(r"@[\w:-]*")]
    At,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("\"")]
    Quote,
    #[regex(r"\w+")]
    Word,
    /// Any other single character
    #[regex(r#"[^\w\s@#{}"]"#)]
    Punct,
}

#[derive(Debug, Clone, Copy)]
struct Lexeme {
    token: Result<RawToken, ()>,
    start: usize,
    end: usize,
}

/* ===================== Lexer ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Text,
    /// Just emitted `@`; a kind may follow
    AfterAt,
    /// Reference kind done; a target or a body may follow
    AfterKind,
    /// Target done; a body may follow
    AfterTarget,
    Body { depth: usize },
    /// Just emitted a statement keyword; the rest of the line follows
    Statement,
    Done,
}

/// Lazy token stream over a source string. Always ends with a single `Eof`.
pub struct Lexer<'src> {
    source: &'src str,
    raw: Vec<Lexeme>,
    /// First raw token that ends after `pos`
    cursor: usize,
    pos: usize,
    line: usize,
    column: usize,
    /// Only horizontal whitespace seen since the last newline
    line_start: bool,
    mode: Mode,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        let raw = RawToken::lexer(source)
            .spanned()
            .map(|(token, span)| Lexeme {
                token,
                start: span.start,
                end: span.end,
            })
            .collect();

        Self {
            source,
            raw,
            cursor: 0,
            pos: 0,
            line: 1,
            column: 1,
            line_start: true,
            mode: Mode::Text,
        }
    }

    fn is(&self, index: usize, token: RawToken) -> bool {
        self.raw.get(index).is_some_and(|l| l.token == Ok(token))
    }

    fn slice(&self, index: usize) -> &'src str {
        self.raw
            .get(index)
            .map_or("", |l| &self.source[l.start..l.end])
    }

    fn start_of(&self, index: usize) -> usize {
        self.raw.get(index).map_or(self.source.len(), |l| l.start)
    }

    fn advance_to(&mut self, end: usize) {
        for ch in self.source[self.pos..end].chars() {
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.pos = end;
        while self.raw.get(self.cursor).is_some_and(|l| l.end <= self.pos) {
            self.cursor += 1;
        }
    }

    fn emit(&mut self, kind: TokenKind, end: usize) -> Token<'src> {
        let token = Token {
            kind,
            text: &self.source[self.pos..end],
            line: self.line,
            column: self.column,
        };
        self.advance_to(end);
        token
    }

    /// Index of the first raw token at or after `from` that is not a space
    fn skip_space(&self, from: usize) -> usize {
        if self.is(from, RawToken::Space) {
            from + 1
        } else {
            from
        }
    }

    /// End of the line containing raw token `from`, newline included
    fn line_end(&self, from: usize) -> usize {
        self.raw[from.min(self.raw.len())..]
            .iter()
            .find(|l| l.token == Ok(RawToken::Newline))
            .map_or(self.source.len(), |l| l.end)
    }

    /// `@` opens a reference when it is not glued to a preceding word
    /// (e-mail addresses stay text) and is followed by a kind or a brace.
    fn is_reference_start(&self, index: usize) -> bool {
        let Some(lexeme) = self.raw.get(index) else {
            return false;
        };
        if lexeme.token != Ok(RawToken::At) {
            return false;
        }
        if self.source[..lexeme.start]
            .chars()
            .next_back()
            .is_some_and(is_word_char)
        {
            return false;
        }
        lexeme.end - lexeme.start > 1 || self.is(index + 1, RawToken::LBrace)
    }

    /// End of `TASK :` when raw token `index` starts a section header
    fn section_header_end(&self, index: usize) -> Option<usize> {
        if !self.is(index, RawToken::Section) {
            return None;
        }
        let colon = self.skip_space(index + 1);
        (self.is(colon, RawToken::Punct) && self.slice(colon) == ":")
            .then(|| self.raw[colon].end)
    }

    /// End of a statement keyword starting at raw token `index`
    fn statement_keyword_end(&self, index: usize) -> Option<usize> {
        let pair = |second: RawToken| {
            (self.is(index + 1, RawToken::Space) && self.is(index + 2, second))
                .then(|| self.raw[index + 2].end)
        };
        match self.raw.get(index)?.token {
            Ok(RawToken::If | RawToken::Else | RawToken::End) => Some(self.raw[index].end),
            Ok(RawToken::For) => pair(RawToken::Each),
            Ok(RawToken::Call) => pair(RawToken::Api),
            Ok(RawToken::On) => pair(RawToken::ErrorKw),
            _ => None,
        }
    }

    fn lex_text(&mut self) -> Token<'src> {
        loop {
            let index = self.cursor;
            let Some(first) = self.raw.get(index).copied() else {
                self.mode = Mode::Done;
                return self.emit(TokenKind::Eof, self.pos);
            };

            if self.line_start {
                let lead = self.skip_space(index);
                if self.is(lead, RawToken::Hash) {
                    let end = self.line_end(lead);
                    self.advance_to(end);
                    continue;
                }

                let header = self.section_header_end(lead);
                let statement = self.statement_keyword_end(lead);
                if lead > index
                    && (header.is_some() || statement.is_some() || self.is_reference_start(lead))
                {
                    return self.emit(TokenKind::Text, self.start_of(lead));
                }
                if let Some(end) = header {
                    self.line_start = false;
                    return self.emit(TokenKind::SectionKeyword, end);
                }
                if let Some(end) = statement {
                    self.line_start = false;
                    self.mode = Mode::Statement;
                    return self.emit(TokenKind::StatementKeyword, end);
                }
            }

            if self.is_reference_start(index) {
                self.line_start = false;
                self.mode = Mode::AfterAt;
                return self.emit(TokenKind::ReferenceStart, self.pos + 1);
            }
            if first.token.is_err() {
                self.line_start = false;
                return self.emit(TokenKind::Error, first.end);
            }

            let mut end = first.end;
            if first.token != Ok(RawToken::Newline) {
                for (offset, lexeme) in self.raw[index + 1..].iter().enumerate() {
                    if lexeme.token.is_err() || self.is_reference_start(index + 1 + offset) {
                        break;
                    }
                    end = lexeme.end;
                    if lexeme.token == Ok(RawToken::Newline) {
                        break;
                    }
                }
            }
            let token = self.emit(TokenKind::Text, end);
            self.line_start = token.text.ends_with('\n') || (self.line_start && token.is_blank());
            return token;
        }
    }

    /// Rest of a statement line, newline included
    fn lex_statement(&mut self) -> Option<Token<'src>> {
        self.mode = Mode::Text;
        self.line_start = true;
        if self.pos >= self.source.len() {
            return None;
        }
        let end = self.line_end(self.cursor);
        Some(self.emit(TokenKind::Text, end))
    }

    /// After a kind ending in `:`, a double quoted string on the same line is
    /// the reference target.
    fn lex_target(&mut self) -> Option<Token<'src>> {
        self.mode = Mode::AfterTarget;
        let open = self.cursor;
        if !self.source[..self.pos].ends_with(':') || !self.is(open, RawToken::Quote) {
            return None;
        }

        let close = self.raw[open + 1..]
            .iter()
            .take_while(|l| l.token != Ok(RawToken::Newline))
            .position(|l| l.token == Ok(RawToken::Quote));
        match close {
            Some(offset) => Some(self.emit(TokenKind::Target, self.raw[open + 1 + offset].end)),
            None => {
                self.mode = Mode::Text;
                self.line_start = false;
                Some(self.emit(TokenKind::Error, self.raw[open].end))
            }
        }
    }

    /// At `{`: enter body mode if the brace is balanced, otherwise report it.
    fn open_body(&mut self) -> Token<'src> {
        let mut depth = 0usize;
        let mut balanced = false;
        for lexeme in &self.raw[self.cursor..] {
            match lexeme.token {
                Ok(RawToken::LBrace) => depth += 1,
                Ok(RawToken::RBrace) => {
                    depth -= 1;
                    if depth == 0 {
                        balanced = true;
                        break;
                    }
                }
                _ => {}
            }
        }

        if balanced {
            self.mode = Mode::Body { depth: 1 };
            self.emit(TokenKind::BraceOpen, self.pos + 1)
        } else {
            self.mode = Mode::Text;
            self.emit(TokenKind::Error, self.pos + 1)
        }
    }

    fn lex_body(&mut self, depth: usize) -> Token<'src> {
        let index = self.cursor;
        if self.is(index, RawToken::LBrace) {
            self.mode = Mode::Body { depth: depth + 1 };
            return self.emit(TokenKind::BraceOpen, self.pos + 1);
        }
        if self.is(index, RawToken::RBrace) {
            self.mode = if depth <= 1 {
                Mode::Text
            } else {
                Mode::Body { depth: depth - 1 }
            };
            return self.emit(TokenKind::BraceClose, self.pos + 1);
        }

        let mut end = self.source.len();
        for lexeme in &self.raw[index..] {
            match lexeme.token {
                Ok(RawToken::LBrace | RawToken::RBrace) => {
                    end = lexeme.start;
                    break;
                }
                Ok(RawToken::Newline) => {
                    end = lexeme.end;
                    break;
                }
                _ => {}
            }
        }
        self.emit(TokenKind::Text, end)
    }
}

impl<'src> Iterator for Lexer<'src> {
    type Item = Token<'src>;

    fn next(&mut self) -> Option<Token<'src>> {
        loop {
            match self.mode {
                Mode::Done => return None,
                Mode::AfterAt => {
                    self.mode = Mode::AfterKind;
                    // A bare `@` has already been consumed whole
                    let end = match self.raw.get(self.cursor) {
                        Some(l) if l.token == Ok(RawToken::At) && l.start < self.pos => l.end,
                        _ => self.pos,
                    };
                    if end > self.pos {
                        return Some(self.emit(TokenKind::Identifier, end));
                    }
                }
                Mode::AfterKind => {
                    if let Some(token) = self.lex_target() {
                        return Some(token);
                    }
                }
                Mode::AfterTarget => {
                    self.mode = Mode::Text;
                    let open = self.skip_space(self.cursor);
                    if self.is(open, RawToken::LBrace) {
                        self.advance_to(self.raw[open].start);
                        return Some(self.open_body());
                    }
                }
                Mode::Body { depth } => return Some(self.lex_body(depth)),
                Mode::Statement => {
                    if let Some(token) = self.lex_statement() {
                        return Some(token);
                    }
                }
                Mode::Text => return Some(self.lex_text()),
            }
        }
    }
}

/// Tokenize a whole source string
pub fn tokenize(source: &str) -> Vec<Token<'_>> {
    Lexer::new(source).collect()
}
