//! Built-in sequencer that turns DDL model definitions into node structure.
//!
//! Supported statements, separated by `;`:
//!
//! ```text
//! CREATE [FOREIGN | VIRTUAL | GLOBAL TEMPORARY] TABLE name (column type[(n[, m])] ..., ...)
//! CREATE [VIRTUAL] VIEW name [(column [type], ...)] AS query
//! ```
//!
//! Other statements (`SET`, `CREATE PROCEDURE`, ...) are skipped. Table
//! constraints (`PRIMARY KEY (...)`, `CONSTRAINT ...`) and column modifiers
//! (`NOT NULL`, `OPTIONS (...)`, ...) are tolerated and ignored.

use async_trait::async_trait;
use tracing::debug;

use arbor_types::lexicon::{ddl, vdb};
use arbor_types::Property;

use crate::error::{SequencingError, SequencingResult};
use crate::rule::TriggerRule;
use crate::sequencer::{DerivedNode, Sequencer, SequencerOutput, SequencingInput};

/// Parses `vdb:modelDefinition` text on `vdb:model` nodes.
#[derive(Clone, Copy, Debug, Default)]
pub struct DdlSequencer;

impl DdlSequencer {
    pub const NAME: &'static str = "ddl";

    /// The rule this sequencer is registered under.
    pub fn rule() -> TriggerRule {
        TriggerRule::new(vdb::MODEL, vdb::MODEL_DEFINITION)
    }

    /// Parse a DDL document into derived nodes.
    pub fn parse(text: &str) -> SequencingResult<SequencerOutput> {
        let tokens = tokenize(text)?;
        let mut nodes = Vec::new();
        for statement in tokens.split(|t| t.tok == Tok::Symbol(';')) {
            if statement.is_empty() {
                continue;
            }
            if let Some(node) = Parser::new(text, statement).statement()? {
                nodes.push(node);
            }
        }
        Ok(SequencerOutput { nodes })
    }
}

#[async_trait]
impl Sequencer for DdlSequencer {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn execute(&self, input: &SequencingInput) -> SequencingResult<SequencerOutput> {
        let failed = |reason: String| SequencingError::Failed {
            sequencer: Self::NAME.to_string(),
            path: input.node.path.clone(),
            reason,
        };
        let text = input
            .text()
            .ok_or_else(|| failed("model definition has no textual content".into()))?;
        let output = Self::parse(&text).map_err(|e| failed(e.to_string()))?;
        debug!(path = %input.node.path, derived = output.node_count(), "parsed model definition");
        Ok(output)
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Word(String),
    Quoted(String),
    Number(String),
    Str,
    Symbol(char),
}

#[derive(Clone, Debug)]
struct Token {
    tok: Tok,
    start: usize,
    end: usize,
}

fn tokenize(src: &str) -> SequencingResult<Vec<Token>> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        match c {
            b if b.is_ascii_whitespace() => {
                i += 1;
                continue;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let close = src[i + 2..].find("*/").ok_or(SequencingError::Parse {
                    offset: start,
                    reason: "unterminated comment".into(),
                })?;
                i += 2 + close + 2;
                continue;
            }
            b'"' | b'`' => {
                let (text, next) = quoted(src, i, c)?;
                i = next;
                tokens.push(Token { tok: Tok::Quoted(text), start, end: i });
            }
            b'\'' => {
                let (_, next) = quoted(src, i, c)?;
                i = next;
                tokens.push(Token { tok: Tok::Str, start, end: i });
            }
            b if b.is_ascii_digit() => {
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                tokens.push(Token {
                    tok: Tok::Number(src[start..i].to_string()),
                    start,
                    end: i,
                });
            }
            b if is_word_byte(b) => {
                while i < bytes.len() && (is_word_byte(bytes[i]) || bytes[i] == b'.') {
                    i += 1;
                }
                tokens.push(Token {
                    tok: Tok::Word(src[start..i].to_string()),
                    start,
                    end: i,
                });
            }
            _ => {
                let ch = src[i..].chars().next().unwrap_or('?');
                i += ch.len_utf8();
                tokens.push(Token { tok: Tok::Symbol(ch), start, end: i });
            }
        }
    }
    Ok(tokens)
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Read a quoted run starting at `open`; a doubled quote escapes itself.
fn quoted(src: &str, open: usize, quote: u8) -> SequencingResult<(String, usize)> {
    let bytes = src.as_bytes();
    let mut out = String::new();
    let mut i = open + 1;
    let mut run = i;
    loop {
        match bytes.get(i) {
            None => {
                return Err(SequencingError::Parse {
                    offset: open,
                    reason: "unterminated quoted text".into(),
                })
            }
            Some(&b) if b == quote => {
                out.push_str(&src[run..i]);
                if bytes.get(i + 1) == Some(&quote) {
                    out.push(quote as char);
                    i += 2;
                    run = i;
                } else {
                    return Ok((out, i + 1));
                }
            }
            Some(_) => i += 1,
        }
    }
}

/// Words that begin a table constraint rather than a column.
const CONSTRAINT_WORDS: [&str; 6] = ["PRIMARY", "CONSTRAINT", "FOREIGN", "UNIQUE", "ACCESSPATTERN", "INDEX"];

struct Parser<'a> {
    src: &'a str,
    toks: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, toks: &'a [Token]) -> Self {
        Self { src, toks, pos: 0 }
    }

    fn statement(&mut self) -> SequencingResult<Option<DerivedNode>> {
        if !self.keyword("CREATE") {
            debug!(statement = %self.text(), "skipping unsupported DDL statement");
            return Ok(None);
        }

        let mut kind = None;
        if self.keyword("FOREIGN") {
            kind = Some("FOREIGN");
        } else if self.keyword("VIRTUAL") {
            kind = Some("VIRTUAL");
        } else if self.keyword("GLOBAL") {
            self.expect_keyword("TEMPORARY")?;
            kind = Some("GLOBAL TEMPORARY");
        }

        if self.keyword("TABLE") {
            self.table(kind.unwrap_or("FOREIGN")).map(Some)
        } else if self.keyword("VIEW") && kind != Some("FOREIGN") && kind != Some("GLOBAL TEMPORARY") {
            self.view().map(Some)
        } else {
            debug!(statement = %self.text(), "skipping unsupported DDL statement");
            Ok(None)
        }
    }

    fn table(&mut self, kind: &str) -> SequencingResult<DerivedNode> {
        let name = self.identifier()?;
        let mut node = DerivedNode::new(name, ddl::CREATE_TABLE)
            .with_property(Property::single(ddl::TABLE_KIND, kind))
            .with_property(Property::single(ddl::STATEMENT, self.text()));

        self.expect_symbol('(')?;
        loop {
            if let Some(column) = self.element(true)? {
                node = node.with_child(column);
            }
            if self.symbol(',') {
                continue;
            }
            self.expect_symbol(')')?;
            break;
        }
        Ok(node)
    }

    fn view(&mut self) -> SequencingResult<DerivedNode> {
        let name = self.identifier()?;
        let mut node = DerivedNode::new(name, ddl::CREATE_VIEW);

        if self.symbol('(') {
            loop {
                if let Some(column) = self.element(false)? {
                    node = node.with_child(column);
                }
                if self.symbol(',') {
                    continue;
                }
                self.expect_symbol(')')?;
                break;
            }
        }

        self.skip_until_keyword("AS");
        self.expect_keyword("AS")?;
        let query = match (self.toks.get(self.pos), self.toks.last()) {
            (Some(first), Some(last)) => self.src[first.start..last.end].trim().to_string(),
            _ => {
                return Err(self.error("view is missing its query expression"));
            }
        };
        self.pos = self.toks.len();

        Ok(node
            .with_property(Property::single(ddl::QUERY, query))
            .with_property(Property::single(ddl::STATEMENT, self.text())))
    }

    /// A column definition, or `None` for a table constraint.
    fn element(&mut self, type_required: bool) -> SequencingResult<Option<DerivedNode>> {
        if let Some(Tok::Word(w)) = self.peek() {
            if CONSTRAINT_WORDS.iter().any(|c| w.eq_ignore_ascii_case(c)) {
                self.skip_element();
                return Ok(None);
            }
        }

        let name = self.identifier()?;
        let mut column = DerivedNode::new(name, ddl::COLUMN);

        let datatype = match self.peek() {
            Some(Tok::Word(w)) => Some(w.to_ascii_uppercase()),
            _ if type_required => return Err(self.error("expected a column datatype")),
            _ => None,
        };
        if let Some(datatype) = datatype {
            self.pos += 1;
            column = column.with_property(Property::single(ddl::DATATYPE, datatype));
            if self.symbol('(') {
                let length = self.number()?;
                column = column.with_property(Property::single(ddl::DATATYPE_LENGTH, length));
                while self.symbol(',') {
                    self.number()?;
                }
                self.expect_symbol(')')?;
            }
        }

        self.skip_element();
        Ok(Some(column))
    }

    /// Advance to the `,` or `)` that ends the current list element.
    fn skip_element(&mut self) {
        let mut depth = 0usize;
        while let Some(tok) = self.peek() {
            match tok {
                Tok::Symbol('(') => depth += 1,
                Tok::Symbol(')') if depth == 0 => return,
                Tok::Symbol(')') => depth -= 1,
                Tok::Symbol(',') if depth == 0 => return,
                _ => {}
            }
            self.pos += 1;
        }
    }

    fn skip_until_keyword(&mut self, kw: &str) {
        while let Some(tok) = self.peek() {
            if matches!(tok, Tok::Word(w) if w.eq_ignore_ascii_case(kw)) {
                return;
            }
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<&'a Tok> {
        self.toks.get(self.pos).map(|t| &t.tok)
    }

    fn keyword(&mut self, kw: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Word(w)) if w.eq_ignore_ascii_case(kw)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> SequencingResult<()> {
        if self.keyword(kw) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {kw}")))
        }
    }

    fn symbol(&mut self, c: char) -> bool {
        if self.peek() == Some(&Tok::Symbol(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, c: char) -> SequencingResult<()> {
        if self.symbol(c) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{c}'")))
        }
    }

    fn identifier(&mut self) -> SequencingResult<String> {
        match self.peek() {
            Some(Tok::Word(w)) | Some(Tok::Quoted(w)) => {
                self.pos += 1;
                Ok(w.clone())
            }
            _ => Err(self.error("expected an identifier")),
        }
    }

    fn number(&mut self) -> SequencingResult<i64> {
        match self.peek() {
            Some(Tok::Number(n)) => {
                let value = n
                    .parse::<i64>()
                    .map_err(|_| self.error(&format!("invalid length '{n}'")))?;
                self.pos += 1;
                Ok(value)
            }
            _ => Err(self.error("expected a number")),
        }
    }

    /// Source text of the whole statement.
    fn text(&self) -> String {
        match (self.toks.first(), self.toks.last()) {
            (Some(first), Some(last)) => self.src[first.start..last.end].to_string(),
            _ => String::new(),
        }
    }

    fn error(&self, reason: &str) -> SequencingError {
        let offset = self
            .toks
            .get(self.pos)
            .or(self.toks.last())
            .map_or(self.src.len(), |t| t.start);
        SequencingError::Parse {
            offset,
            reason: reason.to_string(),
        }
    }
}
