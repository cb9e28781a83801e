//! Parser for the `{{ ... }}` actions of stage templates.
//!
//! The grammar is a small subset of Go templates:
//!
//! ```text
//! action   := "{{" ["-" ws] (command | comment) [ws "-"] "}}"
//! command  := literal | IDENT operand*
//! operand  := literal | IDENT | "(" command ")"
//! literal  := '"' (char | '\"' | '\\' | '\n' | '\t')* '"'
//! comment  := "/*" ... "*/"
//! ```
//!
//! A bare identifier used as an operand is a call without arguments.

use std::fmt;

/// An evaluable expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Expr {
    /// A string literal.
    Literal(String),
    /// A function call.
    Call {
        /// The function name.
        name: String,
        /// The arguments, evaluated left to right.
        args: Vec<Expr>,
    },
}

/// A piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    /// Text copied verbatim.
    Text(String),
    /// An expression whose value replaces the action.
    Action {
        /// The expression.
        expr: Expr,
        /// The 1-based line where the action starts.
        line: usize,
    },
}

/// A syntax error with its location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParseError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Parses `source` into text and action nodes.
pub(crate) fn parse(source: &str) -> Result<Vec<Node>, ParseError> {
    let mut nodes = Vec::new();
    let mut offset = 0;
    let mut trim_leading = false;

    while let Some(found) = source[offset..].find("{{") {
        let start = offset + found;
        let mut text = &source[offset..start];
        if trim_leading {
            text = text.trim_start();
        }

        let mut body_start = start + 2;
        let after_open = &source[body_start..];
        if after_open.starts_with('-') && after_open[1..].starts_with(char::is_whitespace) {
            text = text.trim_end();
            body_start += 1;
        }
        push_text(&mut nodes, text);

        let line = line_of(source, start);
        let mut cursor = Cursor::new(&source[body_start..], line);
        let expr = cursor.action()?;
        trim_leading = cursor.close()?;

        if let Some(expr) = expr {
            nodes.push(Node::Action { expr, line });
        }
        offset = body_start + cursor.pos;
    }

    let mut text = &source[offset..];
    if trim_leading {
        text = text.trim_start();
    }
    push_text(&mut nodes, text);

    Ok(nodes)
}

fn push_text(nodes: &mut Vec<Node>, text: &str) {
    if !text.is_empty() {
        nodes.push(Node::Text(text.to_string()));
    }
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset].matches('\n').count() + 1
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str, line: usize) -> Self {
        Self { src, pos: 0, line }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn at_close(&self) -> bool {
        let rest = self.rest();
        rest.starts_with("}}") || rest.starts_with("-}}")
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            line: self.line + self.src[..self.pos].matches('\n').count(),
            message: message.into(),
        }
    }

    fn action(&mut self) -> Result<Option<Expr>, ParseError> {
        self.skip_whitespace();
        if self.rest().starts_with("/*") {
            let end = self
                .rest()
                .find("*/")
                .ok_or_else(|| self.error("unclosed comment"))?;
            self.pos += end + 2;
            return Ok(None);
        }
        if self.at_close() {
            return Err(self.error("missing value for command"));
        }
        self.command().map(Some)
    }

    /// Consumes the closing delimiter and returns whether it trims.
    fn close(&mut self) -> Result<bool, ParseError> {
        self.skip_whitespace();
        if self.rest().starts_with("-}}") {
            self.pos += 3;
            return Ok(true);
        }
        if self.rest().starts_with("}}") {
            self.pos += 2;
            return Ok(false);
        }
        match self.peek() {
            None => Err(self.error("unclosed action")),
            Some(c) => Err(self.error(format!("unexpected {c:?} in action"))),
        }
    }

    fn command(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some('"') => self.literal().map(Expr::Literal),
            Some('(') => self.parenthesized(),
            Some(c) if is_ident_start(c) => {
                let name = self.identifier();
                let mut args = Vec::new();
                loop {
                    self.skip_whitespace();
                    if self.at_close() || matches!(self.peek(), None | Some(')')) {
                        break;
                    }
                    args.push(self.operand()?);
                }
                Ok(Expr::Call { name, args })
            }
            Some(c) => Err(self.error(format!("unexpected {c:?} in command"))),
            None => Err(self.error("unclosed action")),
        }
    }

    fn operand(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some('"') => self.literal().map(Expr::Literal),
            Some('(') => self.parenthesized(),
            Some(c) if is_ident_start(c) => Ok(Expr::Call {
                name: self.identifier(),
                args: Vec::new(),
            }),
            Some(c) => Err(self.error(format!("unexpected {c:?} in operand"))),
            None => Err(self.error("unclosed action")),
        }
    }

    fn parenthesized(&mut self) -> Result<Expr, ParseError> {
        self.bump();
        let expr = self.command()?;
        self.skip_whitespace();
        if self.peek() != Some(')') {
            return Err(self.error("unclosed left paren"));
        }
        self.bump();
        Ok(expr)
    }

    fn identifier(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.bump();
        }
        self.src[start..self.pos].to_string()
    }

    fn literal(&mut self) -> Result<String, ParseError> {
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(value),
                Some('\\') => match self.bump() {
                    Some('"') => value.push('"'),
                    Some('\\') => value.push('\\'),
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(c) => return Err(self.error(format!("unknown escape sequence \\{c}"))),
                    None => return Err(self.error("unterminated quoted string")),
                },
                Some('\n') | None => return Err(self.error("unterminated quoted string")),
                Some(c) => value.push(c),
            }
        }
    }
}
