//! Script statements
//!
//! One statement per line: `op_id(key="value", other="v2")`. Values are
//! double-quoted; `\"`, `\\` and `\n` escape inside them. Blank lines and lines
//! starting with `#` carry no statement.

use std::fmt::Write as _;
use wb_kernel::Params;
use wb_store::ErrorClass;

/// Malformed statement text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("syntax error at column {column}: {message}")]
pub struct ScriptError {
    /// 1-based character column
    pub column: usize,
    pub message: String,
}

impl ScriptError {
    fn at(column: usize, message: impl Into<String>) -> Self {
        Self {
            column: column + 1,
            message: message.into(),
        }
    }

    #[inline]
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        ErrorClass::User
    }
}

/// A parsed statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub op: String,
    pub params: Params,
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&render_statement(&self.op, &self.params))
    }
}

/// True for lines that hold no statement
#[must_use]
pub fn is_blank_or_comment(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

/// Render `op` with `params` in their given order
#[must_use]
pub fn render_statement(op: &str, params: &Params) -> String {
    let mut out = String::with_capacity(op.len() + 2 + params.len() * 16);
    out.push_str(op);
    out.push('(');
    for (i, (key, value)) in params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{key}=\"");
        for c in value.chars() {
            match c {
                '"' | '\\' => {
                    out.push('\\');
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                _ => out.push(c),
            }
        }
        out.push('"');
    }
    out.push(')');
    out
}

/// Parse one statement line
///
/// # Errors
/// [`ScriptError`] pointing at the first offending column
pub fn parse_statement(line: &str) -> Result<Statement, ScriptError> {
    let mut cursor = Cursor::new(line);
    cursor.skip_ws();
    let op = cursor.ident().ok_or_else(|| cursor.error("expected operation name"))?;
    cursor.skip_ws();
    cursor.expect('(')?;

    let mut params = Params::new();
    cursor.skip_ws();
    if !cursor.eat(')') {
        loop {
            cursor.skip_ws();
            let key = cursor.ident().ok_or_else(|| cursor.error("expected parameter name"))?;
            if params.get(&key).is_some() {
                return Err(cursor.error(format!("duplicate parameter {key:?}")));
            }
            cursor.skip_ws();
            cursor.expect('=')?;
            cursor.skip_ws();
            let value = cursor.quoted()?;
            params.insert(key, value);
            cursor.skip_ws();
            if cursor.eat(')') {
                break;
            }
            cursor.expect(',')?;
        }
    }

    cursor.skip_ws();
    if !cursor.at_end() {
        return Err(cursor.error("unexpected text after statement"));
    }
    Ok(Statement { op, params })
}

struct Cursor {
    chars: Vec<char>,
    pos: usize,
}

impl Cursor {
    fn new(line: &str) -> Self {
        Self {
            chars: line.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::at(self.pos, message)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), ScriptError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected {c:?}")))
        }
    }

    fn ident(&mut self) -> Option<String> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.pos += 1,
            _ => return None,
        }
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        Some(self.chars[start..self.pos].iter().collect())
    }

    fn quoted(&mut self) -> Result<String, ScriptError> {
        self.expect('"')?;
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some('"') => {
                    self.pos += 1;
                    return Ok(value);
                }
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c @ ('"' | '\\')) => value.push(c),
                        Some('n') => value.push('\n'),
                        _ => return Err(self.error("invalid escape")),
                    }
                    self.pos += 1;
                }
                Some(c) => {
                    value.push(c);
                    self.pos += 1;
                }
            }
        }
    }
}
