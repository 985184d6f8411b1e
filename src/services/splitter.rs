// Statement Splitter
//
// Turns a byte stream into an ordered sequence of statement texts. A statement
// ends at a line feed preceded by `;` (outside quotes and comments), at the end
// of a full-line comment, or at end of stream.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::PipelineError;
use crate::models::{Dialect, Statement};

/// Bytes requested from the underlying reader per read call
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// What the current statement starts with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    LineComment,
    BlockComment,
    Code,
}

/// Lexical position inside a code statement, carried across lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lexeme {
    Plain,
    Quoted(u8),
    BlockComment,
    Dollar,
}

/// Incremental splitter over bytes fed by the caller
///
/// Lines are scanned once; the lexical state of a multi-line statement is kept
/// between calls so large statements are not rescanned as more data arrives.
#[derive(Debug)]
pub struct Splitter {
    dialect: Dialect,
    buf: Vec<u8>,
    /// Start of the next unscanned line in `buf`
    cursor: usize,
    shape: Option<Shape>,
    lexeme: Lexeme,
    dollar_tag: Vec<u8>,
}

impl Splitter {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            buf: Vec::new(),
            cursor: 0,
            shape: None,
            lexeme: Lexeme::Plain,
            dollar_tag: Vec::new(),
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete statement, or None when more input is needed.
    /// With `at_eof` the trailing partial statement is flushed.
    pub fn next_statement(&mut self, at_eof: bool) -> Option<String> {
        loop {
            if self.shape.is_none() {
                self.skip_leading_whitespace();
                if self.buf.is_empty() {
                    return None;
                }
                if self.buf.len() < 2 && !at_eof && !self.buf.contains(&b'\n') {
                    return None;
                }
                self.shape = Some(self.shape_of_buffer());
            }

            match self.buf[self.cursor..].iter().position(|&b| b == b'\n') {
                Some(offset) => {
                    let end = self.cursor + offset;
                    let terminated = self.scan_line(self.cursor, end);
                    self.cursor = end + 1;
                    if terminated {
                        let text = self.take(end + 1);
                        if !text.is_empty() {
                            return Some(text);
                        }
                    }
                }
                None => {
                    if !at_eof {
                        return None;
                    }
                    let len = self.buf.len();
                    let text = self.take(len);
                    return if text.is_empty() { None } else { Some(text) };
                }
            }
        }
    }

    fn skip_leading_whitespace(&mut self) {
        let blank = self
            .buf
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        if blank > 0 {
            self.buf.drain(..blank);
        }
    }

    fn shape_of_buffer(&self) -> Shape {
        if self.buf.starts_with(b"--") {
            Shape::LineComment
        } else if self.buf.starts_with(b"#") && self.dialect == Dialect::MySQL {
            Shape::LineComment
        } else if self.buf.starts_with(b"/*") {
            Shape::BlockComment
        } else {
            Shape::Code
        }
    }

    /// Scan `buf[start..end]` (one line without its feed); true if it ends the statement
    fn scan_line(&mut self, start: usize, end: usize) -> bool {
        let line = &self.buf[start..end];
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        match self.shape {
            Some(Shape::LineComment) => true,
            Some(Shape::BlockComment) => {
                let line = line.to_vec();
                match self.scan_code(&line) {
                    // nothing but comments so far; ends once none is open
                    None => self.lexeme == Lexeme::Plain,
                    Some(last) => {
                        self.shape = Some(Shape::Code);
                        self.lexeme == Lexeme::Plain && last == b';'
                    }
                }
            }
            Some(Shape::Code) | None => {
                let line = line.to_vec();
                let last = self.scan_code(&line);
                self.lexeme == Lexeme::Plain && last == Some(b';')
            }
        }
    }

    /// Advance the lexical state over one line, returning the last significant
    /// byte seen outside strings and comments
    fn scan_code(&mut self, line: &[u8]) -> Option<u8> {
        let mut last = None;
        let mut i = 0;

        while i < line.len() {
            let b = line[i];
            match self.lexeme {
                Lexeme::Plain => match b {
                    b'\'' | b'"' | b'`' => {
                        self.lexeme = Lexeme::Quoted(b);
                        last = Some(b);
                    }
                    b'-' if line.get(i + 1) == Some(&b'-') => break,
                    b'#' if self.dialect == Dialect::MySQL => break,
                    b'/' if line.get(i + 1) == Some(&b'*') => {
                        self.lexeme = Lexeme::BlockComment;
                        i += 2;
                        continue;
                    }
                    b'$' if self.dialect.dollar_quoting() => {
                        last = Some(b);
                        if let Some(len) = dollar_tag_len(&line[i..]) {
                            self.dollar_tag = line[i..i + len].to_vec();
                            self.lexeme = Lexeme::Dollar;
                            i += len;
                            continue;
                        }
                    }
                    b if b.is_ascii_whitespace() => {}
                    _ => last = Some(b),
                },
                Lexeme::Quoted(quote) => {
                    if b == b'\\' && self.dialect.backslash_escapes() {
                        i += 2;
                        continue;
                    }
                    if b == quote {
                        if line.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        self.lexeme = Lexeme::Plain;
                        last = Some(quote);
                    }
                }
                Lexeme::BlockComment => {
                    if b == b'*' && line.get(i + 1) == Some(&b'/') {
                        self.lexeme = Lexeme::Plain;
                        i += 2;
                        continue;
                    }
                }
                Lexeme::Dollar => {
                    if line[i..].starts_with(&self.dollar_tag) {
                        i += self.dollar_tag.len();
                        self.lexeme = Lexeme::Plain;
                        last = Some(b'$');
                        continue;
                    }
                }
            }
            i += 1;
        }

        last
    }

    /// Remove the first `end` bytes as a statement and reset per-statement state
    fn take(&mut self, end: usize) -> String {
        let bytes: Vec<u8> = self.buf.drain(..end).collect();
        self.cursor = 0;
        self.shape = None;
        self.lexeme = Lexeme::Plain;
        self.dollar_tag.clear();

        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        };
        text.trim().to_string()
    }
}

/// Length of a `$tag$` opener at the start of `s`, if any
fn dollar_tag_len(s: &[u8]) -> Option<usize> {
    if s.first() != Some(&b'$') {
        return None;
    }
    if s.get(1).is_some_and(|b| b.is_ascii_digit()) {
        // positional parameter such as $1
        return None;
    }
    let close = s[1..].iter().position(|&b| b == b'$')? + 1;
    s[1..close]
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || *b == b'_')
        .then_some(close + 1)
}

/// Lazily reads statements from an async byte stream
pub struct StatementReader<R> {
    reader: R,
    splitter: Splitter,
    dialect: Dialect,
    chunk: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> StatementReader<R> {
    pub fn new(reader: R, dialect: Dialect) -> Self {
        Self {
            reader,
            splitter: Splitter::new(dialect),
            dialect,
            chunk: vec![0; READ_CHUNK_SIZE],
            eof: false,
        }
    }

    /// Next statement in stream order, None once the stream is exhausted
    pub async fn next_statement(&mut self) -> Result<Option<Statement>, PipelineError> {
        loop {
            if let Some(text) = self.splitter.next_statement(self.eof) {
                return Ok(Some(Statement::new(text, self.dialect)));
            }
            if self.eof {
                return Ok(None);
            }

            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                self.eof = true;
            } else {
                self.splitter.feed(&self.chunk[..n]);
            }
        }
    }
}

/// Split an in-memory script in one go
pub fn split_statements(input: &str, dialect: Dialect) -> Vec<String> {
    let mut splitter = Splitter::new(dialect);
    splitter.feed(input.as_bytes());
    std::iter::from_fn(|| splitter.next_statement(true)).collect()
}
