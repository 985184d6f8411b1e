// Dialect Classifier
//
// Two interchangeable backends sit behind `StatementParser`: a lexical preview
// used by most dialects and a full-grammar parser for PostgreSQL. Both produce a
// `Parsed` value that the sink routes on and the INSERT decomposer consumes.

pub mod grammar;
pub mod insert;
pub mod preview;

use sqlparser::ast;

use crate::error::PipelineError;
use crate::models::{Classification, Dialect, DmlLevel, Insert};

pub use grammar::GrammarParser;
pub use insert::decompose;
pub use preview::PreviewParser;

/// A classified statement, with its syntax tree when a grammar produced one
#[derive(Debug, Clone)]
pub struct Parsed {
    pub origin: String,
    pub classification: Classification,
    pub ast: Option<ast::Statement>,
}

impl Parsed {
    pub fn new(origin: &str, classification: Classification) -> Self {
        Self {
            origin: origin.to_string(),
            classification,
            ast: None,
        }
    }

    pub fn with_ast(mut self, ast: ast::Statement) -> Self {
        self.ast = Some(ast);
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.classification.is_unknown()
    }

    pub fn dml(&self) -> Option<DmlLevel> {
        self.classification.dml()
    }
}

/// Dialect-specific classification and INSERT decomposition
pub trait StatementParser: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Classify one statement text
    fn parse(&self, text: &str) -> Result<Parsed, PipelineError>;

    /// Split a single-session INSERT into a batching prefix and rows.
    /// None means the statement must run as written.
    fn decompose(&self, parsed: &Parsed) -> Option<Insert> {
        if parsed.dml() != Some(DmlLevel::SingleSession) {
            return None;
        }
        match &parsed.ast {
            Some(statement) => insert::decompose_statement(self.dialect(), statement),
            None => insert::decompose(self.dialect(), &parsed.origin),
        }
    }
}

/// Parser backend for a dialect
pub fn parser_for(dialect: Dialect) -> Box<dyn StatementParser> {
    match dialect {
        Dialect::PostgreSQL => Box::new(GrammarParser::new(dialect)),
        Dialect::MySQL | Dialect::SQLite | Dialect::Oracle | Dialect::SqlServer => {
            Box::new(PreviewParser::new(dialect))
        }
    }
}

/// Classify a statement with the dialect's lexical tables only; never fails
pub fn classify(dialect: Dialect, text: &str) -> Classification {
    preview::preview(dialect, text)
}

/// Drop leading whitespace and comments, keeping `/*!` conditional comments
pub(crate) fn strip_leading_comments(text: &str) -> &str {
    let mut rest = text;
    loop {
        rest = rest.trim_start();
        if rest.starts_with("--") || rest.starts_with('#') {
            rest = match rest.find('\n') {
                Some(end) => &rest[end + 1..],
                None => "",
            };
        } else if rest.starts_with("/*") && !rest.starts_with("/*!") {
            rest = match rest[2..].find("*/") {
                Some(end) => &rest[2 + end + 2..],
                None => "",
            };
        } else {
            return rest;
        }
    }
}

/// True when nothing but comments, whitespace and semicolons remain
pub(crate) fn is_blank(text: &str) -> bool {
    only_trailer(strip_leading_comments(text))
}

fn only_trailer(text: &str) -> bool {
    let mut rest = text;
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return true;
        }
        if let Some(after) = rest.strip_prefix(';') {
            rest = after;
        } else if rest.starts_with("--") || rest.starts_with('#') {
            rest = match rest.find('\n') {
                Some(end) => &rest[end + 1..],
                None => "",
            };
        } else if rest.starts_with("/*") && !rest.starts_with("/*!") {
            let body = &rest[2..];
            rest = match body.find("*/") {
                Some(end) => &body[end + 2..],
                None => "",
            };
        } else {
            return false;
        }
    }
}

/// First run of letters, lowercased
pub(crate) fn first_word(body: &str) -> String {
    body.trim_start_matches(|c: char| !c.is_alphabetic())
        .chars()
        .take_while(|c| c.is_alphabetic())
        .flat_map(char::to_lowercase)
        .collect()
}

/// The statement as a lowercase phrase of words separated by single spaces,
/// provided it contains nothing but words, comments and semicolons
pub(crate) fn phrase(body: &str) -> Option<String> {
    let mut words = Vec::new();
    let mut rest = body;
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let len = rest
            .find(|c: char| !c.is_alphabetic())
            .unwrap_or(rest.len());
        if len == 0 {
            if !only_trailer(rest) {
                return None;
            }
            break;
        }
        words.push(rest[..len].to_lowercase());
        rest = &rest[len..];
    }
    Some(words.join(" "))
}
