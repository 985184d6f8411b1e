use tracing::trace;

use super::{first_word, phrase, strip_leading_comments, Parsed, StatementParser};
use crate::error::PipelineError;
use crate::models::{Classification, Dialect, DmlLevel, TclLevel};

const SINGLE: Classification = Classification::Manipulation(DmlLevel::SingleSession);
const MULTI: Classification = Classification::Manipulation(DmlLevel::MultiSession);
const BEGIN: Classification = Classification::TransactionControl(TclLevel::Begin);
const END: Classification = Classification::TransactionControl(TclLevel::End);
const DCL: Classification = Classification::ControlLanguage;
const DDL: Classification = Classification::DefinitionLanguage;

/// Lexical classifier; matches the leading keyword and a few exact phrases
#[derive(Debug, Clone)]
pub struct PreviewParser {
    dialect: Dialect,
}

impl PreviewParser {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }
}

impl StatementParser for PreviewParser {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn parse(&self, text: &str) -> Result<Parsed, PipelineError> {
        let classification = preview(self.dialect, text);
        trace!("Previewed {} statement as {:?}", self.dialect, classification);
        Ok(Parsed::new(text, classification))
    }
}

/// Classify by leading keyword; total over all inputs
pub fn preview(dialect: Dialect, text: &str) -> Classification {
    let body = strip_leading_comments(text);
    if body.is_empty() {
        return Classification::Unknown;
    }
    if body.starts_with("/*!") {
        // conditional comment, applied per connection
        return MULTI;
    }

    if let Some(class) = phrase(body).and_then(|p| phrase_class(dialect, &p)) {
        return class;
    }

    let word = first_word(body);
    dialect_keyword(dialect, &word)
        .or_else(|| base_keyword(&word))
        .unwrap_or(Classification::Unknown)
}

/// Statements that are only transaction control when written exactly so
fn phrase_class(dialect: Dialect, phrase: &str) -> Option<Classification> {
    let class = match phrase {
        "begin" | "start transaction" => BEGIN,
        "commit" | "rollback" => END,
        _ => match (dialect, phrase) {
            (Dialect::SQLite, "begin transaction")
            | (Dialect::SQLite, "begin deferred")
            | (Dialect::SQLite, "begin deferred transaction")
            | (Dialect::SQLite, "begin immediate")
            | (Dialect::SQLite, "begin immediate transaction")
            | (Dialect::SQLite, "begin exclusive")
            | (Dialect::SQLite, "begin exclusive transaction") => BEGIN,
            (Dialect::SQLite, "end")
            | (Dialect::SQLite, "end transaction")
            | (Dialect::SQLite, "commit transaction")
            | (Dialect::SQLite, "rollback transaction") => END,
            (Dialect::MySQL, "begin work")
            | (Dialect::MySQL, "start transaction read only")
            | (Dialect::MySQL, "start transaction read write")
            | (Dialect::MySQL, "start transaction with consistent snapshot") => BEGIN,
            (Dialect::MySQL, "commit work") | (Dialect::MySQL, "rollback work") => END,
            (Dialect::SqlServer, "begin tran") | (Dialect::SqlServer, "begin transaction") => BEGIN,
            (Dialect::SqlServer, "commit tran")
            | (Dialect::SqlServer, "commit transaction")
            | (Dialect::SqlServer, "rollback tran")
            | (Dialect::SqlServer, "rollback transaction") => END,
            (Dialect::Oracle, "commit work") | (Dialect::Oracle, "rollback work") => END,
            _ => return None,
        },
    };
    Some(class)
}

/// Keywords whose meaning differs by dialect; consulted before the shared table
fn dialect_keyword(dialect: Dialect, word: &str) -> Option<Classification> {
    let class = match (dialect, word) {
        (Dialect::MySQL, "call") => DCL,

        (Dialect::PostgreSQL, "lock") => SINGLE,
        (Dialect::PostgreSQL, "vacuum" | "reindex" | "cluster" | "checkpoint") => DCL,
        (Dialect::PostgreSQL, "comment" | "do") => DDL,
        (Dialect::PostgreSQL, "with" | "values") => SINGLE,
        (Dialect::PostgreSQL, "discard" | "reset") => MULTI,

        (Dialect::SQLite, "pragma" | "attach" | "detach") => MULTI,
        (Dialect::SQLite, "vacuum") => DCL,
        (Dialect::SQLite, "reindex") => DDL,
        (Dialect::SQLite, "with") => SINGLE,

        (Dialect::SqlServer, "exec" | "execute") => DCL,
        (Dialect::SqlServer, "merge" | "with") => SINGLE,

        (Dialect::Oracle, "merge" | "with") => SINGLE,
        (Dialect::Oracle, "call" | "exec") => DCL,
        (Dialect::Oracle, "comment") => DDL,

        _ => return None,
    };
    Some(class)
}

fn base_keyword(word: &str) -> Option<Classification> {
    let class = match word {
        "select" | "insert" | "replace" | "update" | "delete" | "copy" => SINGLE,
        "stream" | "vstream" | "revert" | "flush" => DCL,
        "savepoint" | "lock" => BEGIN,
        "unlock" | "release" | "rollback" => END,
        "create" | "alter" | "rename" | "drop" | "truncate" | "grant" | "revoke" => DDL,
        "set" | "use" => MULTI,
        "show" | "describe" | "desc" | "explain" | "analyze" | "repair" | "optimize" => SINGLE,
        _ => return None,
    };
    Some(class)
}
