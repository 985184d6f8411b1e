use sqlparser::ast::Statement as Ast;
use tracing::trace;

use super::insert::parse_sql;
use super::preview::preview;
use super::{is_blank, Parsed, StatementParser};
use crate::error::PipelineError;
use crate::models::{Classification, Dialect, DmlLevel, TclLevel};

/// Full-grammar classifier; keeps the parsed tree for decomposition
#[derive(Debug, Clone)]
pub struct GrammarParser {
    dialect: Dialect,
}

impl GrammarParser {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }
}

impl StatementParser for GrammarParser {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn parse(&self, text: &str) -> Result<Parsed, PipelineError> {
        match parse_sql(self.dialect, text) {
            Ok(mut statements) => {
                let Some(first) = statements.first() else {
                    return Ok(Parsed::new(text, Classification::Unknown));
                };
                let classification =
                    classify_tree(first).unwrap_or_else(|| preview(self.dialect, text));
                let parsed = Parsed::new(text, classification);
                if statements.len() == 1 {
                    Ok(parsed.with_ast(statements.remove(0)))
                } else {
                    Ok(parsed)
                }
            }
            Err(e) => {
                let classification = preview(self.dialect, text);
                if classification.is_unknown() && !is_blank(text) {
                    return Err(PipelineError::parse(text, e.to_string()));
                }
                trace!("Grammar rejected statement, keyword table decided: {}", e);
                Ok(Parsed::new(text, classification))
            }
        }
    }
}

/// Classification implied by the statement kind, None for kinds left to the keyword table
fn classify_tree(statement: &Ast) -> Option<Classification> {
    let class = match statement {
        Ast::StartTransaction { .. } | Ast::Savepoint { .. } => {
            Classification::TransactionControl(TclLevel::Begin)
        }
        Ast::Commit { .. } | Ast::Rollback { .. } | Ast::ReleaseSavepoint { .. } => {
            Classification::TransactionControl(TclLevel::End)
        }
        Ast::Grant { .. } | Ast::Revoke { .. } => Classification::ControlLanguage,
        Ast::Set { .. } | Ast::Use { .. } => Classification::Manipulation(DmlLevel::MultiSession),
        Ast::Query { .. }
        | Ast::Insert { .. }
        | Ast::Update { .. }
        | Ast::Delete { .. }
        | Ast::Copy { .. }
        | Ast::Explain { .. }
        | Ast::Merge { .. } => Classification::Manipulation(DmlLevel::SingleSession),
        Ast::CreateTable { .. }
        | Ast::CreateIndex { .. }
        | Ast::CreateView { .. }
        | Ast::CreateSchema { .. }
        | Ast::CreateDatabase { .. }
        | Ast::CreateFunction { .. }
        | Ast::AlterTable { .. }
        | Ast::Drop { .. }
        | Ast::Truncate { .. } => Classification::DefinitionLanguage,
        _ => return None,
    };
    Some(class)
}
