// Insert Decomposer
//
// Splits `INSERT ... VALUES (...), (...)` into a reusable prefix and
// individually rendered rows. Anything else is left to run as written.

use sqlparser::ast::{self, Ident, ObjectName, SetExpr, TableObject};
use sqlparser::parser::{Parser, ParserError, ParserOptions};

use crate::models::{Dialect, IdentifierQuoting, Insert};

/// Parse with the dialect's grammar, leaving string escapes as written
pub(crate) fn parse_sql(dialect: Dialect, text: &str) -> Result<Vec<ast::Statement>, ParserError> {
    let grammar = dialect.sql_dialect();
    Parser::new(grammar.as_ref())
        .with_options(ParserOptions::new().with_unescape(false))
        .try_with_sql(text)?
        .parse_statements()
}

/// Decompose a statement text; None when it is not a plain multi-row INSERT
pub fn decompose(dialect: Dialect, text: &str) -> Option<Insert> {
    let statements = parse_sql(dialect, text).ok()?;
    match statements.as_slice() {
        [statement] => decompose_statement(dialect, statement),
        _ => None,
    }
}

pub fn decompose_statement(dialect: Dialect, statement: &ast::Statement) -> Option<Insert> {
    let ast::Statement::Insert(insert) = statement else {
        return None;
    };

    if insert.replace_into
        || insert.or.is_some()
        || insert.priority.is_some()
        || insert.on.is_some()
        || insert.returning.is_some()
        || !insert.assignments.is_empty()
        || insert.partitioned.is_some()
        || !insert.after_columns.is_empty()
        || insert.overwrite
        || insert.table_alias.is_some()
        || insert.insert_alias.is_some()
    {
        return None;
    }

    let source = insert.source.as_ref()?;
    if source.with.is_some() || source.order_by.is_some() || source.limit_clause.is_some() {
        return None;
    }
    let SetExpr::Values(values) = source.body.as_ref() else {
        return None;
    };
    if values.rows.is_empty() {
        return None;
    }

    let TableObject::TableName(name) = &insert.table else {
        return None;
    };
    let quoting = dialect.identifier_quoting();

    let mut prefix = String::from("INSERT ");
    if insert.ignore {
        prefix.push_str("IGNORE ");
    }
    prefix.push_str("INTO ");
    prefix.push_str(&render_name(name, quoting)?);
    prefix.push(' ');
    if !insert.columns.is_empty() {
        let columns: Vec<String> = insert
            .columns
            .iter()
            .map(|column| render_ident(column, quoting))
            .collect();
        prefix.push('(');
        prefix.push_str(&columns.join(", "));
        prefix.push_str(") ");
    }

    let values = values
        .rows
        .iter()
        .map(|row| {
            let exprs: Vec<String> = row.iter().map(|expr| expr.to_string()).collect();
            format!("({})", exprs.join(", "))
        })
        .collect();

    Some(Insert { prefix, values })
}

fn render_name(name: &ObjectName, quoting: IdentifierQuoting) -> Option<String> {
    if quoting == IdentifierQuoting::AsWritten {
        return Some(name.to_string());
    }
    let parts = name
        .0
        .iter()
        .map(|part| part.as_ident().map(|ident| render_ident(ident, quoting)))
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("."))
}

fn render_ident(ident: &Ident, quoting: IdentifierQuoting) -> String {
    match quoting {
        IdentifierQuoting::AsWritten => ident.to_string(),
        IdentifierQuoting::Always { open, close } => {
            let escaped = unquoted_value(ident).replace(close, &format!("{}{}", close, close));
            format!("{}{}{}", open, escaped, close)
        }
    }
}

/// The identifier's value with its own quote doubling undone.
///
/// Parsing keeps escapes as written, so a quoted identifier still carries
/// its doubled closing quote.
fn unquoted_value(ident: &Ident) -> String {
    let close = match ident.quote_style {
        Some('[') => ']',
        Some(quote) => quote,
        None => return ident.value.clone(),
    };
    let doubled: String = [close, close].iter().collect();
    ident.value.replace(&doubled, &close.to_string())
}
