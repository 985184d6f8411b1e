use sqlparser::dialect::{
    Dialect as SqlDialect, GenericDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect,
    SQLiteDialect,
};

/// SQL grammar family of a source or destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    MySQL,
    PostgreSQL,
    SQLite,
    Oracle,
    SqlServer,
}

/// How the INSERT decomposer renders identifiers in a batching prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierQuoting {
    /// Every identifier is re-quoted with the given delimiters
    Always { open: char, close: char },
    /// Identifiers keep the quoting they were written with
    AsWritten,
}

impl Dialect {
    /// Resolve a dialect from an address scheme
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_lowercase().as_str() {
            "mysql" | "maria" | "mariadb" => Some(Dialect::MySQL),
            "postgres" | "postgresql" => Some(Dialect::PostgreSQL),
            "sqlite" => Some(Dialect::SQLite),
            "oracle" => Some(Dialect::Oracle),
            "mssql" | "sqlserver" => Some(Dialect::SqlServer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::MySQL => "mysql",
            Dialect::PostgreSQL => "postgres",
            Dialect::SQLite => "sqlite",
            Dialect::Oracle => "oracle",
            Dialect::SqlServer => "mssql",
        }
    }

    /// The sqlparser grammar used to parse statements of this dialect
    pub fn sql_dialect(&self) -> Box<dyn SqlDialect> {
        match self {
            Dialect::MySQL => Box::new(MySqlDialect {}),
            Dialect::PostgreSQL => Box::new(PostgreSqlDialect {}),
            Dialect::SQLite => Box::new(SQLiteDialect {}),
            Dialect::SqlServer => Box::new(MsSqlDialect {}),
            Dialect::Oracle => Box::new(GenericDialect {}),
        }
    }

    pub fn identifier_quoting(&self) -> IdentifierQuoting {
        match self {
            Dialect::MySQL => IdentifierQuoting::Always { open: '`', close: '`' },
            Dialect::SQLite => IdentifierQuoting::Always { open: '"', close: '"' },
            Dialect::SqlServer => IdentifierQuoting::Always { open: '[', close: ']' },
            // quoting changes case folding here
            Dialect::PostgreSQL | Dialect::Oracle => IdentifierQuoting::AsWritten,
        }
    }

    /// Whether a backslash escapes the next character inside string literals
    pub fn backslash_escapes(&self) -> bool {
        matches!(self, Dialect::MySQL)
    }

    /// Whether `$tag$ ... $tag$` bodies are string literals
    pub fn dollar_quoting(&self) -> bool {
        matches!(self, Dialect::PostgreSQL)
    }

    /// Driver error fragments that are reported on success-equivalent outcomes
    pub fn harmless_error_signatures(&self) -> &'static [&'static str] {
        match self {
            Dialect::MySQL => &["(1065)", "Query was empty", "no rows in result set"],
            Dialect::PostgreSQL => &["no rows in result set", "empty query"],
            Dialect::SQLite => &[
                "Execute returned results",
                "Query returned no rows",
                "not an error",
            ],
            Dialect::Oracle => &["no rows in result set", "ORA-01403"],
            Dialect::SqlServer => &["no rows in result set"],
        }
    }

    pub fn is_harmless_error(&self, message: &str) -> bool {
        self.harmless_error_signatures()
            .iter()
            .any(|signature| message.contains(signature))
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_scheme_aliases() {
        assert_eq!(Dialect::from_scheme("maria"), Some(Dialect::MySQL));
        assert_eq!(Dialect::from_scheme("MariaDB"), Some(Dialect::MySQL));
        assert_eq!(Dialect::from_scheme("postgresql"), Some(Dialect::PostgreSQL));
        assert_eq!(Dialect::from_scheme("sqlserver"), Some(Dialect::SqlServer));
        assert_eq!(Dialect::from_scheme("mssql"), Some(Dialect::SqlServer));
        assert_eq!(Dialect::from_scheme("redis"), None);
    }

    #[test]
    fn test_harmless_errors_are_dialect_specific() {
        let empty = "ERROR 42000 (1065): Query was empty";
        assert!(Dialect::MySQL.is_harmless_error(empty));
        assert!(!Dialect::PostgreSQL.is_harmless_error(empty));
        assert!(!Dialect::MySQL.is_harmless_error("ERROR 1146 (42S02): Table 'x' doesn't exist"));
    }

    #[test]
    fn test_lexical_features() {
        assert!(Dialect::MySQL.backslash_escapes());
        assert!(!Dialect::PostgreSQL.backslash_escapes());
        assert!(Dialect::PostgreSQL.dollar_quoting());
        assert!(!Dialect::SQLite.dollar_quoting());
    }
}
