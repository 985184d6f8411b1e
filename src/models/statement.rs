use super::Dialect;

/// One statement produced by the splitter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    text: String,
    dialect: Dialect,
}

impl Statement {
    pub fn new(text: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            text: text.into(),
            dialect,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Transaction boundary direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TclLevel {
    Begin,
    End,
}

/// Session scope of a manipulation statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmlLevel {
    /// Effect is independent of the session it runs on
    SingleSession,
    /// Session-scoped setting that must reach every connection
    MultiSession,
}

/// Category of a statement, decides how the sink executes it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Unknown,
    TransactionControl(TclLevel),
    ControlLanguage,
    DefinitionLanguage,
    Manipulation(DmlLevel),
}

impl Classification {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Classification::Unknown)
    }

    pub fn dml(&self) -> Option<DmlLevel> {
        match self {
            Classification::Manipulation(level) => Some(*level),
            _ => None,
        }
    }
}

/// An `INSERT ... VALUES` statement split into its batching key and rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insert {
    /// `INSERT INTO <table> (<columns>) ` with dialect quoting and a trailing space
    pub prefix: String,
    /// Rendered row tuples, e.g. `(1, 'x')`
    pub values: Vec<String>,
}

impl Insert {
    /// Build the multi-row statement for a prefix and its buffered rows
    pub fn assemble(prefix: &str, values: &[String]) -> String {
        format!("{}VALUES {}", prefix, values.join(", "))
    }

    pub fn to_sql(&self) -> String {
        Self::assemble(&self.prefix, &self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_accessors() {
        let begin = Classification::TransactionControl(TclLevel::Begin);
        assert!(begin.dml().is_none());
        assert!(!begin.is_unknown());

        let set = Classification::Manipulation(DmlLevel::MultiSession);
        assert_eq!(set.dml(), Some(DmlLevel::MultiSession));

        assert!(Classification::Unknown.is_unknown());
        assert!(Classification::DefinitionLanguage.dml().is_none());
    }

    #[test]
    fn test_assemble_insert() {
        let insert = Insert {
            prefix: "INSERT INTO t (a, b) ".to_string(),
            values: vec!["(1, 'x')".to_string(), "(2, 'y')".to_string()],
        };
        assert_eq!(insert.to_sql(), "INSERT INTO t (a, b) VALUES (1, 'x'), (2, 'y')");
    }
}
