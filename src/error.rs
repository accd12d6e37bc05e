//! Error types for lemkpg.

use thiserror::Error;

/// The main error type for lemkpg operations.
#[derive(Debug, Error)]
pub enum LemkPgError {
    /// Failed to parse a filter, value or clause written as text.
    #[error("Parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    /// A table or column name that is not a plain (optionally qualified) identifier.
    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    /// Invalid comparison operator.
    #[error("Invalid operator: '{0}'. Expected one of: =, !=, <>, <, <=, >, >=, LIKE, ILIKE")]
    InvalidOperator(String),

    /// Unsupported join type.
    #[error("Incorrect JOIN type '{0}'. Please use one of the valid JOIN types: {valid}", valid = crate::ast::JoinKind::VALID.join(", "))]
    InvalidJoin(String),

    /// Sort direction other than ASC / DESC.
    #[error("Invalid sort order: '{0}'. Expected ASC or DESC")]
    InvalidSortOrder(String),

    /// Column type that cannot be spliced into DDL.
    #[error("Invalid column type: '{0}'")]
    InvalidType(String),

    /// Invalid value.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Statement is missing the parts it needs to be rendered.
    #[error("Empty statement: {0}")]
    EmptyStatement(&'static str),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution error.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LemkPgError {
    /// Create a parse error at the given position.
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }
}

/// Result type alias for lemkpg operations.
pub type LemkPgResult<T> = Result<T, LemkPgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LemkPgError::parse(5, "unexpected character");
        assert_eq!(
            err.to_string(),
            "Parse error at position 5: unexpected character"
        );
    }

    #[test]
    fn test_join_error_lists_valid_types() {
        let err = LemkPgError::InvalidJoin("CROSS JOIN".to_string());
        let msg = err.to_string();
        assert!(msg.starts_with("Incorrect JOIN type 'CROSS JOIN'"));
        assert!(msg.contains("INNER JOIN"));
        assert!(msg.contains("FULL OUTER JOIN"));
    }
}
