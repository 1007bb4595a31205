use std::fmt;

use thiserror::Error;

use crate::tokens::Token;

/// Result type used by the report engine.
pub type ReportResult<T> = Result<T, ReportError>;

/// Failures surfaced by the engine. Any of these means no output was produced.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("required field `{field}` is missing")]
    MissingRequiredField { field: &'static str },

    #[error("template not found at {location}: {reason}")]
    TemplateNotFound { location: String, reason: String },

    #[error("template package is corrupt: {0}")]
    TemplateCorrupt(String),

    #[error("failed to serialize report document: {0}")]
    Serialization(String),

    #[error("analysis record could not be parsed: {0}")]
    InvalidRecord(String),

    #[error("invalid placeholder token `{0}`")]
    InvalidToken(String),
}

impl ReportError {
    pub(crate) fn corrupt(context: &str, err: impl fmt::Display) -> Self {
        ReportError::TemplateCorrupt(format!("{context}: {err}"))
    }

    pub(crate) fn serialization(context: &str, err: impl fmt::Display) -> Self {
        ReportError::Serialization(format!("{context}: {err}"))
    }
}

/// A token from the map that never occurred anywhere in the template.
///
/// Not fatal: templates may leave out optional regions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialSubstitutionWarning {
    pub token: Token,
    pub aliases: Vec<Token>,
}

impl fmt::Display for PartialSubstitutionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token {} was not found in the template", self.token)?;
        if !self.aliases.is_empty() {
            let names: Vec<&str> = self.aliases.iter().map(Token::as_str).collect();
            write!(f, " (aliases also absent: {})", names.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_mentions_aliases() {
        let warning = PartialSubstitutionWarning {
            token: Token::new("NOME_ALUNO").expect("token"),
            aliases: vec![Token::new("NAME").expect("token")],
        };
        let rendered = warning.to_string();
        assert!(rendered.contains("{{NOME_ALUNO}}"));
        assert!(rendered.contains("{{NAME}}"));
    }

    #[test]
    fn corrupt_error_keeps_context() {
        let err = ReportError::corrupt("word/document.xml", "unexpected end of file");
        assert_eq!(
            err.to_string(),
            "template package is corrupt: word/document.xml: unexpected end of file"
        );
    }
}
