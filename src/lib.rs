//! Essay report generation: fills a `.docx` report template with the
//! graded analysis of one essay.
//!
//! Placeholders such as `{{NOME_ALUNO}}` are replaced across the body,
//! nested tables, headers, footers and text boxes, keeping run formatting
//! wherever the token sits inside a single run.

pub mod analysis;
pub mod batch;
pub mod config;
pub mod docx;
pub mod error;
pub mod report;
pub mod substitution;
pub mod tokens;

#[cfg(test)]
pub(crate) mod test_support;

pub use analysis::{CriterionAnalysis, EssayAnalysis};
pub use error::{PartialSubstitutionWarning, ReportError, ReportResult};
pub use report::{
    FilledDocument, fill_template, fill_template_from_path, render_report, report_file_name,
};
pub use tokens::{Locale, Token, TokenMap, TokenMapBuilder, build_token_map};
