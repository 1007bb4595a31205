pub mod inspect;
pub mod scaffold;

use std::path::Path;

use sanitize_filename::sanitize;
use tracing::info;

use crate::{
    analysis::EssayAnalysis,
    docx::WordDocument,
    error::{PartialSubstitutionWarning, ReportError, ReportResult},
    substitution::{SubstitutionDriver, SubstitutionStats},
    tokens::{TokenMap, TokenMapBuilder},
};

pub use inspect::{ParagraphFindings, PlaceholderFinding, Region, TemplateReport, inspect_template};
pub use scaffold::default_template;

/// A completed document and what it took to produce it.
#[derive(Debug, Clone)]
pub struct FilledDocument {
    pub bytes: Vec<u8>,
    pub stats: SubstitutionStats,
    pub warnings: Vec<PartialSubstitutionWarning>,
}

/// Replace every token of `map` throughout the template package.
///
/// Either returns a complete document or an error; no partial output is ever
/// produced. Tokens never found in the template are reported as warnings.
pub fn fill_template(template: &[u8], map: &TokenMap) -> ReportResult<FilledDocument> {
    let document = WordDocument::open(template)?;
    let output = SubstitutionDriver::new(document, map).run()?;

    let stats = output.stats;
    info!(
        paragraphs = stats.paragraphs_visited,
        run_replacements = stats.run_replacements,
        reconstructed = stats.reconstructed_paragraphs,
        sweep_replacements = stats.sweep_replacements,
        skipped = stats.skipped_nodes,
        missing_tokens = output.warnings.len(),
        "report template filled"
    );

    Ok(FilledDocument {
        bytes: output.bytes,
        stats,
        warnings: output.warnings,
    })
}

pub fn fill_template_from_path(path: &Path, map: &TokenMap) -> ReportResult<FilledDocument> {
    let bytes = std::fs::read(path).map_err(|err| ReportError::TemplateNotFound {
        location: path.display().to_string(),
        reason: err.to_string(),
    })?;
    fill_template(&bytes, map)
}

/// Build the token map for `record` and fill the template with it.
pub fn render_report(
    template: &[u8],
    record: Option<&EssayAnalysis>,
    builder: &TokenMapBuilder,
) -> ReportResult<FilledDocument> {
    let map = builder.build(record)?;
    fill_template(template, &map)
}

/// `Correcao_<Student_Name>_<discriminator>.docx`, safe for any filesystem.
pub fn report_file_name(record: &EssayAnalysis, discriminator: &str) -> String {
    let student = record
        .student_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or("Aluno");

    let mut stem = format!("Correcao_{}", underscored(student));
    let discriminator = discriminator.trim();
    if !discriminator.is_empty() {
        stem.push('_');
        stem.push_str(&underscored(discriminator));
    }
    format!("{}.docx", sanitize(stem))
}

fn underscored(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join("_")
}
