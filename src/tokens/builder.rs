use crate::{
    analysis::{CRITERIA_COUNT, EssayAnalysis, format_score},
    error::{ReportError, ReportResult},
};

use super::{Locale, Token, TokenMap};

/// Scalar fields: canonical token name followed by its aliases.
const STUDENT_NAME: &[&str] = &["NOME_ALUNO", "NAME"];
const THEME: &[&str] = &["TEMA", "THEME"];
const DATE: &[&str] = &["DATA", "DATE"];
const YEAR: &[&str] = &["ANO", "YEAR"];
const TERM: &[&str] = &["BIMESTRE", "TERM"];
const FINAL_SCORE: &[&str] = &["NOTA_FINAL", "FINAL_SCORE", "NOTA_TOTAL"];
const COMMENTS: &[&str] = &["COMENTARIOS", "COMMENTS"];
const ORIGINALITY_ALERT: &[&str] = &["ALERTA_ORIGINALIDADE", "ORIGINALITY_ALERT"];

/// Cleans free-text analysis before it is inserted into the report.
pub trait AnalysisSanitizer: Send + Sync {
    fn sanitize(&self, text: &str) -> String;
}

impl<F> AnalysisSanitizer for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn sanitize(&self, text: &str) -> String {
        self(text)
    }
}

/// Strips markdown bold (`**`) and heading (`#`) markers, which would render
/// literally in the document.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownMarkers;

impl AnalysisSanitizer for MarkdownMarkers {
    fn sanitize(&self, text: &str) -> String {
        text.replace("**", "").replace('#', "").trim().to_string()
    }
}

pub struct TokenMapBuilder {
    locale: Locale,
    sanitizer: Box<dyn AnalysisSanitizer>,
}

impl Default for TokenMapBuilder {
    fn default() -> Self {
        Self::new(Locale::default())
    }
}

impl TokenMapBuilder {
    pub fn new(locale: Locale) -> Self {
        Self {
            locale,
            sanitizer: Box::new(MarkdownMarkers),
        }
    }

    /// Replace the default markdown sanitizer.
    pub fn with_sanitizer(mut self, sanitizer: impl AnalysisSanitizer + 'static) -> Self {
        self.sanitizer = Box::new(sanitizer);
        self
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    /// Build the token map for one record.
    ///
    /// Only an absent record is an error; absent sub-fields fall back to the
    /// locale sentinels and a zero/absent final score is derived from the
    /// criterion scores.
    pub fn build(&self, record: Option<&EssayAnalysis>) -> ReportResult<TokenMap> {
        let record = record.ok_or(ReportError::MissingRequiredField { field: "record" })?;
        let not_informed = self.locale.not_informed();
        let mut map = TokenMap::default();

        insert_field(&mut map, STUDENT_NAME, text_or(&record.student_name, not_informed));
        insert_field(&mut map, THEME, text_or(&record.essay_theme, not_informed));
        insert_field(&mut map, DATE, text_or(&record.essay_date, not_informed));
        insert_field(&mut map, YEAR, text_or(&record.class_year, not_informed));
        insert_field(&mut map, TERM, text_or(&record.term, not_informed));
        insert_field(
            &mut map,
            FINAL_SCORE,
            format_score(record.effective_final_score()),
        );
        insert_field(&mut map, COMMENTS, text_or(&record.general_comments, ""));
        insert_field(
            &mut map,
            ORIGINALITY_ALERT,
            text_or(&record.originality_alert, ""),
        );

        for index in 1..=CRITERIA_COUNT {
            let criterion = record.criteria.get(index);
            let score = criterion.and_then(|c| c.score).unwrap_or(0.0);
            let analysis = criterion
                .and_then(|c| c.analysis.as_deref())
                .map(|text| self.sanitizer.sanitize(text))
                .filter(|text| !text.trim().is_empty())
                .unwrap_or_else(|| self.locale.analysis_unavailable().to_string());

            let (nota, score_alias) = (format!("NOTA_C{index}"), format!("SCORE_C{index}"));
            let (analise, analysis_alias) =
                (format!("ANALISE_C{index}"), format!("ANALYSIS_C{index}"));
            insert_field(&mut map, &[nota.as_str(), score_alias.as_str()], format_score(score));
            insert_field(&mut map, &[analise.as_str(), analysis_alias.as_str()], analysis);
        }

        Ok(map)
    }
}

/// Token map for a record using the English sentinels and default sanitizer.
pub fn build_token_map(record: &EssayAnalysis) -> TokenMap {
    TokenMapBuilder::default()
        .build(Some(record))
        .unwrap_or_default()
}

fn insert_field(map: &mut TokenMap, names: &[&str], value: String) {
    let mut tokens = names.iter().filter_map(|name| Token::new(name).ok());
    let Some(canonical) = tokens.next() else {
        return;
    };
    map.insert(canonical.clone(), value);
    for alias in tokens {
        map.insert_alias(alias, &canonical);
    }
}

fn text_or(value: &Option<String>, fallback: &str) -> String {
    value
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::CriterionAnalysis;

    fn record_with_scores(scores: [f64; 5]) -> EssayAnalysis {
        let mut record = EssayAnalysis {
            student_name: Some("Ana Silva".to_string()),
            ..Default::default()
        };
        for (offset, score) in scores.into_iter().enumerate() {
            record
                .criteria
                .set(offset + 1, CriterionAnalysis::new(score, "## Coesão **boa**"));
        }
        record
    }

    #[test]
    fn derives_final_score_from_criteria() {
        let record = record_with_scores([6.0, 8.0, 7.0, 5.0, 9.0]);
        let map = build_token_map(&record);
        assert_eq!(map.get("{{NOTA_FINAL}}"), Some("35"));
        assert_eq!(map.get("{{FINAL_SCORE}}"), Some("35"));
        assert_eq!(map.get("{{NOTA_TOTAL}}"), Some("35"));
    }

    #[test]
    fn explicit_final_score_wins() {
        let mut record = record_with_scores([6.0, 8.0, 7.0, 5.0, 9.0]);
        record.final_score = Some(870.0);
        let map = build_token_map(&record);
        assert_eq!(map.get("{{NOTA_FINAL}}"), Some("870"));
    }

    #[test]
    fn missing_criterion_uses_defaults() {
        let mut record = record_with_scores([6.0, 8.0, 7.0, 5.0, 9.0]);
        record.criteria.c3 = None;
        let map = build_token_map(&record);
        assert_eq!(map.get("{{NOTA_C3}}"), Some("0"));
        assert_eq!(map.get("{{ANALISE_C3}}"), Some("Analysis not available"));
        assert_eq!(map.get("{{SCORE_C3}}"), Some("0"));
        assert_eq!(map.get("{{ANALYSIS_C3}}"), Some("Analysis not available"));
    }

    #[test]
    fn strips_markdown_markers_from_analysis() {
        let record = record_with_scores([1.0; 5]);
        let map = build_token_map(&record);
        assert_eq!(map.get("{{ANALISE_C1}}"), Some("Coesão boa"));
    }

    #[test]
    fn absent_scalars_use_locale_sentinels() {
        let map = TokenMapBuilder::new(Locale::Portuguese)
            .build(Some(&EssayAnalysis::default()))
            .expect("map");
        assert_eq!(map.get("{{NOME_ALUNO}}"), Some("Não informado"));
        assert_eq!(map.get("{{TEMA}}"), Some("Não informado"));
        assert_eq!(map.get("{{COMENTARIOS}}"), Some(""));
        assert_eq!(map.get("{{ALERTA_ORIGINALIDADE}}"), Some(""));
        assert_eq!(map.get("{{ANALISE_C5}}"), Some("Análise não disponível."));
        assert_eq!(map.get("{{NOTA_FINAL}}"), Some("0"));
    }

    #[test]
    fn absent_record_is_an_error() {
        let err = TokenMapBuilder::default().build(None).unwrap_err();
        assert!(matches!(
            err,
            ReportError::MissingRequiredField { field: "record" }
        ));
    }

    #[test]
    fn custom_sanitizer_replaces_default() {
        let builder = TokenMapBuilder::default()
            .with_sanitizer(|text: &str| text.replace("- ", "").to_uppercase());
        let mut record = EssayAnalysis::default();
        record
            .criteria
            .set(2, CriterionAnalysis::new(120.0, "- tese clara"));
        let map = builder.build(Some(&record)).expect("map");
        assert_eq!(map.get("{{ANALISE_C2}}"), Some("TESE CLARA"));
    }

    #[test]
    fn every_documented_token_is_present() {
        let map = build_token_map(&EssayAnalysis::default());
        let expected = [
            "NOME_ALUNO", "NAME", "TEMA", "THEME", "ANO", "YEAR", "BIMESTRE", "TERM",
            "NOTA_FINAL", "FINAL_SCORE", "COMENTARIOS", "COMMENTS", "ALERTA_ORIGINALIDADE",
            "ORIGINALITY_ALERT", "DATA", "DATE",
        ];
        for name in expected {
            assert!(map.get(&format!("{{{{{name}}}}}")).is_some(), "{name} missing");
        }
        for index in 1..=5 {
            assert!(map.get(&format!("{{{{NOTA_C{index}}}}}")).is_some());
            assert!(map.get(&format!("{{{{ANALISE_C{index}}}}}")).is_some());
        }
        assert_eq!(map.len(), 18);
    }
}
