use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{
    error::{ReportError, ReportResult},
    tokens::Locale,
};

/// Number of fixed grading criteria (competências) in every analysis.
pub const CRITERIA_COUNT: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EssayAnalysis {
    #[serde(default, alias = "nome_aluno", deserialize_with = "deserialize_text")]
    pub student_name: Option<String>,
    #[serde(default, alias = "tema_redacao", deserialize_with = "deserialize_text")]
    pub essay_theme: Option<String>,
    #[serde(default, alias = "data_redacao", deserialize_with = "deserialize_text")]
    pub essay_date: Option<String>,
    #[serde(default, alias = "ano_turma", deserialize_with = "deserialize_text")]
    pub class_year: Option<String>,
    #[serde(default, alias = "bimestre", deserialize_with = "deserialize_text")]
    pub term: Option<String>,
    #[serde(default, alias = "nota_final", deserialize_with = "deserialize_score")]
    pub final_score: Option<f64>,
    #[serde(
        default,
        alias = "comentarios_gerais",
        deserialize_with = "deserialize_text"
    )]
    pub general_comments: Option<String>,
    #[serde(
        default,
        alias = "alerta_originalidade",
        deserialize_with = "deserialize_text"
    )]
    pub originality_alert: Option<String>,
    #[serde(
        default,
        alias = "analise_competencias",
        deserialize_with = "null_as_default"
    )]
    pub criteria: Criteria,
}

/// Score and commentary for one criterion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CriterionAnalysis {
    #[serde(default, alias = "nota", deserialize_with = "deserialize_score")]
    pub score: Option<f64>,
    #[serde(default, alias = "analise", deserialize_with = "deserialize_text")]
    pub analysis: Option<String>,
}

impl CriterionAnalysis {
    pub fn new(score: f64, analysis: impl Into<String>) -> Self {
        Self {
            score: Some(score),
            analysis: Some(analysis.into()),
        }
    }
}

/// The five criterion slots, keyed `c1`..`c5` on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    #[serde(default, alias = "C1")]
    pub c1: Option<CriterionAnalysis>,
    #[serde(default, alias = "C2")]
    pub c2: Option<CriterionAnalysis>,
    #[serde(default, alias = "C3")]
    pub c3: Option<CriterionAnalysis>,
    #[serde(default, alias = "C4")]
    pub c4: Option<CriterionAnalysis>,
    #[serde(default, alias = "C5")]
    pub c5: Option<CriterionAnalysis>,
}

impl Criteria {
    /// Criterion by 1-based index. Out-of-range indices yield `None`.
    pub fn get(&self, index: usize) -> Option<&CriterionAnalysis> {
        match index {
            1 => self.c1.as_ref(),
            2 => self.c2.as_ref(),
            3 => self.c3.as_ref(),
            4 => self.c4.as_ref(),
            5 => self.c5.as_ref(),
            _ => None,
        }
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut Option<CriterionAnalysis>> {
        match index {
            1 => Some(&mut self.c1),
            2 => Some(&mut self.c2),
            3 => Some(&mut self.c3),
            4 => Some(&mut self.c4),
            5 => Some(&mut self.c5),
            _ => None,
        }
    }

    pub fn set(&mut self, index: usize, criterion: CriterionAnalysis) {
        if let Some(slot) = self.slot_mut(index) {
            *slot = Some(criterion);
        }
    }

    /// Iterates `(index, criterion)` for indices 1..=5.
    pub fn iter(&self) -> impl Iterator<Item = (usize, Option<&CriterionAnalysis>)> + '_ {
        (1..=CRITERIA_COUNT).map(move |index| (index, self.get(index)))
    }

    /// Sum of all criterion scores; absent criteria or scores count as zero.
    pub fn score_sum(&self) -> f64 {
        self.iter()
            .map(|(_, criterion)| criterion.and_then(|c| c.score).unwrap_or(0.0))
            .sum()
    }
}

impl EssayAnalysis {
    /// Parse raw model output into a record.
    ///
    /// Accepts plain JSON, JSON wrapped in markdown code fences, or prose with
    /// one embedded object. A literal `null` means the model returned no record.
    pub fn from_model_response(text: &str) -> ReportResult<Option<Self>> {
        let cleaned = strip_code_fences(text);
        let value = match serde_json::from_str::<Value>(cleaned) {
            Ok(value) => value,
            Err(err) => match (cleaned.find('{'), cleaned.rfind('}')) {
                (Some(start), Some(end)) if end > start => {
                    serde_json::from_str::<Value>(&cleaned[start..=end])
                        .map_err(|err| ReportError::InvalidRecord(err.to_string()))?
                }
                _ => return Err(ReportError::InvalidRecord(err.to_string())),
            },
        };

        match value {
            Value::Null => Ok(None),
            Value::Object(_) => serde_json::from_value(value)
                .map(Some)
                .map_err(|err| ReportError::InvalidRecord(err.to_string())),
            other => Err(ReportError::InvalidRecord(format!(
                "expected a JSON object, found {}",
                json_kind(&other)
            ))),
        }
    }

    /// Final score to report: the explicit value, or the criterion sum when the
    /// explicit value is absent or zero.
    pub fn effective_final_score(&self) -> f64 {
        match self.final_score {
            Some(score) if score != 0.0 && score.is_finite() => score,
            _ => self.criteria.score_sum(),
        }
    }

    /// Copy of the record with every criterion slot filled and the final score
    /// derived where needed.
    pub fn normalized(&self, locale: Locale) -> Self {
        let mut record = self.clone();
        for index in 1..=CRITERIA_COUNT {
            if let Some(slot) = record.criteria.slot_mut(index) {
                let criterion = slot.get_or_insert_with(CriterionAnalysis::default);
                criterion.score.get_or_insert(0.0);
                if criterion
                    .analysis
                    .as_deref()
                    .is_none_or(|text| text.trim().is_empty())
                {
                    criterion.analysis = Some(locale.analysis_unavailable().to_string());
                }
            }
        }
        record.final_score = Some(self.effective_final_score());
        record
    }
}

/// Render a score without a trailing `.0` when it is integral.
pub fn format_score(score: f64) -> String {
    if !score.is_finite() {
        return "0".to_string();
    }
    if score.fract() == 0.0 && score.abs() < 1e15 {
        format!("{}", score as i64)
    } else {
        format!("{score}")
    }
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```JSON"))
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .trim()
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn deserialize_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        Some(Value::Bool(flag)) => Some(flag.to_string()),
        Some(other) => Some(other.to_string()),
    })
}

fn deserialize_score<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => Ok(number.as_f64()),
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .replace(',', ".")
                .parse::<f64>()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("invalid score `{text}`")))
        }
        Some(other) => Err(serde::de::Error::custom(format!(
            "invalid score: expected a number, found {}",
            json_kind(&other)
        ))),
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
