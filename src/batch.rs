use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::fs as tokio_fs;
use tracing::{error, info, warn};

use crate::{
    analysis::EssayAnalysis,
    report::{render_report, report_file_name},
    tokens::{Locale, TokenMapBuilder},
};

pub const SUMMARY_FILE: &str = "batch_summary.json";

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub template: PathBuf,
    pub locale: Locale,
    pub concurrency: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Rendered,
    /// The model returned `null` for this essay.
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome {
    pub source: String,
    pub status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecordOutcome {
    fn new(source: &str, status: RecordStatus) -> Self {
        Self {
            source: source.to_string(),
            status,
            output: None,
            warnings: Vec::new(),
            error: None,
        }
    }

    fn failed(source: &str, err: &anyhow::Error) -> Self {
        Self {
            error: Some(format!("{err:#}")),
            ..Self::new(source, RecordStatus::Failed)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub started_at: String,
    pub finished_at: String,
    pub template: String,
    pub locale: String,
    pub records: Vec<RecordOutcome>,
}

impl BatchSummary {
    pub fn count(&self, status: RecordStatus) -> usize {
        self.records
            .iter()
            .filter(|record| record.status == status)
            .count()
    }
}

pub async fn run_batch(options: &BatchOptions) -> Result<BatchSummary> {
    let started_at = Utc::now().to_rfc3339();

    let template = tokio_fs::read(&options.template)
        .await
        .with_context(|| format!("failed to read template {}", options.template.display()))?;
    let template = Arc::new(template);

    tokio_fs::create_dir_all(&options.output_dir)
        .await
        .with_context(|| format!("failed to create {}", options.output_dir.display()))?;

    let inputs = list_records(&options.input_dir).await?;
    info!(
        records = inputs.len(),
        concurrency = options.concurrency,
        input = %options.input_dir.display(),
        "starting report batch"
    );

    let mut records: Vec<RecordOutcome> = stream::iter(inputs)
        .map(|path| {
            let template = Arc::clone(&template);
            render_one(path, template, options.locale, options.output_dir.clone())
        })
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;
    records.sort_by(|a, b| a.source.cmp(&b.source));

    let summary = BatchSummary {
        started_at,
        finished_at: Utc::now().to_rfc3339(),
        template: options.template.display().to_string(),
        locale: options.locale.to_string(),
        records,
    };

    let summary_path = options.output_dir.join(SUMMARY_FILE);
    let payload = serde_json::to_vec_pretty(&summary).context("failed to encode batch summary")?;
    tokio_fs::write(&summary_path, payload)
        .await
        .with_context(|| format!("failed to write {}", summary_path.display()))?;

    info!(
        rendered = summary.count(RecordStatus::Rendered),
        skipped = summary.count(RecordStatus::Skipped),
        failed = summary.count(RecordStatus::Failed),
        "report batch finished"
    );
    Ok(summary)
}

async fn list_records(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio_fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read input directory {}", dir.display()))?;

    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed to list {}", dir.display()))?
    {
        let path = entry.path();
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

async fn render_one(
    path: PathBuf,
    template: Arc<Vec<u8>>,
    locale: Locale,
    output_dir: PathBuf,
) -> RecordOutcome {
    let source = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("record.json")
        .to_string();
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("record")
        .to_string();

    let text = match tokio_fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(err) => {
            let err = anyhow!(err).context(format!("failed to read {}", path.display()));
            error!(?err, source = %source, "record could not be read");
            return RecordOutcome::failed(&source, &err);
        }
    };

    let rendered = tokio::task::spawn_blocking(move || -> Result<Option<(String, Vec<u8>, Vec<String>)>> {
        let Some(record) = EssayAnalysis::from_model_response(&text)? else {
            return Ok(None);
        };
        let builder = TokenMapBuilder::new(locale);
        let filled = render_report(&template, Some(&record), &builder)?;
        let warnings = filled.warnings.iter().map(ToString::to_string).collect();
        Ok(Some((report_file_name(&record, &stem), filled.bytes, warnings)))
    })
    .await
    .unwrap_or_else(|err| Err(anyhow!(err)));

    let (file_name, bytes, warnings) = match rendered {
        Ok(Some(rendered)) => rendered,
        Ok(None) => {
            warn!(source = %source, "record is null, skipping");
            return RecordOutcome::new(&source, RecordStatus::Skipped);
        }
        Err(err) => {
            error!(?err, source = %source, "failed to render report");
            return RecordOutcome::failed(&source, &err);
        }
    };

    let output_path = output_dir.join(&file_name);
    if let Err(err) = tokio_fs::write(&output_path, bytes).await {
        let err = anyhow!(err).context(format!("failed to write {}", output_path.display()));
        error!(?err, source = %source, "failed to save report");
        return RecordOutcome::failed(&source, &err);
    }

    info!(source = %source, output = %output_path.display(), "report rendered");
    RecordOutcome {
        output: Some(file_name),
        warnings,
        ..RecordOutcome::new(&source, RecordStatus::Rendered)
    }
}
