use std::{env, path::PathBuf, thread};

use anyhow::{Result, anyhow};

use crate::tokens::Locale;

const DEFAULT_TEMPLATE: &str = "assets/template.docx";
const DEFAULT_OUTPUT_DIR: &str = "tmp";

/// Settings for the command-line driver. The engine itself never reads
/// configuration; these are resolved here and passed down explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportConfig {
    pub template: PathBuf,
    pub output_dir: PathBuf,
    pub locale: Locale,
    pub concurrency: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            template: PathBuf::from(DEFAULT_TEMPLATE),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            locale: Locale::default(),
            concurrency: default_concurrency(),
        }
    }
}

impl ReportConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(template) = value("TEMPLATE_DOCX_FILE") {
            config.template = PathBuf::from(template);
        }
        if let Some(output_dir) = value("OUTPUT_DIR") {
            config.output_dir = PathBuf::from(output_dir);
        }
        if let Some(locale) = value("REPORT_LOCALE") {
            config.locale = locale
                .parse::<Locale>()
                .map_err(|err| anyhow!("REPORT_LOCALE: {err}"))?;
        }
        if let Some(concurrency) = value("BATCH_CONCURRENCY") {
            let parsed = concurrency
                .parse::<usize>()
                .map_err(|_| anyhow!("BATCH_CONCURRENCY must be a positive integer, got `{concurrency}`"))?;
            config.concurrency = parsed.max(1);
        }
        Ok(config)
    }
}

fn default_concurrency() -> usize {
    thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
}
