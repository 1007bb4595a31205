use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio::fs as tokio_fs;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use essay_report::{
    EssayAnalysis, Locale, TokenMapBuilder,
    batch::{BatchOptions, RecordStatus, run_batch},
    config::ReportConfig,
    fill_template,
    report::{default_template, inspect_template, report_file_name},
};

#[derive(Parser)]
#[command(name = "essay-report", version, about = "Fill essay correction reports from DOCX templates")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render one analysis record into a report.
    Render {
        /// JSON record or raw model response.
        #[arg(long)]
        record: PathBuf,
        #[arg(long)]
        template: Option<PathBuf>,
        /// Output file; defaults to a name derived from the student.
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        locale: Option<Locale>,
    },
    /// Render every `*.json` record of a directory.
    Batch {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        template: Option<PathBuf>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long)]
        locale: Option<Locale>,
    },
    /// Report the placeholders of a template and whether they are split across runs.
    Inspect { template: PathBuf },
    /// Write a starter template containing every placeholder.
    Scaffold {
        output: PathBuf,
        #[arg(long)]
        locale: Option<Locale>,
    },
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_tracing();

    if let Err(err) = app_main().await {
        error!(?err, "application error");
        std::process::exit(1);
    }
}

async fn app_main() -> Result<()> {
    let cli = Cli::parse();
    let config = ReportConfig::from_env()?;

    match cli.command {
        Command::Render {
            record,
            template,
            output,
            locale,
        } => {
            let template = template.unwrap_or(config.template);
            let locale = locale.unwrap_or(config.locale);
            render(&record, &template, output, &config.output_dir, locale).await
        }
        Command::Batch {
            input,
            template,
            output_dir,
            concurrency,
            locale,
        } => {
            let options = BatchOptions {
                input_dir: input,
                output_dir: output_dir.unwrap_or(config.output_dir),
                template: template.unwrap_or(config.template),
                locale: locale.unwrap_or(config.locale),
                concurrency: concurrency.unwrap_or(config.concurrency).max(1),
            };
            let summary = run_batch(&options).await?;
            if summary.count(RecordStatus::Failed) > 0 {
                warn!(
                    failed = summary.count(RecordStatus::Failed),
                    "some records could not be rendered"
                );
            }
            Ok(())
        }
        Command::Inspect { template } => {
            let bytes = tokio_fs::read(&template)
                .await
                .with_context(|| format!("failed to read template {}", template.display()))?;
            let report = inspect_template(&bytes)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.fragmented_count() > 0 {
                warn!(
                    fragmented = report.fragmented_count(),
                    "placeholders split across runs will lose per-run formatting"
                );
            }
            Ok(())
        }
        Command::Scaffold { output, locale } => {
            let bytes = default_template(locale.unwrap_or(config.locale))?;
            write_output(&output, bytes).await?;
            info!(output = %output.display(), "starter template written");
            Ok(())
        }
    }
}

async fn render(
    record_path: &Path,
    template_path: &Path,
    output: Option<PathBuf>,
    output_dir: &Path,
    locale: Locale,
) -> Result<()> {
    let text = tokio_fs::read_to_string(record_path)
        .await
        .with_context(|| format!("failed to read record {}", record_path.display()))?;
    let record = EssayAnalysis::from_model_response(&text)
        .with_context(|| format!("failed to parse record {}", record_path.display()))?
        .ok_or_else(|| anyhow!("record {} is null", record_path.display()))?;

    let template = tokio_fs::read(template_path)
        .await
        .with_context(|| format!("failed to read template {}", template_path.display()))?;

    let filled = tokio::task::spawn_blocking({
        let record = record.clone();
        move || {
            let map = TokenMapBuilder::new(locale).build(Some(&record))?;
            fill_template(&template, &map).map_err(anyhow::Error::from)
        }
    })
    .await
    .unwrap_or_else(|err| Err(anyhow!(err)))?;

    for warning in &filled.warnings {
        warn!(%warning, "placeholder not present in template");
    }

    let output = match output {
        Some(path) => path,
        None => {
            let stem = record_path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("report");
            output_dir.join(report_file_name(&record, stem))
        }
    };
    write_output(&output, filled.bytes).await?;
    info!(output = %output.display(), "report written");
    Ok(())
}

async fn write_output(path: &Path, bytes: Vec<u8>) -> Result<()> {
    if path.exists() && path.is_dir() {
        bail!("{} is a directory", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio_fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    tokio_fs::write(path, bytes)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
