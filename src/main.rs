use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docsum::{
    config,
    extraction::{
        DocumentIntelligenceClient, PdfPageExtractor,
        email::{EmailContainerParser, FsAttachmentStore},
    },
    logging,
    processing::{ClassificationTerms, Collaborators, EnrichmentService, ProcessOutcome, SourceFile},
    store::{FileRecordStore, RecordStore},
    summarization::LanguageSummarizationClient,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "docsum",
    about = "Extract, classify, and summarize documents into per-file records"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process files, or every admitted file below the given directories.
    Process {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Identifier recorded on every record version this run produces.
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Print the stored record(s) for a filename.
    Show { filename: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();
    let cli = Cli::parse();
    let config = config::init_config().context("failed to load configuration")?;
    let store_dir = &config.store_dir;
    let store = FileRecordStore::open(store_dir)
        .await
        .with_context(|| format!("failed to open record store {}", store_dir.display()))?;
    let store = Arc::new(store);

    match cli.command {
        Command::Show { filename } => show(store.as_ref(), &filename).await,
        Command::Process { paths, run_id } => {
            let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let service = build_service(config, store).await?;
            process(&service, &paths, &run_id).await
        }
    }
}

async fn build_service(
    config: &config::Config,
    store: Arc<FileRecordStore>,
) -> Result<EnrichmentService> {
    let classifications = tokio::fs::read_to_string(&config.classifications_file)
        .await
        .with_context(|| {
            format!(
                "failed to read classifications file {}",
                config.classifications_file.display()
            )
        })?;
    let primary = DocumentIntelligenceClient::new(
        &config.form_recognizer_endpoint,
        &config.form_recognizer_key,
        config.poll_interval(),
    )
    .context("failed to build OCR client")?
    .with_poll_timeout(config.ocr_poll_timeout());
    let summarizer = LanguageSummarizationClient::new(
        &config.ai_language_endpoint,
        &config.ai_language_key,
        config.poll_interval(),
    )
    .context("failed to build summarization client")?
    .with_poll_timeout(config.summary_poll_timeout());

    Ok(EnrichmentService::new(
        Collaborators {
            store,
            primary: Arc::new(primary),
            pages: Arc::new(PdfPageExtractor),
            email_parser: Arc::new(EmailContainerParser),
            attachments: Arc::new(FsAttachmentStore::new(&config.attachment_dir)),
            summarizer: Arc::new(summarizer),
        },
        ClassificationTerms::parse(&classifications),
        config.pipeline_settings(),
    ))
}

async fn process(service: &EnrichmentService, paths: &[PathBuf], run_id: &str) -> Result<()> {
    let files = collect_files(paths)?;
    tracing::info!(files = files.len(), run_id, "Starting run");

    let mut refused = 0usize;
    for path in files {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file = SourceFile::new(&path.to_string_lossy(), bytes);
        match service.process(&file, run_id).await {
            Ok(ProcessOutcome::Unchanged) => println!("{}: unchanged", file.filename),
            Ok(ProcessOutcome::Updated { record_version, .. }) => {
                println!("{}: updated to version {record_version}", file.filename)
            }
            Ok(ProcessOutcome::ErrorRecorded { error }) => {
                println!("{}: failed ({error})", file.filename)
            }
            Err(error) => {
                refused += 1;
                eprintln!("{}: {error}", file.filename);
            }
        }
    }

    let snapshot = service.metrics_snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    if refused > 0 {
        bail!("{refused} file(s) could not be processed");
    }
    Ok(())
}

async fn show(store: &dyn RecordStore, filename: &str) -> Result<()> {
    let records = store
        .find_by_filename(filename)
        .await
        .with_context(|| format!("failed to query records for {filename}"))?;
    if records.is_empty() {
        bail!("no record for {filename}");
    }
    for record in records {
        println!("{}", serde_json::to_string_pretty(&record)?);
    }
    Ok(())
}

/// Expand directories and keep only files the pipeline accepts.
fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for root in paths {
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
            if entry.file_type().is_file() && admitted(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }
    Ok(files)
}

fn admitted(path: &Path) -> bool {
    let file = SourceFile::new(&path.to_string_lossy(), Vec::new());
    if file.is_archived() {
        tracing::debug!(path = %path.display(), "Skipping archived file");
        return false;
    }
    if file.file_type().is_none() {
        tracing::debug!(path = %path.display(), "Skipping unsupported file type");
        return false;
    }
    true
}
