//! Download command implementation

use crate::collections::{load_collections, CollectionSpec, DEFAULT_SPECIES_FILE};
use crate::downloader::{
    CollectionJob, CollectionObserver, CollectionReport, EngineConfig, EngineError, FetchEngine,
    QuotaConfig, QuotaTracker, RetryPolicy, RunReport,
};
use crate::fetcher::inat::InatClient;
use crate::output::FileSinkProvider;
use crate::resume::{ResumeState, ResumeStore};
use crate::shutdown::SharedShutdown;
use crate::{QualityGrade, SizeVariant};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::CliError;

/// Resume modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Resume mode disabled
    Off,
    /// Resume from saved cursors if available
    On,
    /// Reset resume state and start fresh
    Reset,
    /// Verify resume state integrity before starting
    Verify,
}

impl FromStr for ResumeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(ResumeMode::Off),
            "on" => Ok(ResumeMode::On),
            "reset" => Ok(ResumeMode::Reset),
            "verify" => Ok(ResumeMode::Verify),
            _ => Err(format!(
                "Invalid resume mode: {s}. Valid options: on, off, reset, verify"
            )),
        }
    }
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

/// iNaturalist observation downloader CLI
#[derive(Parser, Debug)]
#[command(name = "inat-downloader")]
#[command(
    about = "Download iNaturalist observation metadata and photos per species",
    long_about = None
)]
#[command(version)]
pub struct Cli {
    /// Number of observations to download per species
    #[arg(short = 'o', long, default_value = "200")]
    pub observations: u64,

    /// Observation quality grade (research or any)
    #[arg(short = 'q', long, default_value = "research")]
    pub quality: QualityGrade,

    /// Photo size (small, medium, large or original)
    #[arg(short = 's', long, default_value = "medium", value_parser = parse_download_size)]
    pub size: SizeVariant,

    /// Licence filter for observations and photos ("any" disables it)
    #[arg(short = 'l', long, default_value = "any")]
    pub license: String,

    /// CSV file listing species (columns: name,start_id)
    #[arg(long, default_value = DEFAULT_SPECIES_FILE)]
    pub species_file: PathBuf,

    /// Directory receiving metadata CSVs and image folders
    #[arg(long, default_value = "results")]
    pub results_dir: PathBuf,

    /// Resume mode: on, off, reset, or verify
    #[arg(long, default_value = "on")]
    pub resume: ResumeMode,

    /// Resume state directory (default: <results-dir>/.resume)
    #[arg(long)]
    pub resume_dir: Option<PathBuf>,

    /// Maximum attempts per request (default: 5, range: 1-20)
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_retries: u32,

    /// Pause after every page query, in milliseconds
    #[arg(long, default_value_t = crate::downloader::config::INTER_PAGE_DELAY_MS)]
    pub inter_page_delay_ms: u64,

    /// Override the page queries allowed per day
    #[arg(long)]
    pub queries_per_day: Option<u64>,

    /// Override the photo bytes allowed per hour
    #[arg(long)]
    pub media_bytes_per_hour: Option<u64>,

    /// Override the photo bytes allowed per day
    #[arg(long)]
    pub media_bytes_per_day: Option<u64>,

    /// Output format (json or human)
    #[arg(long, default_value = "human")]
    pub output_format: OutputFormat,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9000)
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,

    /// Override the API base URL
    #[arg(long, hide = true)]
    pub api_base_url: Option<String>,
}

impl Cli {
    /// Resume directory in effect
    pub fn resume_dir(&self) -> PathBuf {
        self.resume_dir
            .clone()
            .unwrap_or_else(|| self.results_dir.join(".resume"))
    }

    /// Engine configuration assembled from the flags
    pub fn engine_config(&self) -> EngineConfig {
        let defaults = QuotaConfig::default();
        let quota = QuotaConfig {
            requests_per_day: self.queries_per_day.unwrap_or(defaults.requests_per_day),
            media_bytes_per_hour: self
                .media_bytes_per_hour
                .unwrap_or(defaults.media_bytes_per_hour),
            media_bytes_per_day: self
                .media_bytes_per_day
                .unwrap_or(defaults.media_bytes_per_day),
        };

        EngineConfig::default()
            .with_target_count(self.observations)
            .with_quality(self.quality)
            .with_size_variant(self.size)
            .with_license(self.license.clone())
            .with_quota(quota)
            .with_retry(RetryPolicy::new(self.max_retries))
            .with_inter_page_delay(Duration::from_millis(self.inter_page_delay_ms))
    }

    /// Download every species in the list.
    ///
    /// Collections run one after another; the first failure stops the run.
    pub async fn execute(&self, shutdown: SharedShutdown) -> Result<RunReport, CliError> {
        let config = self.engine_config();
        config.validate().map_err(CliError::ConfigurationError)?;

        let species = load_collections(&self.species_file)?;
        std::fs::create_dir_all(&self.results_dir).map_err(|e| {
            CliError::ConfigurationError(format!(
                "Failed to create results directory {}: {e}",
                self.results_dir.display()
            ))
        })?;

        let resume_dir = self.resume_dir();
        match self.resume {
            ResumeMode::Reset => handle_resume_reset(&resume_dir)?,
            ResumeMode::Verify => handle_resume_verify(&resume_dir)?,
            _ => {}
        }

        let quota = Arc::new(
            QuotaTracker::new(config.quota.window_specs()).with_shutdown(shutdown.clone()),
        );
        let mut client = InatClient::new(config.retry.clone()).with_shutdown(shutdown.clone());
        if let Some(base_url) = &self.api_base_url {
            client = client.with_base_url(base_url.clone());
        }

        let mut engine =
            FetchEngine::new(Arc::new(client), quota, config).with_shutdown(shutdown);
        if self.resume != ResumeMode::Off {
            engine = engine.with_resume(ResumeStore::open(&resume_dir)?);
        }

        print_start_banner(self, &species);

        let jobs = species.into_iter().map(CollectionSpec::into_job).collect();
        let mut sinks = FileSinkProvider::new(&self.results_dir);
        let mut console = ConsoleObserver::new(self);

        match engine.run_collections(jobs, &mut sinks, &mut console).await {
            Ok(report) => {
                self.output_summary(&report);
                Ok(report)
            }
            Err(err) => {
                console.clear_bar();
                self.output_failure(&console.finished, &err);
                Err(err.into())
            }
        }
    }

    fn output_collection(&self, report: &CollectionReport) {
        match self.output_format {
            OutputFormat::Json => print_json(&collection_json(report)),
            OutputFormat::Human => {
                println!(
                    "{}: {}",
                    report.collection_key,
                    report.progress.summary()
                );
                if report.shortfall() > 0 {
                    println!(
                        "  only {} of {} requested observations available above cursor {}",
                        report.progress.records, report.requested, report.start_cursor
                    );
                }
                println!("  last observation ID: {}", report.final_cursor);
            }
        }
    }

    fn output_summary(&self, report: &RunReport) {
        match self.output_format {
            OutputFormat::Json => print_json(&serde_json::json!({
                "success": true,
                "species": report.collections.len(),
                "observations": report.total.records,
                "images": report.total.media_files,
                "megabytes": report.total.media_megabytes(),
                "images_skipped": report.total.failed_media,
                "queries": report.total.queries,
            })),
            OutputFormat::Human => {
                println!("\nDownload completed successfully!");
                println!("Species: {}", report.collections.len());
                println!("Total: {}", report.total.summary());
                println!("Results: {}", self.results_dir.display());
            }
        }
    }

    fn output_failure(&self, report: &RunReport, err: &EngineError) {
        match self.output_format {
            OutputFormat::Json => print_json(&serde_json::json!({
                "success": false,
                "error_kind": err.kind().as_str(),
                "error": err.to_string(),
                "completed_species": report.collections.len(),
                "observations": report.total.records,
            })),
            OutputFormat::Human => {
                if err.is_cancelled() {
                    eprintln!("\nDownload interrupted, progress saved.");
                } else {
                    eprintln!("\nDownload failed!");
                }
                eprintln!("Error ({}): {err}", err.kind());
                eprintln!("Completed before stopping: {}", report.total.summary());
                if self.resume != ResumeMode::Off {
                    eprintln!("Run again to continue from the saved cursor.");
                }
            }
        }
    }
}

/// Progress bar per species and a result line as each one finishes
struct ConsoleObserver<'a> {
    cli: &'a Cli,
    bar: Option<ProgressBar>,
    finished: RunReport,
}

impl<'a> ConsoleObserver<'a> {
    fn new(cli: &'a Cli) -> Self {
        Self {
            cli,
            bar: None,
            finished: RunReport::default(),
        }
    }

    fn clear_bar(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

impl CollectionObserver for ConsoleObserver<'_> {
    fn collection_started(&mut self, job: &CollectionJob) -> Option<ProgressBar> {
        let bar = create_progress_bar(&job.collection_key, self.cli.observations);
        self.bar = Some(bar.clone());
        Some(bar)
    }

    fn collection_finished(&mut self, report: &CollectionReport) {
        self.clear_bar();
        self.cli.output_collection(report);
        self.finished.push(report.clone());
    }
}

/// Handle Reset mode: delete the saved state
fn handle_resume_reset(resume_dir: &Path) -> Result<(), CliError> {
    if ResumeStore::reset(resume_dir)? {
        info!("Reset mode: resume state deleted in {}", resume_dir.display());
    } else {
        info!("Reset mode: no resume state in {}", resume_dir.display());
    }
    Ok(())
}

/// Handle Verify mode: check resume state integrity
fn handle_resume_verify(resume_dir: &Path) -> Result<(), CliError> {
    let path = ResumeStore::state_path(resume_dir);
    if !path.exists() {
        info!("Verify mode: no resume state found, nothing to verify");
        return Ok(());
    }

    match ResumeState::load(&path) {
        Ok(state) => {
            for (species, checkpoint) in state.collections() {
                info!(
                    species = %species,
                    cursor = %checkpoint.cursor(),
                    records = checkpoint.records(),
                    completed = checkpoint.is_completed(),
                    "Valid checkpoint"
                );
            }
            info!("Verify passed: {} in {}", describe_state(&state), path.display());
            Ok(())
        }
        Err(e) => {
            error!("Invalid resume state: {}: {}", path.display(), e);
            Err(CliError::InvalidArgument(format!(
                "Verify failed: {e}. Use --resume reset to clear."
            )))
        }
    }
}

/// `square` is the thumbnail already referenced by the API, not a download size
fn parse_download_size(s: &str) -> Result<SizeVariant, String> {
    match s.parse::<SizeVariant>()? {
        SizeVariant::Square => Err(format!(
            "Invalid image size: {s}. Valid options: small, medium, large, original"
        )),
        size => Ok(size),
    }
}

/// One-line summary of a loaded resume state
fn describe_state(state: &ResumeState) -> String {
    let saved = chrono::DateTime::from_timestamp_millis(state.updated_at())
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "{} species checkpoint(s), {} commit(s), last saved {}",
        state.collections().len(),
        state.metadata().total_checkpoints(),
        saved
    )
}

fn print_start_banner(cli: &Cli, species: &[CollectionSpec]) {
    info!(
        species = species.len(),
        observations = cli.observations,
        quality = %cli.quality,
        size = %cli.size,
        license = %cli.license,
        results_dir = %cli.results_dir.display(),
        "Starting download"
    );
    if cli.output_format == OutputFormat::Human {
        println!(
            "Downloading up to {} {} observation(s) with {} photos for {} species into {}",
            cli.observations,
            cli.quality,
            cli.size,
            species.len(),
            cli.results_dir.display()
        );
    }
}

fn collection_json(report: &CollectionReport) -> serde_json::Value {
    serde_json::json!({
        "success": true,
        "species": report.collection_key,
        "requested": report.requested,
        "available": report.remote_total,
        "observations": report.progress.records,
        "images": report.progress.media_files,
        "megabytes": report.progress.media_megabytes(),
        "images_skipped": report.progress.failed_media,
        "queries": report.progress.queries,
        "start_id": report.start_cursor,
        "last_id": report.final_cursor,
    })
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!("Failed to serialize output: {e}"),
    }
}

/// Progress bar for one species; the engine sets the real length after probing
fn create_progress_bar(species: &str, requested: u64) -> ProgressBar {
    let pb = ProgressBar::new(requested);
    match ProgressStyle::default_bar().template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
    ) {
        Ok(style) => pb.set_style(style.progress_chars("#>-")),
        Err(e) => warn!("Invalid progress bar template: {e}"),
    }
    pb.set_message(format!("Downloading {species}"));
    pb
}
