// VitalWatch CLI - vital signs monitoring, baselines, anomalies and forecasts

mod dashboard;
mod generate;
mod monitor;
mod predict;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use vitalwatch_analysis::{load_config, AnalysisConfig, AnalysisError};
use vitalwatch_core::source::{CsvSource, JsonSource, SourceRegistry, VitalSource};
use vitalwatch_core::{parse_timestamp, RawVitalRecord};

pub type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "vitalwatch")]
#[command(version = "0.1.0")]
#[command(about = "Vital signs monitoring and analysis", long_about = None)]
struct Cli {
    /// Analysis configuration file (TOML)
    #[arg(short, long, global = true, env = "VITALWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate synthetic vital sign readings as CSV
    Generate {
        /// Number of patients
        #[arg(short, long, default_value = "5")]
        patients: usize,

        /// Hours of history to generate, ending now
        #[arg(long, default_value = "24")]
        hours: i64,

        /// Minutes between readings
        #[arg(long, default_value = "5")]
        interval_minutes: i64,

        /// Probability that a reading is drawn from abnormal ranges
        #[arg(short, long, default_value = "0.2")]
        abnormal_probability: f64,

        /// Seed for reproducible output
        #[arg(short, long)]
        seed: Option<u64>,

        /// Output CSV file
        #[arg(short, long, default_value = "mock_vital_signs.csv")]
        output: PathBuf,
    },

    /// Stream readings and classify them live
    Monitor {
        /// Replay readings from a CSV file
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Replay readings from a JSON file
        #[arg(long)]
        json: Option<PathBuf>,

        /// Seconds between polls (defaults to the configured interval)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Stop after this many polls (default: run until Ctrl+C)
        #[arg(short, long)]
        ticks: Option<u64>,

        /// Simulated patients when no file is given
        #[arg(short, long, default_value = "3")]
        patients: usize,

        /// Readings replayed per poll from files
        #[arg(short, long, default_value = "10")]
        batch: usize,

        /// Seed for the simulated stream
        #[arg(short, long)]
        seed: Option<u64>,
    },

    /// Snapshot of the latest readings with baseline and anomaly status
    Dashboard {
        /// CSV or JSON file with readings
        #[arg(short, long)]
        input: PathBuf,

        /// Only show this patient
        #[arg(short, long)]
        patient_id: Option<String>,
    },

    /// Train or load a forecast model and forecast upcoming readings
    Predict {
        /// CSV or JSON file with historical readings
        #[arg(short, long)]
        input: PathBuf,

        /// Model name (stored as <model-dir>/<name>.json)
        #[arg(short, long, default_value = "vital_signs_model")]
        model: String,

        /// Directory holding model artifacts
        #[arg(long)]
        model_dir: Option<PathBuf>,

        /// Forecast only this patient (and train on it alone)
        #[arg(short, long)]
        patient_id: Option<String>,

        /// Steps to forecast
        #[arg(short, long, default_value = "24")]
        steps: usize,

        /// Window length override
        #[arg(short, long)]
        window: Option<usize>,

        /// Horizon override
        #[arg(long)]
        horizon: Option<usize>,

        /// Epochs override
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Train even if a saved model exists
        #[arg(long)]
        retrain: bool,

        /// Print the forecast as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_error(e.as_ref()),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AnalysisConfig::default(),
    };

    match cli.command {
        Commands::Generate {
            patients,
            hours,
            interval_minutes,
            abnormal_probability,
            seed,
            output,
        } => generate_dataset(patients, hours, interval_minutes, abnormal_probability, seed, &output),
        Commands::Monitor {
            csv,
            json,
            interval,
            ticks,
            patients,
            batch,
            seed,
        } => {
            let opts = monitor::MonitorOptions {
                csv,
                json,
                interval,
                ticks,
                patients,
                batch,
                seed,
            };
            monitor::run(config, opts).await
        }
        Commands::Dashboard { input, patient_id } => dashboard::run(config, &input, patient_id.as_deref()),
        Commands::Predict {
            input,
            model,
            model_dir,
            patient_id,
            steps,
            window,
            horizon,
            epochs,
            retrain,
            json,
        } => {
            let opts = predict::PredictOptions {
                input,
                model,
                model_dir,
                patient_id,
                steps,
                window,
                horizon,
                epochs,
                retrain,
                json,
            };
            predict::run(config, opts).await
        }
    }
}

// exit 2 for analysis errors (with their kind), 1 for anything else
fn report_error(err: &(dyn std::error::Error + Send + Sync + 'static)) -> ExitCode {
    if let Some(analysis) = err.downcast_ref::<AnalysisError>() {
        eprintln!("{} [{}] {}", "Error:".red().bold(), analysis.kind().yellow(), analysis);
        if analysis.is_recoverable() {
            eprintln!("{}", "Not enough signal yet; retry with more data or relaxed parameters.".dimmed());
        }
        return ExitCode::from(2);
    }
    eprintln!("{} {}", "Error:".red().bold(), err);
    ExitCode::FAILURE
}

fn generate_dataset(
    patients: usize,
    hours: i64,
    interval_minutes: i64,
    abnormal_probability: f64,
    seed: Option<u64>,
    output: &Path,
) -> CliResult<()> {
    if interval_minutes <= 0 {
        return Err("--interval-minutes must be positive".into());
    }
    let end = chrono::Utc::now();
    let start = end - chrono::Duration::hours(hours);

    let mut generator = generate::MockGenerator::new(seed, abnormal_probability);
    let roster = generator.patients(patients);
    let records = generator.dataset(&roster, start, end, chrono::Duration::minutes(interval_minutes));
    CsvSource::write_records(output, &records)?;

    println!(
        "{} {} readings for {} patients written to {}",
        "✓".green().bold(),
        records.len().to_string().yellow(),
        patients.to_string().yellow(),
        output.display().to_string().cyan()
    );
    Ok(())
}

/// Read every reading from a CSV or JSON file (chosen by extension)
pub fn read_input(path: &Path) -> CliResult<Vec<RawVitalRecord>> {
    let source: Box<dyn VitalSource> = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => Box::new(JsonSource::from_file(path)),
        _ => Box::new(CsvSource::new(path)),
    };
    let name = source.name().to_string();

    let mut registry = SourceRegistry::new();
    registry.register(source);
    Ok(registry.fetch(&name)?)
}

/// Order readings by parsed timestamp, stable for ties. Unparseable
/// timestamps go last; ingest rejects them anyway.
pub fn sort_by_time(raws: &mut [RawVitalRecord]) {
    raws.sort_by_cached_key(|raw| {
        let ts = raw.timestamp.as_deref().and_then(|s| parse_timestamp(s).ok());
        (ts.is_none(), ts)
    });
}
