// Forecast command: load or train a model, then roll it forward per patient

use crate::{read_input, CliResult};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use vitalwatch_analysis::predictor::{ForecastPoint, TrainingReport};
use vitalwatch_analysis::{AnalysisConfig, AnalysisError, TrainTarget, VitalSignsPredictor};
use vitalwatch_core::{PatientId, VitalStore};

pub struct PredictOptions {
    pub input: PathBuf,
    pub model: String,
    pub model_dir: Option<PathBuf>,
    pub patient_id: Option<String>,
    pub steps: usize,
    pub window: Option<usize>,
    pub horizon: Option<usize>,
    pub epochs: Option<usize>,
    pub retrain: bool,
    pub json: bool,
}

#[derive(Serialize)]
struct PatientForecast {
    patient_id: PatientId,
    points: Vec<ForecastPoint>,
}

pub async fn run(mut config: AnalysisConfig, opts: PredictOptions) -> CliResult<()> {
    if let Some(dir) = opts.model_dir {
        config.predictor.model_dir = dir;
    }
    if let Some(w) = opts.window {
        config.predictor.window_length = w;
    }
    if let Some(h) = opts.horizon {
        config.predictor.horizon = h;
    }
    if let Some(e) = opts.epochs {
        config.predictor.epochs = e;
    }
    config.validate()?;

    let store = Arc::new(VitalStore::new());
    let mut rejected = 0;
    for raw in read_input(&opts.input)? {
        if store.append_raw(raw).is_err() {
            rejected += 1;
        }
    }
    info!(readings = store.len(), rejected, "loaded history");

    let predictor = Arc::new(VitalSignsPredictor::new(Arc::clone(&store), config.predictor));
    let params = predictor.default_params();
    let spec = params.spec();

    let load_result = if opts.retrain {
        Err(AnalysisError::ModelNotFound(opts.model.clone()))
    } else {
        predictor.load(&opts.model, &spec)
    };
    match load_result {
        Ok(()) => println!("{} model '{}'", "Loaded".green().bold(), opts.model),
        Err(AnalysisError::ModelNotFound(_)) => {
            let target = match &opts.patient_id {
                Some(id) => TrainTarget::Patient(PatientId::new(id.as_str())),
                None => TrainTarget::Corpus,
            };
            let report = train_with_spinner(&predictor, target, params).await?;
            print_training(&report);
            let path = predictor.save(&opts.model)?;
            println!("{} {}", "Saved model to".green(), path.display());
        }
        Err(e) => return Err(e.into()),
    }

    let patients = match &opts.patient_id {
        Some(id) => vec![PatientId::new(id.as_str())],
        None => store.patients(),
    };

    let mut forecasts = Vec::new();
    for pid in patients {
        match predictor.predict(&pid, opts.steps) {
            Ok(forecast) => forecasts.push(PatientForecast {
                patient_id: pid,
                points: forecast.collect(),
            }),
            // when forecasting everyone, short histories are skipped
            Err(e @ AnalysisError::InsufficientHistory { .. }) if opts.patient_id.is_none() => {
                println!("{} {}", "Skipping".yellow(), e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&forecasts)?);
    } else {
        for forecast in &forecasts {
            print_forecast(forecast, &spec.metrics);
        }
    }
    Ok(())
}

async fn train_with_spinner(
    predictor: &Arc<VitalSignsPredictor>,
    target: TrainTarget,
    params: vitalwatch_analysis::TrainParams,
) -> CliResult<TrainingReport> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    spinner.set_message(format!("Training forecast model ({} epochs)...", params.epochs));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let result = predictor.spawn_training(target, params).await;
    spinner.finish_and_clear();

    match result {
        Ok(report) => Ok(report?),
        Err(join) => Err(AnalysisError::Background(join.to_string()).into()),
    }
}

fn print_training(report: &TrainingReport) {
    println!(
        "{} {} windows from {} patients, {} epochs{}",
        "Trained".green().bold(),
        report.windows.to_string().yellow(),
        report.patients.to_string().yellow(),
        report.epochs.len(),
        if report.stopped_early { " (stopped early)" } else { "" }
    );
    if let Some(best) = report.final_loss() {
        let val = best.val_loss.map_or("-".to_string(), |v| format!("{:.5}", v));
        println!(
            "  {} epoch {}: train loss {:.5}, validation loss {}",
            "Best".dimmed(),
            best.epoch,
            best.train_loss,
            val
        );
    }
}

fn print_forecast(forecast: &PatientForecast, metrics: &[vitalwatch_core::Metric]) {
    println!("\n{} {}", "Forecast for".cyan().bold(), forecast.patient_id.to_string().cyan());

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    let mut header = vec!["Time".to_string()];
    header.extend(metrics.iter().map(|m| format!("{} ({})", m.display_name(), m.unit())));
    table.set_header(header);

    for point in &forecast.points {
        let mut row = vec![point.timestamp.format("%Y-%m-%d %H:%M").to_string()];
        row.extend(
            metrics
                .iter()
                .map(|m| point.values.get(*m).map_or("-".to_string(), |v| format!("{:.2}", v))),
        );
        table.add_row(row);
    }
    println!("{table}");
}
