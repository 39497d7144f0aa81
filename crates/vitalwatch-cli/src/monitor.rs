// Live monitoring loop: poll sources, analyze every reading, print alerts

use crate::generate::SimulatedSource;
use crate::{read_input, sort_by_time, CliResult};
use colored::Colorize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{info, warn};
use vitalwatch_analysis::alerting::Severity;
use vitalwatch_analysis::anomaly::FitReport;
use vitalwatch_analysis::{AnalysisConfig, AnalysisError, IngestOutcome, Pipeline, VerdictStatus};
use vitalwatch_core::source::VitalSource;
use vitalwatch_core::{Metric, RawVitalRecord, VitalStore};

pub struct MonitorOptions {
    pub csv: Option<PathBuf>,
    pub json: Option<PathBuf>,
    pub interval: Option<u64>,
    pub ticks: Option<u64>,
    pub patients: usize,
    pub batch: usize,
    pub seed: Option<u64>,
}

// where readings come from each tick
enum Feed {
    Replay(VecDeque<RawVitalRecord>),
    Live(SimulatedSource),
}

impl Feed {
    fn next_batch(&mut self, batch: usize) -> CliResult<Option<Vec<RawVitalRecord>>> {
        match self {
            Feed::Replay(queue) if queue.is_empty() => Ok(None),
            Feed::Replay(queue) => {
                let n = batch.max(1).min(queue.len());
                Ok(Some(queue.drain(..n).collect()))
            }
            Feed::Live(source) => Ok(Some(source.fetch()?)),
        }
    }
}

pub async fn run(config: AnalysisConfig, opts: MonitorOptions) -> CliResult<()> {
    let mut feed = if opts.csv.is_some() || opts.json.is_some() {
        let mut raws = Vec::new();
        for path in opts.csv.iter().chain(opts.json.iter()) {
            raws.extend(read_input(path)?);
        }
        // replay in time order across files
        sort_by_time(&mut raws);
        info!(readings = raws.len(), "replaying readings from file");
        Feed::Replay(raws.into())
    } else {
        Feed::Live(SimulatedSource::new(opts.patients, opts.seed, 0.2))
    };

    let seconds = opts.interval.unwrap_or(config.monitor.interval_seconds).max(1);
    let min_fit = config.anomaly.min_training_samples;
    let mut pipeline = Pipeline::new(config, Arc::new(VitalStore::new()))?;

    println!("{}", "VitalWatch monitor".cyan().bold());
    println!("{}", format!("polling every {}s, Ctrl+C to stop", seconds).dimmed());
    println!("{}", "─".repeat(60).dimmed());

    let mut ticker = interval(Duration::from_secs(seconds));
    let mut schedule = FitSchedule::new(min_fit);
    let mut fitting: Option<(JoinHandle<Result<FitReport, AnalysisError>>, usize)> = None;
    let mut tick = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                println!("\n{}", "Monitoring stopped.".yellow());
                break;
            }
        }

        let Some(batch) = feed.next_batch(opts.batch)? else {
            println!("{}", "Replay finished.".green());
            break;
        };
        for raw in batch {
            match pipeline.ingest(raw) {
                Ok(outcome) => print_outcome(&outcome),
                Err(e) => warn!(kind = e.kind(), "rejected reading: {}", e),
            }
        }

        // fit anomaly models in the background once there is enough history
        if let Some((handle, stored)) = fitting.take_if(|(h, _)| h.is_finished()) {
            match handle.await {
                Ok(Ok(report)) => info!(models = report.models, "anomaly models ready"),
                Ok(Err(e)) if e.is_recoverable() => {
                    schedule.defer(stored);
                    info!(reason = %e, retry_at = schedule.retry_at, "anomaly fit deferred");
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(e) => {
                    schedule.defer(stored);
                    warn!(error = %e, "anomaly fit task failed");
                }
            }
        }
        let stored = pipeline.store().len();
        if fitting.is_none() && !pipeline.anomaly().is_fitted() && schedule.is_due(stored) {
            let metrics = trainable_metrics(pipeline.store(), &pipeline.config().anomaly.metrics, min_fit);
            if metrics.is_empty() {
                schedule.defer(stored);
            } else {
                fitting = Some((pipeline.anomaly().spawn_fit(pipeline.store(), metrics), stored));
            }
        }

        tick += 1;
        if opts.ticks.is_some_and(|limit| tick >= limit) {
            break;
        }
    }

    print_summary(&pipeline);
    Ok(())
}

// when the next background anomaly fit may start
struct FitSchedule {
    min_samples: usize,
    // store size that unlocks the next attempt
    retry_at: usize,
}

impl FitSchedule {
    fn new(min_samples: usize) -> Self {
        Self {
            min_samples,
            retry_at: min_samples,
        }
    }

    fn is_due(&self, stored: usize) -> bool {
        stored >= self.retry_at
    }

    // wait for another batch of readings beyond what the failed attempt saw
    fn defer(&mut self, stored_at_attempt: usize) {
        self.retry_at = stored_at_attempt + self.min_samples.max(1);
    }
}

/// Configured metrics with enough stored readings to fit on
fn trainable_metrics(store: &VitalStore, configured: &[Metric], min_samples: usize) -> Vec<Metric> {
    let snapshot = store.snapshot();
    configured
        .iter()
        .copied()
        .filter(|metric| {
            let count: usize = snapshot
                .iter()
                .map(|(_, history)| history.iter().filter(|r| r.get(*metric).is_some()).count())
                .sum();
            count >= min_samples
        })
        .collect()
}

fn print_outcome(outcome: &IngestOutcome) {
    let record = &outcome.record;
    let metrics: Vec<String> = record
        .metrics()
        .iter()
        .map(|(metric, value)| {
            let text = format!("{}={:.1}", metric, value);
            match outcome.verdicts.get(&metric).map(|v| v.status) {
                Some(VerdictStatus::Critical) => text.red().bold().to_string(),
                Some(VerdictStatus::Elevated) => text.yellow().to_string(),
                Some(VerdictStatus::InsufficientData) => text.dimmed().to_string(),
                _ => text,
            }
        })
        .collect();

    println!(
        "{} {} {}",
        record.timestamp().format("%H:%M:%S").to_string().dimmed(),
        record.patient_id().to_string().cyan(),
        metrics.join(" ")
    );

    let flagged = outcome.anomalous_metrics();
    if !flagged.is_empty() {
        let names: Vec<&str> = flagged.iter().map(|m| m.name()).collect();
        println!("  {} {}", "anomaly:".magenta().bold(), names.join(", "));
    }
    for alert in &outcome.alerts {
        let tag = match alert.severity {
            Severity::Critical => "CRITICAL".red().bold(),
            Severity::Warning => "WARNING".yellow().bold(),
        };
        println!("  {} {}", tag, alert.message);
    }
}

fn print_summary(pipeline: &Pipeline) {
    let store = pipeline.store();
    println!("{}", "─".repeat(60).dimmed());
    println!(
        "{} {} readings from {} patients, {} active alerts",
        "Summary:".cyan().bold(),
        store.len().to_string().yellow(),
        store.patients().len().to_string().yellow(),
        pipeline.alerts().active_alerts().len().to_string().yellow()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use vitalwatch_core::{MetricValues, VitalRecord};

    #[test]
    fn test_deferred_fit_waits_for_new_readings() {
        let mut schedule = FitSchedule::new(30);
        assert!(!schedule.is_due(29));
        assert!(schedule.is_due(30));

        schedule.defer(30);
        assert!(!schedule.is_due(31));
        assert!(!schedule.is_due(59));
        assert!(schedule.is_due(60));
    }

    #[test]
    fn test_only_metrics_with_enough_readings_are_trained() {
        let store = VitalStore::new();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for i in 0..5 {
            let values = MetricValues::new().with(Metric::HeartRate, 70.0 + i as f64);
            store.append(VitalRecord::new("p1", start + ChronoDuration::minutes(i), values).unwrap());
        }
        let configured = [Metric::HeartRate, Metric::Temperature];
        assert_eq!(trainable_metrics(&store, &configured, 5), vec![Metric::HeartRate]);
        assert!(trainable_metrics(&store, &configured, 6).is_empty());
    }
}
