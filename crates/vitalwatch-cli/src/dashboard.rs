// Terminal dashboard - latest reading per patient with baseline and anomaly status

use crate::{read_input, sort_by_time, CliResult};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use vitalwatch_analysis::alerting::Severity;
use vitalwatch_analysis::{AnalysisConfig, IngestOutcome, Pipeline, VerdictStatus};
use vitalwatch_core::{Metric, PatientId, VitalStore};

pub fn run(config: AnalysisConfig, input: &Path, patient: Option<&str>) -> CliResult<()> {
    let mut raws = read_input(input)?;
    // each reading is judged against its own past, so feed them in time order
    sort_by_time(&mut raws);
    let mut pipeline = Pipeline::new(config, Arc::new(VitalStore::new()))?;

    // first pass builds the store and baselines
    let outcomes = pipeline.ingest_all(raws);
    if outcomes.is_empty() {
        println!("{}", "No valid readings in input.".yellow());
        return Ok(());
    }

    // anomaly columns are optional: too little data just leaves them empty
    match pipeline.fit_anomaly_from_store(&[]) {
        Ok(report) => info!(models = report.models, "anomaly models fitted"),
        Err(e) if e.is_recoverable() => warn!(reason = %e, "anomaly scores unavailable"),
        Err(e) => return Err(e.into()),
    }

    let mut latest = latest_outcomes(pipeline.store(), outcomes);
    if let Some(pid) = patient {
        latest.retain(|id, _| id.as_str() == pid);
        if latest.is_empty() {
            return Err(format!("no readings for patient {}", pid).into());
        }
    }

    println!("\n{}", "VitalWatch dashboard".cyan().bold());
    println!(
        "{} {} readings, {} patients\n",
        "Store:".dimmed(),
        pipeline.store().len(),
        pipeline.store().patients().len()
    );

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    let mut header = vec![Cell::new("Patient"), Cell::new("Last reading")];
    header.extend(Metric::ALL.iter().map(|m| Cell::new(format!("{} ({})", m.display_name(), m.unit()))));
    header.push(Cell::new("Anomalies"));
    table.set_header(header);

    for (pid, outcome) in &latest {
        // score the latest reading against whichever models were fitted
        let detector = pipeline.anomaly();
        let scorable = detector.scorable_metrics(&outcome.record);
        let threshold = detector.config().threshold;
        let anomalies: BTreeMap<Metric, bool> = detector
            .score_metrics(&outcome.record, &scorable)
            .unwrap_or_default()
            .into_iter()
            .map(|(m, score)| (m, score > threshold))
            .collect();

        let mut row = vec![
            Cell::new(pid.as_str()),
            Cell::new(outcome.record.timestamp().format("%Y-%m-%d %H:%M").to_string()),
        ];
        for metric in Metric::ALL {
            row.push(metric_cell(&pipeline, outcome, pid, metric));
        }
        let flagged: Vec<&str> = anomalies
            .iter()
            .filter_map(|(m, f)| f.then_some(m.name()))
            .collect();
        row.push(if flagged.is_empty() {
            Cell::new("-")
        } else {
            Cell::new(flagged.join(", ")).fg(Color::Magenta)
        });
        table.add_row(row);
    }
    println!("{table}");

    print_alerts(&pipeline, &latest);
    Ok(())
}

/// Outcome of each patient's newest reading by timestamp, whatever the ingest order
fn latest_outcomes(store: &VitalStore, outcomes: Vec<IngestOutcome>) -> BTreeMap<PatientId, IngestOutcome> {
    let mut latest = BTreeMap::new();
    for outcome in outcomes {
        let pid = outcome.record.patient_id().clone();
        if store.latest(&pid).is_ok_and(|newest| newest == outcome.record) {
            latest.insert(pid, outcome);
        }
    }
    latest
}

fn metric_cell(pipeline: &Pipeline, outcome: &IngestOutcome, pid: &PatientId, metric: Metric) -> Cell {
    let Some(value) = outcome.record.get(metric) else {
        return Cell::new("-");
    };
    let status = outcome.verdicts.get(&metric).map(|v| v.status);
    let text = match pipeline.baseline().baseline(pid, metric) {
        Some(b) if status != Some(VerdictStatus::InsufficientData) => {
            format!("{:.1} (μ {:.1})", value, b.mean)
        }
        _ => format!("{:.1} (warming up)", value),
    };
    let color = match status {
        Some(VerdictStatus::Critical) => Color::Red,
        Some(VerdictStatus::Elevated) => Color::Yellow,
        Some(VerdictStatus::Normal) => Color::Green,
        _ => Color::DarkGrey,
    };
    Cell::new(text).fg(color)
}

fn print_alerts(pipeline: &Pipeline, shown: &BTreeMap<PatientId, IngestOutcome>) {
    let alerts: Vec<_> = pipeline
        .alerts()
        .active_alerts()
        .into_iter()
        .filter(|a| shown.contains_key(&a.key.patient_id))
        .collect();
    if alerts.is_empty() {
        println!("\n{}", "No active alerts.".green());
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Severity", "Patient", "Source", "Message", "Since"]);
    for alert in alerts.iter().take(20) {
        let severity = match alert.severity {
            Severity::Critical => Cell::new("critical").fg(Color::Red),
            Severity::Warning => Cell::new("warning").fg(Color::Yellow),
        };
        table.add_row(vec![
            severity,
            Cell::new(alert.key.patient_id.as_str()),
            Cell::new(format!("{:?}", alert.key.source)),
            Cell::new(&alert.message),
            Cell::new(alert.firing_at.format("%m-%d %H:%M").to_string()),
        ]);
    }
    println!("\n{}", "Active alerts".cyan().bold());
    println!("{table}");
    if alerts.len() > 20 {
        println!("{}", format!("... and {} more", alerts.len() - 20).dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use vitalwatch_core::RawVitalRecord;

    #[test]
    fn test_latest_is_newest_timestamp_not_last_ingested() {
        let mut pipeline = Pipeline::new(AnalysisConfig::default(), Arc::new(VitalStore::new())).unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let raw = |minute: i64, hr: f64| {
            RawVitalRecord::new("p1", (start + Duration::minutes(minute)).to_rfc3339())
                .with_metric(Metric::HeartRate, hr)
        };
        // newest reading arrives first
        let outcomes = pipeline.ingest_all(vec![raw(30, 90.0), raw(0, 70.0), raw(10, 72.0)]);

        let latest = latest_outcomes(pipeline.store(), outcomes);
        let shown = &latest[&PatientId::from("p1")];
        assert_eq!(shown.record.get(Metric::HeartRate), Some(90.0));
        assert_eq!(shown.record.timestamp(), start + Duration::minutes(30));
    }
}
