use anyhow::{Context, Result};
use clap::Parser;
use fec_lab_abstract::Mode;
use fec_lab_simulator::{
    run_scenario, scenarios, CsvRecorder, MultiRecorder, Recorder, RunOptions, RunResult,
    SummaryCsvWriter, SummaryRecorder, SummaryRow,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Adaptive-FEC simulation batch runner")]
struct Args {
    /// Base seed; run i uses seed + i.
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Repeats per scenario and mode.
    #[arg(long, default_value_t = 30)]
    runs: u64,

    /// Output summary CSV file.
    #[arg(long, default_value = "results/summary.csv")]
    out: PathBuf,

    /// Scenario name filter (substring).
    #[arg(long)]
    scenario: Option<String>,

    /// Write per-run time-series CSVs into this directory.
    #[arg(long)]
    csvdir: Option<PathBuf>,

    /// Comma-separated scenario substrings to write time series for
    /// (requires --csvdir; empty writes none).
    #[arg(long)]
    timeseries: Option<String>,

    /// Write all summary rows as a JSON trace.
    #[arg(long)]
    trace: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    info!("fec-lab-sim starting…");

    let mut writer = SummaryCsvWriter::create(&args.out)
        .with_context(|| format!("failed to create summary CSV {}", args.out.display()))?;

    let ts_allow = parse_list(args.timeseries.as_deref());
    let mut trace_rows: Vec<SummaryRow> = Vec::new();

    for sc in scenarios::default_scenarios() {
        if let Some(filter) = &args.scenario {
            if !sc.name.contains(filter.as_str()) {
                continue;
            }
        }

        for mode in [Mode::Static, Mode::Adaptive] {
            for i in 0..args.runs {
                let run_seed = args.seed + i;

                let mut summary = SummaryRecorder::new();
                let mut time_series = match &args.csvdir {
                    Some(dir) if wants_timeseries(&sc.name, &ts_allow) => {
                        let path =
                            dir.join(format!("{}__{}__seed{}.csv", sc.name, mode, run_seed));
                        Some(CsvRecorder::create(&path).with_context(|| {
                            format!("failed to create time-series CSV {}", path.display())
                        })?)
                    }
                    _ => None,
                };

                let res = {
                    let mut children: Vec<&mut dyn Recorder> = vec![&mut summary];
                    if let Some(ts) = time_series.as_mut() {
                        children.push(ts);
                    }
                    let mut recorder = MultiRecorder::new(children);
                    run_scenario(
                        &sc,
                        RunOptions {
                            mode,
                            seed: run_seed,
                            recorder: Some(&mut recorder),
                        },
                    )
                    .with_context(|| format!("run failed: {} ({mode})", sc.name))?
                };

                let row = summary_row(&res, &summary);
                writer
                    .write_row(&row)
                    .context("failed to write summary row")?;
                if args.trace.is_some() {
                    trace_rows.push(row);
                }
            }
        }
    }

    writer.close().context("failed to flush summary CSV")?;

    if let Some(path) = &args.trace {
        write_trace(path, &trace_rows)?;
    }

    info!("done");
    Ok(())
}

fn summary_row(res: &RunResult, summary: &SummaryRecorder) -> SummaryRow {
    SummaryRow {
        scenario: res.scenario.clone(),
        mode: res.mode.to_string(),
        seed: res.seed,
        duration_ms: res.duration.as_millis() as u64,

        final_loss_deadline: res.final_loss_deadline,
        final_loss_no_deadline: res.final_loss_no_deadline,

        overhead_ratio_bytes: res.overhead_ratio_bytes,
        overhead_ratio_pkts: res.overhead_ratio_pkts,

        mean_queue_delay_ms: summary.mean_queue_delay_ms(),

        mean_policy_r: summary.mean_policy_r(),
        max_policy_r: summary.max_policy_r(),
        mean_policy_overhead: summary.mean_policy_overhead(),

        mean_loss_window: summary.mean_loss_window(),
        max_loss_window: summary.max_loss_window(),

        sent_media_pkts: res.sent_media_pkts,
        sent_fec_pkts: res.sent_fec_pkts,
        dropped_media_pkts: res.dropped_media_pkts,
        dropped_fec_pkts: res.dropped_fec_pkts,
        queue_drops_pkts: res.dropped_queue_pkts,
        wire_drops_pkts: res.dropped_wire_pkts,

        recovered_pkts: res.recovered_pkts,
        unique_pkts: res.unique_pkts,
        good_within_deadline: res.good_within_deadline,
    }
}

fn parse_list(s: Option<&str>) -> Vec<String> {
    s.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn wants_timeseries(name: &str, allow: &[String]) -> bool {
    // empty allowlist: never write time series
    allow.iter().any(|sub| name.contains(sub.as_str()))
}

fn write_trace(path: &Path, rows: &[SummaryRow]) -> Result<()> {
    let data = serde_json::to_vec_pretty(rows).context("failed to serialize run trace")?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, &data)
        .with_context(|| format!("failed to write trace file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_list_splits_and_trims() {
        assert_eq!(parse_list(None), Vec::<String>::new());
        assert_eq!(parse_list(Some("")), Vec::<String>::new());
        assert_eq!(
            parse_list(Some("bernoulli, loss_steps ,")),
            vec!["bernoulli".to_string(), "loss_steps".to_string()]
        );
    }

    #[test]
    fn empty_allowlist_writes_nothing() {
        assert!(!wants_timeseries("bernoulli_2pct", &[]));
        assert!(wants_timeseries(
            "bernoulli_2pct",
            &["bernoulli".to_string()]
        ));
        assert!(!wants_timeseries("loss_steps", &["bernoulli".to_string()]));
    }
}
