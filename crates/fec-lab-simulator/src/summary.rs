use crate::recorder::ff;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// One row of the batch summary CSV: final counters plus the window metrics
/// aggregated by the summary recorder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub scenario: String,
    pub mode: String,
    pub seed: u64,
    pub duration_ms: u64,

    pub final_loss_deadline: f64,
    pub final_loss_no_deadline: f64,

    pub overhead_ratio_bytes: f64,
    pub overhead_ratio_pkts: f64,

    pub mean_queue_delay_ms: f64,

    pub mean_policy_r: f64,
    pub max_policy_r: u32,
    pub mean_policy_overhead: f64,

    pub mean_loss_window: f64,
    pub max_loss_window: f64,

    pub sent_media_pkts: i64,
    pub sent_fec_pkts: i64,
    pub dropped_media_pkts: i64,
    pub dropped_fec_pkts: i64,
    pub queue_drops_pkts: i64,
    pub wire_drops_pkts: i64,

    pub recovered_pkts: i64,
    pub unique_pkts: i64,
    pub good_within_deadline: i64,
}

const SUMMARY_HEADER: &str = "scenario,mode,seed,duration_ms,final_loss_deadline,\
final_loss_no_deadline,overhead_ratio_bytes,overhead_ratio_pkts,mean_queue_delay_ms,\
mean_policy_r,max_policy_r,mean_policy_overhead,mean_loss_window,max_loss_window,\
sent_media_pkts,sent_fec_pkts,dropped_media_pkts,dropped_fec_pkts,queue_drops_pkts,\
wire_drops_pkts,recovered_pkts,unique_pkts,good_within_deadline";

pub struct SummaryCsvWriter {
    w: BufWriter<File>,
}

impl SummaryCsvWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "{SUMMARY_HEADER}")?;
        Ok(Self { w })
    }

    pub fn write_row(&mut self, r: &SummaryRow) -> io::Result<()> {
        writeln!(
            self.w,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            r.scenario,
            r.mode,
            r.seed,
            r.duration_ms,
            ff(r.final_loss_deadline),
            ff(r.final_loss_no_deadline),
            ff(r.overhead_ratio_bytes),
            ff(r.overhead_ratio_pkts),
            ff(r.mean_queue_delay_ms),
            ff(r.mean_policy_r),
            r.max_policy_r,
            ff(r.mean_policy_overhead),
            ff(r.mean_loss_window),
            ff(r.max_loss_window),
            r.sent_media_pkts,
            r.sent_fec_pkts,
            r.dropped_media_pkts,
            r.dropped_fec_pkts,
            r.queue_drops_pkts,
            r.wire_drops_pkts,
            r.recovered_pkts,
            r.unique_pkts,
            r.good_within_deadline,
        )
    }

    pub fn close(mut self) -> io::Result<()> {
        self.w.flush()
    }
}
