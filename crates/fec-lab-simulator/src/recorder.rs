use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

/// One row of the per-run time series, emitted at every stats tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSample {
    pub t: Duration,

    /// Pre-FEC media drop ratio over the window.
    pub loss_window: f64,
    pub target_bwe_bps: f64,
    pub media_rate_bps: f64,
    pub capacity_bps: f64,
    pub current_bitrate_bps: f64,
    pub queue_delay_ms: f64,

    pub policy_enabled: bool,
    pub policy_k: u32,
    pub policy_r: u32,
    pub policy_overhead: f64,

    pub sent_media: i64,
    pub sent_fec: i64,
    pub dropped_media: i64,
    pub dropped_fec: i64,
    pub queue_drops: i64,
    pub wire_drops: i64,
}

pub trait Recorder {
    /// Called once per stats tick. Implementations must not fail the run:
    /// I/O errors are held back until `close`.
    fn on_sample(&mut self, sample: &TimeSample);

    fn close(&mut self) -> io::Result<()>;
}

pub(crate) fn ff(v: f64) -> String {
    format!("{v:.6}")
}

/// Writes the fixed-header time-series CSV. Row write errors are swallowed so
/// the simulation accounting is never corrupted mid-stream; flush errors
/// surface on close.
pub struct CsvRecorder {
    w: BufWriter<File>,
}

const TIME_SERIES_HEADER: &str = "t_ms,loss_window,target_bwe_bps,media_rate_bps,capacity_bps,\
current_bitrate_bps,queue_delay_ms,policy_enabled,policy_k,policy_r,policy_overhead,\
sent_media,sent_fec,dropped_media,dropped_fec,queue_drops,wire_drops";

impl CsvRecorder {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "{TIME_SERIES_HEADER}")?;
        Ok(Self { w })
    }
}

impl Recorder for CsvRecorder {
    fn on_sample(&mut self, s: &TimeSample) {
        let _ = writeln!(
            self.w,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            s.t.as_millis(),
            ff(s.loss_window),
            ff(s.target_bwe_bps),
            ff(s.media_rate_bps),
            ff(s.capacity_bps),
            ff(s.current_bitrate_bps),
            ff(s.queue_delay_ms),
            s.policy_enabled,
            s.policy_k,
            s.policy_r,
            ff(s.policy_overhead),
            s.sent_media,
            s.sent_fec,
            s.dropped_media,
            s.dropped_fec,
            s.queue_drops,
            s.wire_drops,
        );
    }

    fn close(&mut self) -> io::Result<()> {
        self.w.flush()
    }
}

/// Aggregates samples into end-of-run summary metrics. Policy means are
/// computed over the samples where the policy was enabled.
#[derive(Debug, Default)]
pub struct SummaryRecorder {
    samples: i64,
    sum_queue_delay_ms: f64,

    enabled_samples: i64,
    sum_policy_r: f64,
    sum_policy_overhead: f64,
    max_policy_r: u32,

    sum_loss_window: f64,
    max_loss_window: f64,
}

impl SummaryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mean_queue_delay_ms(&self) -> f64 {
        if self.samples <= 0 {
            return 0.0;
        }
        self.sum_queue_delay_ms / self.samples as f64
    }

    pub fn mean_policy_r(&self) -> f64 {
        if self.enabled_samples <= 0 {
            return 0.0;
        }
        self.sum_policy_r / self.enabled_samples as f64
    }

    pub fn max_policy_r(&self) -> u32 {
        self.max_policy_r
    }

    pub fn mean_policy_overhead(&self) -> f64 {
        if self.enabled_samples <= 0 {
            return 0.0;
        }
        self.sum_policy_overhead / self.enabled_samples as f64
    }

    pub fn mean_loss_window(&self) -> f64 {
        if self.samples <= 0 {
            return 0.0;
        }
        self.sum_loss_window / self.samples as f64
    }

    pub fn max_loss_window(&self) -> f64 {
        self.max_loss_window
    }
}

impl Recorder for SummaryRecorder {
    fn on_sample(&mut self, s: &TimeSample) {
        self.samples += 1;
        self.sum_queue_delay_ms += s.queue_delay_ms;

        self.sum_loss_window += s.loss_window;
        if s.loss_window > self.max_loss_window {
            self.max_loss_window = s.loss_window;
        }

        if s.policy_enabled {
            self.enabled_samples += 1;
            self.sum_policy_r += s.policy_r as f64;
            self.sum_policy_overhead += s.policy_overhead;
            if s.policy_r > self.max_policy_r {
                self.max_policy_r = s.policy_r;
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Keeps every sample in memory, mostly for assertions on run behavior.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    samples: Vec<TimeSample>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> &[TimeSample] {
        &self.samples
    }
}

impl Recorder for MemoryRecorder {
    fn on_sample(&mut self, s: &TimeSample) {
        self.samples.push(s.clone());
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Fans out samples to several recorders; `close` closes every child and
/// returns the first failure.
pub struct MultiRecorder<'a> {
    children: Vec<&'a mut dyn Recorder>,
}

impl<'a> MultiRecorder<'a> {
    pub fn new(children: Vec<&'a mut dyn Recorder>) -> Self {
        Self { children }
    }
}

impl Recorder for MultiRecorder<'_> {
    fn on_sample(&mut self, s: &TimeSample) {
        for child in &mut self.children {
            child.on_sample(s);
        }
    }

    fn close(&mut self) -> io::Result<()> {
        let mut first_err = None;
        for child in &mut self.children {
            if let Err(err) = child.close() {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
