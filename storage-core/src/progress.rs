//! Live progress reporting for chunked transfers.
//!
//! The copy loop owns a [`TransferProbe`] and advances it after every chunk.
//! A separate task spawned with [`spawn_observer`] samples the probe on a
//! fixed interval and forwards snapshots to a [`ProgressSink`].

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::{SizeUnit, TransferConfig};

/// Position of one running transfer, shared with its observer
#[derive(Debug)]
pub struct TransferProbe {
    name: String,
    total: u64,
    started: Instant,
    position: AtomicU64,
    closed: AtomicBool,
}

impl TransferProbe {
    pub fn new<S: Into<String>>(name: S, total: u64) -> Self {
        Self {
            name: name.into(),
            total,
            started: Instant::now(),
            position: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn advance(&self, bytes: u64) {
        self.position.fetch_add(bytes, Ordering::AcqRel);
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The observer stops once this holds
    pub fn is_finished(&self) -> bool {
        self.is_closed() || self.position() >= self.total
    }
}

/// Snapshot handed to a sink on every observer tick
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSample {
    pub name: String,
    pub position: u64,
    pub total: u64,
    pub bytes_per_second: f64,
}

impl ProgressSample {
    /// Rounded completion percentage; an empty transfer counts as complete
    pub fn percent(&self) -> u64 {
        if self.total == 0 {
            return 100;
        }
        ((self.position as f64 / self.total as f64) * 100.0).round() as u64
    }
}

/// `<name> --> <cur> <unit>/<total> <unit> (<pct>%) <speed><unit>/s`
pub fn format_progress_line(sample: &ProgressSample) -> String {
    let (current, current_unit) = SizeUnit::scale(sample.position as f64);
    let (total, total_unit) = SizeUnit::scale(sample.total as f64);
    let (speed, speed_unit) = SizeUnit::scale(sample.bytes_per_second);

    format!(
        "{} --> {:>6.2} {}/{:.2} {} ({:3}%) {:6.2}{}/s",
        sample.name,
        current,
        current_unit,
        total,
        total_unit,
        sample.percent(),
        speed,
        speed_unit
    )
}

/// Receives progress snapshots from the observer task
pub trait ProgressSink: Send + Sync {
    fn update(&self, sample: &ProgressSample);

    /// Called once the transfer has stopped, before the result line is printed
    fn finish(&self, _name: &str) {}
}

/// Redraws a single status line on stderr
#[derive(Debug, Default)]
pub struct TerminalProgress {
    width: Mutex<usize>,
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for TerminalProgress {
    fn update(&self, sample: &ProgressSample) {
        let line = format_progress_line(sample);
        let mut width = self.width.lock();
        *width = (*width).max(line.len());

        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r{}", line);
        let _ = stderr.flush();
    }

    fn finish(&self, _name: &str) {
        let mut width = self.width.lock();
        if *width == 0 {
            return;
        }

        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r{}\r", " ".repeat(*width));
        let _ = stderr.flush();
        *width = 0;
    }
}

/// Discards every snapshot
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn update(&self, _sample: &ProgressSample) {}
}

/// Spawn the task that samples `probe` until the transfer finishes.
///
/// Throughput is recomputed over the previous sampling window once at least
/// `config.speed_window` has elapsed; in between the last value is repeated.
pub fn spawn_observer(
    probe: Arc<TransferProbe>,
    sink: Arc<dyn ProgressSink>,
    config: &TransferConfig,
) -> JoinHandle<()> {
    let poll_interval = config.poll_interval;
    let speed_window = config.speed_window;

    tokio::spawn(async move {
        let mut window_start = probe.started();
        let mut window_position = 0u64;
        let mut speed = 0.0;

        loop {
            let now = Instant::now();
            let position = probe.position();

            let elapsed = now.duration_since(window_start);
            if elapsed >= speed_window && elapsed > Duration::ZERO {
                speed = position.saturating_sub(window_position) as f64 / elapsed.as_secs_f64();
                window_start = now;
                window_position = position;
            }

            sink.update(&ProgressSample {
                name: probe.name().to_string(),
                position,
                total: probe.total(),
                bytes_per_second: speed,
            });

            if probe.is_finished() {
                break;
            }
            tokio::time::sleep(poll_interval).await;
        }
    })
}
