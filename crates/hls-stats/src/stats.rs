//! Throughput aggregation across concurrent sessions.
//!
//! Sessions push one [`Sample`] per successful download into an unbounded channel; a
//! single [`StatsAggregator`] consumes it and closes a window whenever a sample arrives
//! at least one print interval after the window opened.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use humansize::{DECIMAL, format_size};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

use crate::events::{EventSink, FailureEvent, SuccessEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub bytes: u64,
}

impl From<&SuccessEvent> for Sample {
    fn from(event: &SuccessEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            bytes: event.bytes,
        }
    }
}

/// A closed aggregation window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSummary {
    pub elapsed_seconds: f64,
    pub total_bytes: u64,
    /// Bytes per second, 0 when no time elapsed
    pub average_rate: f64,
}

impl fmt::Display for WindowSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Last {:.2} seconds: Transferred data: {:<8} Avg: {}/s",
            self.elapsed_seconds,
            format_bytes(self.total_bytes),
            format_bytes(self.average_rate as u64)
        )
    }
}

/// SI formatted byte count, e.g. `12.30 MB`.
pub fn format_bytes(bytes: u64) -> String {
    format_size(bytes, DECIMAL)
}

#[derive(Debug)]
pub struct StatsAggregator {
    interval: Duration,
    window_start: Option<DateTime<Utc>>,
    window_bytes: u64,
}

impl StatsAggregator {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            window_start: None,
            window_bytes: 0,
        }
    }

    /// Adds a sample, returning the summary of the window it closes, if any.
    ///
    /// The closing sample is not part of the summary; it opens the next window.
    pub fn push(&mut self, sample: Sample) -> Option<WindowSummary> {
        let Some(start) = self.window_start else {
            self.open_window(sample);
            return None;
        };

        // Samples from different sessions may arrive slightly out of order.
        let elapsed = (sample.timestamp - start).to_std().unwrap_or_default();
        if elapsed < self.interval {
            self.window_bytes += sample.bytes;
            return None;
        }

        let elapsed_seconds = elapsed.as_secs_f64();
        let summary = WindowSummary {
            elapsed_seconds,
            total_bytes: self.window_bytes,
            average_rate: if elapsed_seconds > 0.0 {
                self.window_bytes as f64 / elapsed_seconds
            } else {
                0.0
            },
        };
        self.open_window(sample);
        Some(summary)
    }

    /// Bytes accumulated in the currently open window.
    pub fn pending_bytes(&self) -> u64 {
        self.window_bytes
    }

    fn open_window(&mut self, sample: Sample) {
        self.window_start = Some(sample.timestamp);
        self.window_bytes = sample.bytes;
    }

    /// Consumes samples until every sender is dropped, reporting each closed window.
    pub async fn run(
        mut self,
        mut samples: UnboundedReceiver<Sample>,
        mut on_summary: impl FnMut(WindowSummary),
    ) -> Self {
        while let Some(sample) = samples.recv().await {
            trace!(bytes = sample.bytes, "Sample received");
            if let Some(summary) = self.push(sample) {
                debug!(
                    elapsed_seconds = summary.elapsed_seconds,
                    total_bytes = summary.total_bytes,
                    "Window closed"
                );
                on_summary(summary);
            }
        }
        self
    }
}

/// Forwards every success into the aggregator channel, then to the inner sink.
pub struct SampleSink {
    inner: Arc<dyn EventSink>,
    samples: UnboundedSender<Sample>,
}

impl SampleSink {
    pub fn new(inner: Arc<dyn EventSink>, samples: UnboundedSender<Sample>) -> Self {
        Self { inner, samples }
    }
}

impl EventSink for SampleSink {
    fn on_success(&self, event: &SuccessEvent) {
        if self.samples.send(Sample::from(event)).is_err() {
            trace!("Aggregator is gone, dropping sample");
        }
        self.inner.on_success(event);
    }

    fn on_failure(&self, event: &FailureEvent) {
        self.inner.on_failure(event);
    }
}
