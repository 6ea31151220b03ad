//! Simulated viewers of a live HLS channel.
//!
//! Each [`Session`] polls a media playlist, follows the segment a player would be
//! fetching `buffer_offset` segments behind the live edge, and reports every HTTP
//! exchange to an [`EventSink`]. [`StatsAggregator`] merges the successes of many
//! concurrent sessions into windowed throughput summaries.

pub mod config;
pub mod downloader;
pub mod error;
pub mod events;
pub mod manifest;
pub mod proxy;
pub mod resolver;
pub mod session;
pub mod stats;

#[cfg(test)]
mod test_support;

pub use config::{CORRELATION_HEADER, DEFAULT_USER_AGENT, ProbeConfig, create_client};
pub use downloader::{Downloader, Fetched};
pub use error::HlsStatsError;
pub use events::{DownloadEvent, EventSink, FailureEvent, FanoutSink, SuccessEvent};
pub use manifest::{FetchError, Manifest, ManifestFetcher, Segment, Slot};
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
pub use session::{
    Pacer, Session, SessionReport, SessionState, TerminationReason, TokioPacer,
};
pub use stats::{Sample, SampleSink, StatsAggregator, WindowSummary, format_bytes};
