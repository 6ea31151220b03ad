//! Per-viewer playback loop.
//!
//! A session follows a live playlist the way a player `buffer_offset` segments behind
//! the live edge would: it refreshes the playlist once per segment duration and
//! downloads the segment its cursor points at. The first failure ends the session;
//! restarting a viewer is left to the caller.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;

use crate::HlsStatsError;
use crate::downloader::Downloader;
use crate::events::FailureEvent;
use crate::manifest::{FetchError, Manifest, ManifestFetcher};
use crate::resolver::{Unresolved, locate_start, resolve_next};

/// Waits between loop iterations.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn wait(&self, interval: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn wait(&self, interval: Duration) {
        tokio::time::sleep(interval).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The playlist refresh failed (status 0 for network-level failures)
    ManifestUnavailable { http_status: u16 },
    SegmentFailed { sequence_id: u64, http_status: u16 },
    /// The cursor ran ahead of the published segments
    Stalled { sequence_id: u64 },
    /// The cursor fell behind the window
    CursorExpired { sequence_id: u64, oldest: u64 },
    /// The playlist carries `#EXT-X-ENDLIST` and every segment has been fetched
    StreamEnded { sequence_id: u64 },
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ManifestUnavailable { http_status } => {
                write!(f, "playlist unavailable (status {http_status})")
            }
            Self::SegmentFailed {
                sequence_id,
                http_status,
            } => write!(f, "segment {sequence_id} failed (status {http_status})"),
            Self::Stalled { sequence_id } => write!(f, "stalled waiting for segment {sequence_id}"),
            Self::CursorExpired {
                sequence_id,
                oldest,
            } => write!(
                f,
                "segment {sequence_id} expired (oldest in window {oldest})"
            ),
            Self::StreamEnded { sequence_id } => {
                write!(f, "stream ended before segment {sequence_id}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Steady,
    Terminated(TerminationReason),
}

/// Outcome of a session that ran until its first unrecovered failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub reason: TerminationReason,
    pub segments_fetched: u64,
    /// Sequence id the session would have fetched next
    pub cursor: u64,
}

pub struct Session {
    playlist_url: Url,
    buffer_offset: usize,
    downloader: Downloader,
    fetcher: ManifestFetcher,
    pacer: Arc<dyn Pacer>,
    state: SessionState,
    cursor: u64,
    interval: Duration,
    segments_fetched: u64,
}

impl Session {
    pub fn new(playlist_url: Url, buffer_offset: usize, downloader: Downloader) -> Self {
        Self {
            playlist_url,
            buffer_offset,
            fetcher: ManifestFetcher::new(downloader.clone()),
            downloader,
            pacer: Arc::new(TokioPacer),
            state: SessionState::Init,
            cursor: 0,
            interval: Duration::ZERO,
            segments_fetched: 0,
        }
    }

    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn playlist_url(&self) -> &Url {
        &self.playlist_url
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Drives the session until it terminates.
    ///
    /// Errors are configuration problems: the playlist cannot be fetched or decoded at
    /// startup, it stops decoding later on, or the buffer offset does not fit the window.
    pub async fn run(mut self) -> Result<SessionReport, HlsStatsError> {
        loop {
            if let SessionState::Terminated(reason) = &self.state {
                info!(
                    url = %self.playlist_url,
                    segments = self.segments_fetched,
                    cursor = self.cursor,
                    %reason,
                    "Session terminated"
                );
                return Ok(SessionReport {
                    reason: reason.clone(),
                    segments_fetched: self.segments_fetched,
                    cursor: self.cursor,
                });
            }
            self.step().await?;
        }
    }

    /// Performs one transition of the state machine. A terminated session stays put.
    pub async fn step(&mut self) -> Result<(), HlsStatsError> {
        match self.state {
            SessionState::Init => self.start().await,
            SessionState::Steady => self.iterate().await,
            SessionState::Terminated(_) => Ok(()),
        }
    }

    async fn start(&mut self) -> Result<(), HlsStatsError> {
        let manifest = match self.fetcher.fetch(&self.playlist_url).await {
            Ok(manifest) => manifest,
            Err(FetchError::Unavailable(failure)) => {
                return Err(HlsStatsError::StartupUnavailable {
                    url: self.playlist_url.to_string(),
                    reason: failure.message,
                });
            }
            Err(FetchError::Fatal(e)) => return Err(e),
        };
        self.interval = manifest.segment_duration;

        let start = locate_start(&manifest, self.buffer_offset)?;
        self.cursor = start.sequence_id;
        let url = start.url.clone();
        debug!(
            url = %self.playlist_url,
            sequence_id = self.cursor,
            buffer_offset = self.buffer_offset,
            "Starting playback"
        );

        // A failed first download leaves the cursor in place for the next iteration.
        if self.downloader.get(&url).await.is_ok() {
            self.advance()?;
        }
        self.state = SessionState::Steady;
        Ok(())
    }

    async fn iterate(&mut self) -> Result<(), HlsStatsError> {
        self.pacer.wait(self.interval).await;

        let manifest = match self.fetcher.fetch(&self.playlist_url).await {
            Ok(manifest) => manifest,
            Err(FetchError::Unavailable(failure)) => {
                self.terminate(TerminationReason::ManifestUnavailable {
                    http_status: failure.http_status,
                })
                .await;
                return Ok(());
            }
            Err(FetchError::Fatal(e)) => return Err(e),
        };
        self.interval = manifest.segment_duration;

        match resolve_next(&manifest, self.cursor) {
            Ok(next) => match self.downloader.get(&next.url).await {
                Ok(_) => self.advance()?,
                Err(failure) => {
                    self.terminate(TerminationReason::SegmentFailed {
                        sequence_id: next.sequence_id,
                        http_status: failure.http_status,
                    })
                    .await;
                }
            },
            Err(Unresolved::Stall { cursor, .. }) if manifest.ended => {
                info!(url = %self.playlist_url, sequence_id = cursor, "Playlist ended");
                self.state = SessionState::Terminated(TerminationReason::StreamEnded {
                    sequence_id: cursor,
                });
            }
            Err(unresolved) => self.report_unresolved(&manifest, unresolved).await,
        }
        Ok(())
    }

    async fn report_unresolved(&mut self, manifest: &Manifest, unresolved: Unresolved) {
        let failure = FailureEvent::new(&manifest.source_url, 0, unresolved.to_string());
        warn!(url = %self.playlist_url, message = %failure.message, "Playback interrupted");
        self.downloader.sink().on_failure(&failure);

        let reason = match unresolved {
            Unresolved::Stall { cursor, .. } => TerminationReason::Stalled {
                sequence_id: cursor,
            },
            Unresolved::CursorExpired { cursor, oldest } => TerminationReason::CursorExpired {
                sequence_id: cursor,
                oldest,
            },
        };
        self.terminate(reason).await;
    }

    fn advance(&mut self) -> Result<(), HlsStatsError> {
        self.cursor = self.cursor.checked_add(1).ok_or_else(|| {
            HlsStatsError::invalid_manifest(
                self.playlist_url.as_str(),
                "media sequence cannot advance past the last representable id",
            )
        })?;
        self.segments_fetched += 1;
        Ok(())
    }

    /// A failure buys one more interval before the session gives up.
    async fn terminate(&mut self, reason: TerminationReason) {
        self.pacer.wait(self.interval).await;
        self.state = SessionState::Terminated(reason);
    }
}
