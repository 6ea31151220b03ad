// Media playlist snapshot and its fetcher.

use std::time::Duration;

use m3u8_rs::{MediaPlaylist, Playlist, parse_playlist_res};
use tracing::{debug, trace};
use url::Url;

use crate::HlsStatsError;
use crate::downloader::Downloader;
use crate::events::FailureEvent;
use crate::resolver::resolve_segment_url;

/// One media segment listed in the playlist window.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Media sequence number (`#EXT-X-MEDIA-SEQUENCE` + position in the window)
    pub sequence_id: u64,
    /// Segment URI as written in the playlist, absolute or relative
    pub uri: String,
    /// `uri` resolved against the playlist URL
    pub url: Url,
    /// `#EXTINF` duration in seconds
    pub duration: f32,
}

/// A position in the sliding window.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// Announced but not yet published (no URI)
    Empty,
    Populated(Segment),
}

impl Slot {
    pub fn segment(&self) -> Option<&Segment> {
        match self {
            Slot::Empty => None,
            Slot::Populated(segment) => Some(segment),
        }
    }
}

/// Decoded media playlist, used for a single loop iteration and then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// Declared per-segment duration, used as the polling interval
    pub segment_duration: Duration,
    pub slots: Vec<Slot>,
    /// URL the playlist was fetched from, base for relative segment URIs
    pub source_url: Url,
    /// `#EXT-X-ENDLIST` was present: no segment will be added after the last one
    pub ended: bool,
}

impl Manifest {
    /// Decodes playlist bytes fetched from `source_url`.
    ///
    /// Anything that is not a media playlist is a configuration problem: the bytes do
    /// not decode, or they decode to a multivariant playlist.
    pub fn parse(bytes: &[u8], source_url: Url) -> Result<Self, HlsStatsError> {
        match parse_playlist_res(bytes) {
            Ok(Playlist::MediaPlaylist(playlist)) => Self::from_media_playlist(&playlist, source_url),
            Ok(Playlist::MasterPlaylist(_)) => Err(HlsStatsError::MultivariantManifest {
                url: source_url.to_string(),
            }),
            Err(e) => Err(HlsStatsError::invalid_manifest(
                source_url.as_str(),
                e.to_string(),
            )),
        }
    }

    pub fn from_media_playlist(
        playlist: &MediaPlaylist,
        source_url: Url,
    ) -> Result<Self, HlsStatsError> {
        let segment_duration = declared_segment_duration(playlist).ok_or_else(|| {
            HlsStatsError::invalid_manifest(
                source_url.as_str(),
                "playlist declares no usable segment duration",
            )
        })?;

        let mut slots = Vec::with_capacity(playlist.segments.len());
        for (position, segment) in playlist.segments.iter().enumerate() {
            if segment.uri.trim().is_empty() {
                slots.push(Slot::Empty);
                continue;
            }
            let sequence_id = u64::try_from(position)
                .ok()
                .and_then(|position| playlist.media_sequence.checked_add(position))
                .ok_or_else(|| {
                    HlsStatsError::invalid_manifest(
                        source_url.as_str(),
                        format!(
                            "media sequence {} overflows at position {position}",
                            playlist.media_sequence
                        ),
                    )
                })?;
            slots.push(Slot::Populated(Segment {
                sequence_id,
                url: resolve_segment_url(&source_url, &segment.uri)?,
                uri: segment.uri.clone(),
                duration: segment.duration,
            }));
        }

        Ok(Self {
            segment_duration,
            slots,
            source_url,
            ended: playlist.end_list,
        })
    }

    /// Populated segments in window order.
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.slots.iter().filter_map(Slot::segment)
    }

    pub fn populated_len(&self) -> usize {
        self.segments().count()
    }
}

/// `#EXT-X-TARGETDURATION`, or the longest `#EXTINF` when the target is missing.
fn declared_segment_duration(playlist: &MediaPlaylist) -> Option<Duration> {
    if playlist.target_duration > 0 {
        return Some(Duration::from_secs(playlist.target_duration));
    }

    let longest = playlist
        .segments
        .iter()
        .map(|segment| f64::from(segment.duration))
        .fold(0.0_f64, f64::max);
    Duration::try_from_secs_f64(longest)
        .ok()
        .filter(|duration| !duration.is_zero())
}

/// Why a playlist refresh produced no manifest.
#[derive(Debug)]
pub enum FetchError {
    /// Transport failure or non-200 status; already reported to the sink.
    Unavailable(FailureEvent),
    /// The playlist itself is unusable; the probe configuration is broken.
    Fatal(HlsStatsError),
}

/// Fetches and decodes the media playlist through the instrumented downloader.
#[derive(Clone)]
pub struct ManifestFetcher {
    downloader: Downloader,
}

impl ManifestFetcher {
    pub fn new(downloader: Downloader) -> Self {
        Self { downloader }
    }

    pub async fn fetch(&self, url: &Url) -> Result<Manifest, FetchError> {
        trace!(url = %url, "Refreshing playlist");
        let fetched = self
            .downloader
            .get(url)
            .await
            .map_err(FetchError::Unavailable)?;

        let manifest = Manifest::parse(&fetched.body, url.clone()).map_err(FetchError::Fatal)?;
        debug!(
            url = %url,
            slots = manifest.slots.len(),
            segment_duration = ?manifest.segment_duration,
            "Playlist refreshed"
        );
        Ok(manifest)
    }
}
