// Live-edge arithmetic and next-segment resolution over one manifest snapshot.

use std::fmt;

use url::Url;

use crate::HlsStatsError;
use crate::manifest::{Manifest, Segment, Slot};

/// A segment picked for download, with its URL made absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSegment {
    pub sequence_id: u64,
    pub url: Url,
}

/// Why the cursor did not match any segment in the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unresolved {
    /// The segment is not published yet: a player would be stalled waiting for it.
    Stall {
        cursor: u64,
        live_edge: Option<u64>,
    },
    /// The segment already left the back of the window.
    CursorExpired { cursor: u64, oldest: u64 },
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unresolved::Stall {
                cursor,
                live_edge: Some(edge),
            } => write!(
                f,
                "Sequence id: {cursor} not available (live edge {edge}), stalling playback"
            ),
            Unresolved::Stall {
                cursor,
                live_edge: None,
            } => write!(
                f,
                "Sequence id: {cursor} not available (empty window), stalling playback"
            ),
            Unresolved::CursorExpired { cursor, oldest } => write!(
                f,
                "Sequence id: {cursor} expired, oldest segment in window is {oldest}"
            ),
        }
    }
}

/// Index of the live edge: the last populated slot before any unpopulated suffix.
///
/// `None` when the window is empty or starts with an unpopulated slot.
pub fn live_edge_index(manifest: &Manifest) -> Option<usize> {
    let populated_prefix = manifest
        .slots
        .iter()
        .take_while(|slot| matches!(slot, Slot::Populated(_)))
        .count();
    populated_prefix.checked_sub(1)
}

/// Segment at which playback starts, `buffer_offset` segments behind the live edge.
pub fn locate_start(manifest: &Manifest, buffer_offset: usize) -> Result<&Segment, HlsStatsError> {
    let edge = live_edge_index(manifest).ok_or_else(|| {
        HlsStatsError::configuration(format!(
            "playlist {} has no published segments to start from",
            manifest.source_url
        ))
    })?;

    if buffer_offset > edge {
        return Err(HlsStatsError::configuration(format!(
            "buffer offset {buffer_offset} must be smaller than the {} segments in the window of {}",
            edge + 1,
            manifest.source_url
        )));
    }

    manifest.slots[edge - buffer_offset]
        .segment()
        .ok_or_else(|| HlsStatsError::configuration("live edge slot is not populated"))
}

/// Finds the segment with `sequence_id == cursor` and resolves its URL.
pub fn resolve_next(manifest: &Manifest, cursor: u64) -> Result<ResolvedSegment, Unresolved> {
    if let Some(segment) = manifest.segments().find(|s| s.sequence_id == cursor) {
        return Ok(ResolvedSegment {
            sequence_id: segment.sequence_id,
            url: segment.url.clone(),
        });
    }

    let live_edge = manifest.segments().map(|s| s.sequence_id).max();
    match manifest.segments().map(|s| s.sequence_id).min() {
        Some(oldest) if oldest > cursor => Err(Unresolved::CursorExpired { cursor, oldest }),
        _ => Err(Unresolved::Stall { cursor, live_edge }),
    }
}

/// Absolute URIs are kept, anything else replaces the last path component of the playlist URL.
///
/// A URI that resolves to neither makes the playlist unusable.
pub fn resolve_segment_url(playlist_url: &Url, uri: &str) -> Result<Url, HlsStatsError> {
    if let Ok(absolute) = Url::parse(uri) {
        return Ok(absolute);
    }
    playlist_url.join(uri).map_err(|e| {
        HlsStatsError::invalid_manifest(
            playlist_url.as_str(),
            format!("cannot resolve segment URI `{uri}`: {e}"),
        )
    })
}

/// Host (with explicit port, if any) and last path component of `url`.
pub fn split_url(url: &Url) -> (String, String) {
    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    };
    let file = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default()
        .to_string();
    (host, file)
}
