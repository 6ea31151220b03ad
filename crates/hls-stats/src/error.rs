/// Errors that end a session (or the whole probe) instead of being reported as events.
///
/// Per-request failures (timeouts, refused connections, non-200 statuses, stalls) never
/// surface here: they are delivered to the [`EventSink`](crate::EventSink) as
/// [`FailureEvent`](crate::FailureEvent)s. Everything in this enum means the probe is
/// misconfigured and retrying would not help.
#[derive(Debug, thiserror::Error)]
pub enum HlsStatsError {
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("could not decode playlist {url}: {reason}")]
    InvalidManifest { url: String, reason: String },

    #[error("playlist {url} is a multivariant (master) playlist, a media playlist URL is required")]
    MultivariantManifest { url: String },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("proxy configuration error: {reason}")]
    ProxyConfiguration { reason: String },

    #[error("could not fetch playlist {url} at startup: {reason}")]
    StartupUnavailable { url: String, reason: String },

    #[error("HTTP client error: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },
}

impl HlsStatsError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn invalid_manifest(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidManifest {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn proxy_configuration(reason: impl Into<String>) -> Self {
        Self::ProxyConfiguration {
            reason: reason.into(),
        }
    }

    /// Whether the error was raised by the playlist content rather than by local setup.
    pub fn is_manifest_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidManifest { .. } | Self::MultivariantManifest { .. }
        )
    }
}
