use std::collections::HashMap;
use std::path::Path;

use hls_stats_engine::{HlsStatsError, ProbeConfig, ProxyConfig};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{AppError, Result};
use crate::influx::InfluxConfig;

fn default_buffer_segments() -> usize {
    1
}

/// `monitor` configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    pub playlist_urls: Vec<String>,
    /// Segments behind the live edge at which playback starts
    #[serde(default = "default_buffer_segments")]
    pub buffer_segments: usize,
    #[serde(default)]
    pub influx_endpoint: Option<String>,
    #[serde(default)]
    pub influx_org: Option<String>,
    #[serde(default)]
    pub influx_bucket: Option<String>,
    #[serde(default)]
    pub influx_token: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub proxy: Option<String>,
    /// Passed through on every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl MonitorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::InvalidInput(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), playlists = config.playlist_urls.len(), "Config loaded");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        if config.playlist_urls.is_empty() {
            return Err(AppError::InvalidInput(
                "playlistUrls must list at least one playlist".to_string(),
            ));
        }
        config.playlist_urls()?;
        Ok(config)
    }

    pub fn playlist_urls(&self) -> Result<Vec<Url>> {
        self.playlist_urls
            .iter()
            .map(String::as_str)
            .map(parse_playlist_url)
            .collect()
    }

    pub fn probe_config(&self) -> Result<ProbeConfig> {
        let mut config = ProbeConfig::default().with_headers(header_map(&self.headers)?);
        if let Some(user_agent) = &self.user_agent {
            config = config.with_user_agent(user_agent);
        }
        if let Some(proxy) = &self.proxy {
            config = config.with_proxy(ProxyConfig::from_url(proxy)?);
        }
        Ok(config)
    }

    /// Influx settings; all four keys are required once Influx output is enabled.
    pub fn influx(&self) -> Result<InfluxConfig> {
        fn required(value: &Option<String>, key: &str) -> Result<String> {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
                .ok_or_else(|| AppError::InvalidInput(format!("{key} is required with --influx")))
        }

        Ok(InfluxConfig {
            endpoint: required(&self.influx_endpoint, "influxEndpoint")?,
            org: required(&self.influx_org, "influxOrg")?,
            bucket: required(&self.influx_bucket, "influxBucket")?,
            token: required(&self.influx_token, "influxToken")?,
        })
    }
}

/// Playlist URLs must be absolute http(s) URLs.
pub fn parse_playlist_url(input: &str) -> Result<Url> {
    let url = Url::parse(input).map_err(|e| HlsStatsError::invalid_url(input, e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(HlsStatsError::invalid_url(input, format!("unsupported scheme `{other}`")).into()),
    }
}

fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::InvalidInput(format!("invalid header name `{name}`: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AppError::InvalidInput(format!("invalid value for header {name}: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}
