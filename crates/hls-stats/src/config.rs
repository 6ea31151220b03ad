use std::time::Duration;

use reqwest::Client;
use reqwest::header::HeaderMap;
use tracing::{debug, info};

use crate::HlsStatsError;
use crate::proxy::{ProxyConfig, build_proxy_from_config};

pub const DEFAULT_USER_AGENT: &str = "hls-stats-0.02";

/// Header carrying the per-request correlation id.
pub const CORRELATION_HEADER: &str = "X-Correlation-ID-HLS-Stats";

/// HTTP settings shared by every simulated viewer
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Overall timeout for one exchange, body included. Zero disables it.
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// User agent sent on every request
    pub user_agent: String,

    /// Advertise `Accept-Encoding: gzip` and decode compressed bodies
    pub accept_gzip: bool,

    /// Extra headers passed through on every request (e.g. authorization)
    pub headers: HeaderMap,

    /// Proxy configuration (optional)
    pub proxy: Option<ProxyConfig>,

    /// Whether to honour proxy environment variables when no explicit proxy is set
    pub use_system_proxy: bool,

    /// Maximum idle connections to keep per host
    pub pool_max_idle_per_host: usize,

    /// Duration to keep idle connections alive before closing
    pub pool_idle_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(3),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            accept_gzip: true,
            headers: HeaderMap::new(),
            proxy: None,
            use_system_proxy: false,
            pool_max_idle_per_host: 10,
            pool_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl ProbeConfig {
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }
}

/// Create the shared reqwest Client for all sessions.
///
/// Transparent decompression is switched off: the [`Downloader`](crate::Downloader)
/// negotiates and decodes gzip itself so it can report the decoded size.
pub fn create_client(config: &ProbeConfig) -> Result<Client, HlsStatsError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(config.pool_idle_timeout)
        .default_headers(config.headers.clone())
        .no_gzip()
        .no_deflate()
        .redirect(reqwest::redirect::Policy::limited(10));

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        let proxy = build_proxy_from_config(proxy_config)?;
        client_builder = client_builder.proxy(proxy);
        info!(proxy_url = %proxy_config.url, "Using explicitly configured proxy");
    } else if config.use_system_proxy {
        info!("Using system proxy settings");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled");
    }

    client_builder.build().map_err(HlsStatsError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyType;
    use reqwest::header::{AUTHORIZATION, HeaderValue};

    #[test]
    fn default_matches_probe_expectations() {
        let config = ProbeConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert!(config.accept_gzip);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert!(config.proxy.is_none());
    }

    #[test]
    fn with_headers_merges_and_overrides() {
        let mut first = HeaderMap::new();
        first.insert(AUTHORIZATION, HeaderValue::from_static("Bearer old"));
        let mut second = HeaderMap::new();
        second.insert(AUTHORIZATION, HeaderValue::from_static("Bearer new"));

        let config = ProbeConfig::default().with_headers(first).with_headers(second);
        assert_eq!(config.headers.get(AUTHORIZATION).unwrap(), "Bearer new");
        assert_eq!(config.headers.len(), 1);
    }

    #[test]
    fn create_client_rejects_broken_proxy() {
        let config = ProbeConfig::default().with_proxy(ProxyConfig {
            url: "http://[::1".to_string(),
            proxy_type: ProxyType::Http,
            auth: None,
        });
        assert!(matches!(
            create_client(&config),
            Err(HlsStatsError::ProxyConfiguration { .. })
        ));
    }

    #[test]
    fn create_client_with_defaults() {
        assert!(create_client(&ProbeConfig::default()).is_ok());
    }
}
