use crate::channel::ReconnectPolicy;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "ws://192.168.4.1/ws";
pub const DEFAULT_COMMAND_QUEUE: usize = 64;

pub const ENV_WS_URL: &str = "AUDIODASH_WS_URL";
pub const ENV_RECONNECT_BASE_MS: &str = "AUDIODASH_RECONNECT_BASE_MS";
pub const ENV_RECONNECT_MAX_ATTEMPTS: &str = "AUDIODASH_RECONNECT_MAX_ATTEMPTS";
pub const ENV_MIXER_ROUTE: &str = "AUDIODASH_MIXER_ROUTE";
pub const ENV_HTTP_BASE: &str = "AUDIODASH_HTTP_BASE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: invalid url {value:?}: {source}")]
    Url {
        var: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("{var}: expected a {expected}, got {value:?}")]
    Value {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("endpoint scheme must be ws or wss, got {0:?}")]
    Scheme(String),
}

/// Where mixer commits are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MixerRoute {
    /// `uart_command` over the WebSocket.
    #[default]
    Channel,
    /// `POST /update-dsp-mixer` on the device's web server.
    Http,
}

impl FromStr for MixerRoute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "channel" | "ws" => Ok(MixerRoute::Channel),
            "http" => Ok(MixerRoute::Http),
            other => Err(format!("unknown mixer route: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    pub endpoint: Url,
    pub reconnect: ReconnectPolicy,
    pub mixer_route: MixerRoute,
    pub http_base: Option<Url>,
    pub command_queue: usize,
}

impl DashboardConfig {
    /// Default settings against `endpoint`.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            reconnect: ReconnectPolicy::default(),
            mixer_route: MixerRoute::Channel,
            http_base: None,
            command_queue: DEFAULT_COMMAND_QUEUE,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Overlays the `AUDIODASH_*` variables onto the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let endpoint = match lookup(ENV_WS_URL) {
            Some(v) => parse_url(ENV_WS_URL, &v)?,
            None => parse_url("default endpoint", DEFAULT_ENDPOINT)?,
        };
        let mut cfg = Self::new(endpoint);
        if let Some(v) = lookup(ENV_RECONNECT_BASE_MS) {
            let ms: u64 = parse_value(ENV_RECONNECT_BASE_MS, &v, "millisecond count")?;
            cfg.reconnect.base_delay = Duration::from_millis(ms);
        }
        if let Some(v) = lookup(ENV_RECONNECT_MAX_ATTEMPTS) {
            cfg.reconnect.max_attempts =
                parse_value(ENV_RECONNECT_MAX_ATTEMPTS, &v, "non-negative integer")?;
        }
        if let Some(v) = lookup(ENV_MIXER_ROUTE) {
            cfg.mixer_route = parse_value(ENV_MIXER_ROUTE, &v, "`channel` or `http`")?;
        }
        if let Some(v) = lookup(ENV_HTTP_BASE) {
            cfg.http_base = Some(parse_url(ENV_HTTP_BASE, &v)?);
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.endpoint.scheme() {
            "ws" | "wss" => {}
            other => return Err(ConfigError::Scheme(other.to_string())),
        }
        Ok(())
    }

    /// Explicit HTTP base, or the WebSocket endpoint's host over http.
    pub fn mixer_http_base(&self) -> Result<Url, ConfigError> {
        match &self.http_base {
            Some(base) => Ok(base.clone()),
            None => self.derived_http_base(),
        }
    }

    fn derived_http_base(&self) -> Result<Url, ConfigError> {
        let scheme = match self.endpoint.scheme() {
            "ws" => "http",
            "wss" => "https",
            other => return Err(ConfigError::Scheme(other.to_string())),
        };
        let mut base = self.endpoint.clone();
        base.set_scheme(scheme)
            .map_err(|()| ConfigError::Scheme(self.endpoint.scheme().to_string()))?;
        base.set_path("/");
        base.set_query(None);
        Ok(base)
    }
}

pub fn parse_url(var: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|source| ConfigError::Url {
        var,
        value: value.to_string(),
        source,
    })
}

fn parse_value<T: FromStr>(
    var: &'static str,
    value: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Value {
        var,
        value: value.to_string(),
        expected,
    })
}
