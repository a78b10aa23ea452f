use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::{Result, VerifyError};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:5001";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// How the backend reports job progress. Chosen per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TransportMode {
    /// Queue the job, then poll `/status/{job_id}`.
    #[default]
    Poll,
    /// Keep the submission open and read progress from its body.
    Stream,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Poll => f.write_str("poll"),
            TransportMode::Stream => f.write_str("stream"),
        }
    }
}

impl FromStr for TransportMode {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "poll" | "polling" => Ok(TransportMode::Poll),
            "stream" | "streaming" => Ok(TransportMode::Stream),
            other => Err(VerifyError::Config(format!("unknown transport '{}'", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub transport: TransportMode,
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    /// Applies to every call except the long-lived verification stream.
    pub request_timeout: Duration,
    /// Give up on a running job after this long. Unlimited when `None`.
    pub max_duration: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_API_URL).expect("default API URL is valid"),
            transport: TransportMode::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_duration: None,
        }
    }
}

impl ClientConfig {
    /// Reads `VERIFY_*` variables, falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = ClientConfig::default();

        if let Some(url) = lookup("VERIFY_API_URL") {
            config.base_url = parse_base_url(&url)?;
        }
        if let Some(mode) = lookup("VERIFY_TRANSPORT") {
            config.transport = mode.parse()?;
        }
        if let Some(secs) = lookup("VERIFY_POLL_INTERVAL_SECS") {
            config.poll_interval = parse_secs("VERIFY_POLL_INTERVAL_SECS", &secs)?;
        }
        if let Some(secs) = lookup("VERIFY_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = parse_secs("VERIFY_CONNECT_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("VERIFY_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = parse_secs("VERIFY_REQUEST_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("VERIFY_MAX_DURATION_SECS") {
            config.max_duration = Some(parse_secs("VERIFY_MAX_DURATION_SECS", &secs)?);
        }

        config.check()?;
        Ok(config)
    }

    pub fn with_base_url(mut self, url: &str) -> Result<Self> {
        self.base_url = parse_base_url(url)?;
        Ok(self)
    }

    pub fn check(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(VerifyError::Config("poll interval must be positive".into()));
        }
        if matches!(self.max_duration, Some(d) if d.is_zero()) {
            return Err(VerifyError::Config("max duration must be positive".into()));
        }
        Ok(())
    }

    /// Resolves an endpoint path against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| VerifyError::Config(format!("bad endpoint '{}': {}", path, e)))
    }
}

/// Parses a base URL, making sure relative joins keep any path prefix.
fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url =
        Url::parse(raw.trim()).map_err(|e| VerifyError::Config(format!("bad API URL '{}': {}", raw, e)))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| VerifyError::Config(format!("{} must be a number of seconds, got '{}'", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_observed_backend() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.base_url.as_str(), "http://127.0.0.1:5001/");
        assert_eq!(config.transport, TransportMode::Poll);
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.max_duration, None);
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("VERIFY_API_URL", "https://verify.example.com/api"),
            ("VERIFY_TRANSPORT", "stream"),
            ("VERIFY_POLL_INTERVAL_SECS", "0.5"),
            ("VERIFY_MAX_DURATION_SECS", "600"),
        ]))
        .unwrap();
        assert_eq!(config.transport, TransportMode::Stream);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.max_duration, Some(Duration::from_secs(600)));
        assert_eq!(
            config.endpoint("/status/abc").unwrap().as_str(),
            "https://verify.example.com/api/status/abc"
        );
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let err = ClientConfig::from_lookup(lookup(&[("VERIFY_TRANSPORT", "carrier-pigeon")]))
            .unwrap_err();
        assert!(matches!(err, VerifyError::Config(_)));

        let err = ClientConfig::from_lookup(lookup(&[("VERIFY_POLL_INTERVAL_SECS", "0")]))
            .unwrap_err();
        assert_eq!(err, VerifyError::Config("poll interval must be positive".into()));

        let err = ClientConfig::from_lookup(lookup(&[("VERIFY_CONNECT_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("VERIFY_CONNECT_TIMEOUT_SECS"));
    }
}
