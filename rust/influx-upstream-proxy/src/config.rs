use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{
    net::{SocketAddr, ToSocketAddrs},
    time::Duration,
};
use tracing::level_filters::LevelFilter;
use url::Url;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub upstream: Url,
    pub log_level: String,
    pub shutdown_timeout: Duration,
    pub shutdown_delay: Duration,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_port")]
    iup_port: u16,
    #[serde(default)]
    iup_listen_host: Option<String>,
    #[serde(default = "default_upstream")]
    iup_upstream: String,
    #[serde(default = "default_log_level")]
    iup_log_level: String,
    #[serde(default = "default_shutdown_timeout_secs")]
    iup_shutdown_timeout_secs: u64,
    #[serde(default = "default_shutdown_delay_secs")]
    iup_shutdown_delay_secs: u64,
}

const fn default_port() -> u16 {
    8888
}

fn default_upstream() -> String {
    "http://localhost:8428".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_shutdown_timeout_secs() -> u64 {
    10
}

const fn default_shutdown_delay_secs() -> u64 {
    2
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let raw: RawConfig =
            envy::from_env().context("failed to parse IUP_* environment variables")?;
        Self::from_raw(raw)
    }

    /// Loads the configuration from explicit key/value pairs instead of the process environment.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let raw: RawConfig =
            envy::from_iter(vars).context("failed to parse IUP_* configuration values")?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let listen_addr = resolve_addr(raw.iup_listen_host, raw.iup_port)?;
        let upstream = parse_upstream(&raw.iup_upstream)?;

        let log_level = raw.iup_log_level.trim().to_lowercase();
        log_level
            .parse::<LevelFilter>()
            .with_context(|| format!("invalid IUP_LOG_LEVEL value '{}'", raw.iup_log_level))?;

        Ok(Self {
            listen_addr,
            upstream,
            log_level,
            shutdown_timeout: Duration::from_secs(raw.iup_shutdown_timeout_secs),
            shutdown_delay: Duration::from_secs(raw.iup_shutdown_delay_secs),
        })
    }
}

fn parse_upstream(raw: &str) -> Result<Url> {
    let upstream =
        Url::parse(raw.trim()).with_context(|| format!("invalid IUP_UPSTREAM value '{raw}'"))?;

    match upstream.scheme() {
        "http" | "https" => {}
        other => bail!("IUP_UPSTREAM must use http or https, got '{other}'"),
    }
    if upstream.host_str().is_none() {
        bail!("IUP_UPSTREAM must include a host");
    }

    Ok(upstream)
}

fn resolve_addr(host: Option<String>, port: u16) -> Result<SocketAddr> {
    let host = host.unwrap_or_else(|| "0.0.0.0".to_string());
    let combined = format!("{}:{}", host, port);
    combined
        .to_socket_addrs()
        .context("invalid IUP listen host/port combination")?
        .next()
        .context("listen address resolved to no targets")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_without_variables() {
        let config = AppConfig::from_vars(Vec::new()).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8888".parse().unwrap());
        assert_eq!(config.upstream.as_str(), "http://localhost:8428/");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(config.shutdown_delay, Duration::from_secs(2));
    }

    #[test]
    fn reads_prefixed_variables() {
        let config = AppConfig::from_vars(vars(&[
            ("IUP_PORT", "9090"),
            ("IUP_LISTEN_HOST", "127.0.0.1"),
            ("IUP_UPSTREAM", "https://vm.internal:8481/select/0/prometheus"),
            ("IUP_LOG_LEVEL", "DEBUG"),
            ("IUP_SHUTDOWN_TIMEOUT_SECS", "3"),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:9090".parse().unwrap());
        assert_eq!(config.upstream.path(), "/select/0/prometheus");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
    }

    #[test]
    fn rejects_non_http_upstream() {
        let err = AppConfig::from_vars(vars(&[("IUP_UPSTREAM", "ftp://example.com")]))
            .unwrap_err();
        assert!(err.to_string().contains("http or https"), "{err}");
    }

    #[test]
    fn rejects_unparseable_upstream() {
        assert!(AppConfig::from_vars(vars(&[("IUP_UPSTREAM", "not a url")])).is_err());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let err = AppConfig::from_vars(vars(&[("IUP_LOG_LEVEL", "chatty")])).unwrap_err();
        assert!(err.to_string().contains("IUP_LOG_LEVEL"), "{err}");
    }

    #[test]
    fn rejects_non_numeric_port() {
        assert!(AppConfig::from_vars(vars(&[("IUP_PORT", "eighty")])).is_err());
    }
}
