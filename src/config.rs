//! # config — read agent configuration from environment variables
//!
//! Everything here is resolved once at startup and shared as
//! `Arc<AgentConfig>`.  A bad value is fatal *before* the loop begins; after
//! that the config never changes.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Serialize;

/// Sentinel bridge URL that swaps the HTTP bridge for the in-memory chain.
pub const MOCK_BRIDGE: &str = "mock";

#[derive(Debug, Clone, Serialize)]
pub struct AgentConfig {
    /// Start-to-start distance between two ticks.
    #[serde(serialize_with = "as_millis")]
    pub tick_interval:           Duration,
    /// Minimum recommendation confidence (0–100) before the agent acts.
    pub min_confidence:          u8,
    /// Worker slots shared by scheduled and on-demand analyses.
    pub max_concurrent_analyses: usize,
    /// `true` = submit strategy changes, `false` = recommend only.
    pub auto_execute:            bool,
    /// A position is re-analysed once its last analysis is older than this.
    pub max_analysis_age_secs:   u64,
    /// Upper bound for any single chain bridge call.
    #[serde(serialize_with = "as_millis")]
    pub call_timeout:            Duration,
    /// Start the control loop right after boot.
    pub autostart:               bool,
    /// Base URL of the chain bridge, or `"mock"`.
    pub bridge_url:              String,
    pub bind_addr:               SocketAddr,
    /// `None` = dev mode, every request allowed.
    #[serde(skip)]
    pub api_key:                 Option<String>,
}

impl AgentConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup — `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let tick_ms: u64 = parse_or(&lookup, "AGENT_TICK_INTERVAL_MS", 60_000)?;
        let min_confidence: u8 = parse_or(&lookup, "AGENT_MIN_CONFIDENCE", 70)?;
        let max_concurrent: usize = parse_or(&lookup, "AGENT_MAX_CONCURRENT", 3)?;
        let timeout_ms: u64 = parse_or(&lookup, "AGENT_CALL_TIMEOUT_MS", 10_000)?;

        let config = Self {
            tick_interval:           Duration::from_millis(tick_ms),
            min_confidence,
            max_concurrent_analyses: max_concurrent,
            auto_execute:            flag_or(&lookup, "AGENT_AUTO_EXECUTE", false)?,
            max_analysis_age_secs:   parse_or(&lookup, "AGENT_MAX_ANALYSIS_AGE_SECS", 3_600)?,
            call_timeout:            Duration::from_millis(timeout_ms),
            autostart:               flag_or(&lookup, "AGENT_AUTOSTART", true)?,
            bridge_url:              lookup("CHAIN_BRIDGE_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| MOCK_BRIDGE.to_string()),
            bind_addr:               parse_or(&lookup, "BIND_ADDR", default_bind_addr())?,
            api_key:                 lookup("API_KEY")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Range checks that `parse` alone cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval.is_zero() {
            bail!("AGENT_TICK_INTERVAL_MS must be greater than 0");
        }
        if self.min_confidence > 100 {
            bail!("AGENT_MIN_CONFIDENCE must be within 0..=100, got {}", self.min_confidence);
        }
        if self.max_concurrent_analyses == 0 {
            bail!("AGENT_MAX_CONCURRENT must be at least 1");
        }
        if self.call_timeout.is_zero() {
            bail!("AGENT_CALL_TIMEOUT_MS must be greater than 0");
        }
        Ok(())
    }

    pub fn is_mock(&self) -> bool {
        self.bridge_url == MOCK_BRIDGE
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            tick_interval:           Duration::from_secs(60),
            min_confidence:          70,
            max_concurrent_analyses: 3,
            auto_execute:            false,
            max_analysis_age_secs:   3_600,
            call_timeout:            Duration::from_secs(10),
            autostart:               true,
            bridge_url:              MOCK_BRIDGE.to_string(),
            bind_addr:               default_bind_addr(),
            api_key:                 None,
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}

fn flag_or<F>(lookup: &F, key: &str, default: bool) -> anyhow::Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on"  => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => bail!("{key} must be a boolean, got '{other}'"),
        },
    }
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
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
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.tick_interval, Duration::from_secs(60));
        assert_eq!(config.min_confidence, 70);
        assert_eq!(config.max_concurrent_analyses, 3);
        assert!(!config.auto_execute);
        assert!(config.is_mock());
        assert_eq!(config.bind_addr.port(), 3000);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("AGENT_TICK_INTERVAL_MS", "1500"),
            ("AGENT_AUTO_EXECUTE", "true"),
            ("CHAIN_BRIDGE_URL", "http://bridge:8080"),
            ("BIND_ADDR", "127.0.0.1:8088"),
            ("API_KEY", " secret "),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8088".parse().unwrap());
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.tick_interval, Duration::from_millis(1500));
        assert!(config.auto_execute);
        assert!(!config.is_mock());
    }

    #[test]
    fn test_api_key_never_serialized() {
        let config = AgentConfig::from_lookup(lookup(&[("API_KEY", "secret")])).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"bind_addr\":\"0.0.0.0:3000\""));
    }

    #[test]
    fn test_invalid_values_are_fatal() {
        assert!(AgentConfig::from_lookup(lookup(&[("AGENT_TICK_INTERVAL_MS", "0")])).is_err());
        assert!(AgentConfig::from_lookup(lookup(&[("AGENT_TICK_INTERVAL_MS", "soon")])).is_err());
        assert!(AgentConfig::from_lookup(lookup(&[("AGENT_MIN_CONFIDENCE", "101")])).is_err());
        assert!(AgentConfig::from_lookup(lookup(&[("AGENT_MAX_CONCURRENT", "0")])).is_err());
        assert!(AgentConfig::from_lookup(lookup(&[("AGENT_AUTO_EXECUTE", "maybe")])).is_err());
        assert!(AgentConfig::from_lookup(lookup(&[("BIND_ADDR", "localhost")])).is_err());
    }
}
