//! Operator Configuration
//!
//! Loaded once at startup from an optional TOML file layered under
//! `MIRAGE_*` environment variables, then validated. Read-only afterwards.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::persona::{self, Persona};

/// Prefix for environment overrides (`MIRAGE_PORT=2022`)
pub const ENV_PREFIX: &str = "MIRAGE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("unknown persona '{name}' (available: {available})")]
    UnknownPersona { name: String, available: String },
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Honeypot settings; every field has a default
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HoneypotConfig {
    pub listen_addr: IpAddr,
    pub port: u16,
    /// Concurrent session cap; connections beyond it are rejected
    pub max_sessions: usize,
    pub idle_timeout_secs: u64,
    /// Persona registry key
    pub persona: String,
    /// Artificial latency before each command reply
    pub command_delay_ms: u64,
    /// Record sessions from loopback peers
    pub log_localhost: bool,
    pub shutdown_grace_secs: u64,
    /// Fixed RNG seed for reproducible output
    pub rng_seed: Option<u64>,
    pub threat_intel: bool,
    pub intel_timeout_ms: u64,
    pub show_motd: bool,
}

impl Default for HoneypotConfig {
    fn default() -> Self {
        Self {
            listen_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 2222,
            max_sessions: 50,
            idle_timeout_secs: 300,
            persona: String::from("raspberry-pi"),
            command_delay_ms: 50,
            log_localhost: false,
            shutdown_grace_secs: 5,
            rng_seed: None,
            threat_intel: true,
            intel_timeout_ms: 2000,
            show_motd: true,
        }
    }
}

impl HoneypotConfig {
    /// Load from `path` (if given) and the environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Self = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolve_persona()?;
        if self.max_sessions == 0 {
            return Err(ConfigError::Zero { field: "max_sessions" });
        }
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Zero { field: "idle_timeout_secs" });
        }
        Ok(())
    }

    pub fn resolve_persona(&self) -> Result<&'static Persona, ConfigError> {
        persona::find(&self.persona).ok_or_else(|| ConfigError::UnknownPersona {
            name: self.persona.clone(),
            available: persona::names().collect::<Vec<_>>().join(", "),
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_addr, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn intel_timeout(&self) -> Duration {
        Duration::from_millis(self.intel_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HoneypotConfig::default();
        assert_eq!(config.port, 2222);
        assert_eq!(config.max_sessions, 50);
        assert_eq!(config.idle_timeout(), Duration::from_secs(300));
        assert_eq!(config.persona, "raspberry-pi");
        assert_eq!(config.command_delay(), Duration::from_millis(50));
        assert!(!config.log_localhost);
        assert_eq!(config.rng_seed, None);
        assert_eq!(config.bind_addr().to_string(), "0.0.0.0:2222");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = HoneypotConfig::from_toml_str(
            "port = 2022\npersona = \"ubuntu-server\"\nrng_seed = 42\n",
        )
        .unwrap();
        assert_eq!(config.port, 2022);
        assert_eq!(config.persona, "ubuntu-server");
        assert_eq!(config.rng_seed, Some(42));
        assert_eq!(config.max_sessions, 50);
        assert!(config.show_motd);
    }

    #[test]
    fn test_unknown_persona_rejected() {
        let err = HoneypotConfig::from_toml_str("persona = \"toaster\"").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPersona { .. }));
        assert!(err.to_string().contains("raspberry-pi"));
    }

    #[test]
    fn test_zero_cap_rejected() {
        let err = HoneypotConfig::from_toml_str("max_sessions = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Zero { field: "max_sessions" }));
    }
}
