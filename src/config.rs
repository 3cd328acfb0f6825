// Agent configuration.
//
// Loaded from a TOML file; every key is optional and falls back to the
// defaults below. Interval keys are seconds and must be strictly positive.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AgentError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub sflow: SflowSection,
    pub agent: AgentSection,
    pub cache: CacheSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SflowSection {
    /// Address the sFlow agents bind on.
    pub bind_address: String,
    /// First UDP port of the allocation range.
    pub port_min: u16,
    /// Last UDP port of the allocation range, inclusive.
    pub port_max: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentSection {
    /// Seconds without updates before a flow expires.
    pub flowtable_expire: u64,
    /// Seconds between updated-flow deliveries.
    pub flowtable_update: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSection {
    /// Seconds a resolved probe path stays cached.
    pub expire: u64,
    /// Seconds between cache cleanup sweeps.
    pub cleanup: u64,
}

impl Default for SflowSection {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port_min: 6345,
            port_max: 6355,
        }
    }
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            flowtable_expire: 300,
            flowtable_update: 30,
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            expire: 300,
            cleanup: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sflow: SflowSection::default(),
            agent: AgentSection::default(),
            cache: CacheSection::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AgentError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AgentError::Config(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self, AgentError> {
        let config: Config =
            toml::from_str(content).map_err(|e| AgentError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        self.bind_address()?;
        if self.sflow.port_min == 0 || self.sflow.port_min > self.sflow.port_max {
            return Err(AgentError::Config(format!(
                "invalid sflow port range [{}, {}]",
                self.sflow.port_min, self.sflow.port_max
            )));
        }
        for (name, value) in [
            ("agent.flowtable_expire", self.agent.flowtable_expire),
            ("agent.flowtable_update", self.agent.flowtable_update),
            ("cache.expire", self.cache.expire),
            ("cache.cleanup", self.cache.cleanup),
        ] {
            if value == 0 {
                return Err(AgentError::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    pub fn bind_address(&self) -> Result<IpAddr, AgentError> {
        self.sflow.bind_address.parse().map_err(|_| {
            AgentError::Config(format!(
                "invalid sflow.bind_address {:?}",
                self.sflow.bind_address
            ))
        })
    }

    pub fn flowtable_expire(&self) -> Duration {
        Duration::from_secs(self.agent.flowtable_expire)
    }

    pub fn flowtable_update(&self) -> Duration {
        Duration::from_secs(self.agent.flowtable_update)
    }

    pub fn cache_expire(&self) -> Duration {
        Duration::from_secs(self.cache.expire)
    }

    pub fn cache_cleanup(&self) -> Duration {
        Duration::from_secs(self.cache.cleanup)
    }
}
