use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use conflux_core::{AllowList, DispatcherConfig, RegistrySettings, ServerConfig};
use conflux_sandbox::EngineConfig;
use serde::{Deserialize, Serialize};

use crate::error::{HubError, Result};

/// The hub's configuration document. Reading it from disk is the caller's
/// job; this only parses and validates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, ServerConfig>,
    #[serde(default)]
    pub settings: HubSettings,
}

impl HubConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: HubConfig = serde_json::from_str(json)?;
        config.settings.validate()?;
        Ok(config)
    }

    /// Enabled servers in id order.
    pub fn enabled_servers(&self) -> impl Iterator<Item = (&String, &ServerConfig)> {
        self.mcp_servers.iter().filter(|(_, server)| server.enable)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    pub connect_timeout_ms: u64,
    pub discovery_timeout_ms: u64,
    pub close_timeout_ms: u64,
    pub call_timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_factor: f64,
    pub execution_timeout_ms: u64,
    /// Server id → tool names scripts may call. Absent means everything.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<BTreeMap<String, Vec<String>>>,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 60_000,
            discovery_timeout_ms: 60_000,
            close_timeout_ms: 5_000,
            call_timeout_ms: 60_000,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            backoff_factor: 2.0,
            execution_timeout_ms: 15_000,
            allowed_tools: None,
        }
    }
}

impl HubSettings {
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("connectTimeoutMs", self.connect_timeout_ms),
            ("discoveryTimeoutMs", self.discovery_timeout_ms),
            ("closeTimeoutMs", self.close_timeout_ms),
            ("callTimeoutMs", self.call_timeout_ms),
            ("initialBackoffMs", self.initial_backoff_ms),
            ("executionTimeoutMs", self.execution_timeout_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
            return Err(HubError::Settings(format!("{name} must be greater than zero")));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(HubError::Settings(
                "maxBackoffMs must not be smaller than initialBackoffMs".to_string(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(HubError::Settings(
                "backoffFactor must be a finite number of at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            discovery_timeout: Duration::from_millis(self.discovery_timeout_ms),
            close_timeout: Duration::from_millis(self.close_timeout_ms),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_factor: self.backoff_factor,
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            allowed_tools: self.allowed_tools.as_ref().map(|allowed| {
                allowed
                    .iter()
                    .map(|(server, tools)| {
                        (server.clone(), tools.iter().cloned().collect::<HashSet<_>>())
                    })
                    .collect::<AllowList>()
            }),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            timeout: Duration::from_millis(self.execution_timeout_ms),
            ..EngineConfig::default()
        }
    }
}
