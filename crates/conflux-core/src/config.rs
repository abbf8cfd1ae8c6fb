use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConnectionError, Result};
use crate::session::restricted_env;

pub const DEFAULT_TRANSPORT: &str = "stdio";

/// How a single backend is reached, as written in the hub configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// `stdio`, `tcp` or `http`. Defaults to `stdio` when omitted.
    pub transport: Option<String>,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub url: Option<String>,
    pub enable: bool,
    pub required: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: None,
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            host: None,
            port: None,
            url: None,
            enable: true,
            required: false,
        }
    }
}

impl ServerConfig {
    pub fn stdio<C: Into<String>>(command: C, args: Vec<String>) -> Self {
        Self {
            transport: Some("stdio".to_string()),
            command: Some(command.into()),
            args,
            ..Self::default()
        }
    }

    pub fn tcp<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            transport: Some("tcp".to_string()),
            host: Some(host.into()),
            port: Some(port),
            ..Self::default()
        }
    }

    pub fn http<U: Into<String>>(url: U) -> Self {
        Self {
            transport: Some("http".to_string()),
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn with_env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enable = false;
        self
    }

    pub fn transport_name(&self) -> &str {
        self.transport.as_deref().unwrap_or(DEFAULT_TRANSPORT)
    }

    /// Turns the loose config shape into a concrete transport, filling in the
    /// restricted environment for stdio backends.
    pub fn resolve_transport(&self, server_id: &str) -> Result<McpTransport> {
        match self.transport_name() {
            "stdio" => {
                let command = self
                    .command
                    .as_deref()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| {
                        ConnectionError::invalid_config(server_id, "stdio transport requires a command")
                    })?;
                Ok(McpTransport::Stdio {
                    command: command.to_string(),
                    args: self.args.clone(),
                    env: restricted_env(|name| std::env::var(name).ok(), &self.env),
                })
            }
            "tcp" => {
                let host = self
                    .host
                    .as_deref()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| {
                        ConnectionError::invalid_config(server_id, "tcp transport requires a host")
                    })?;
                let port = self.port.ok_or_else(|| {
                    ConnectionError::invalid_config(server_id, "tcp transport requires a port")
                })?;
                Ok(McpTransport::Tcp {
                    host: host.to_string(),
                    port,
                })
            }
            "http" => {
                let url = self
                    .url
                    .as_deref()
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| {
                        ConnectionError::invalid_config(server_id, "http transport requires a url")
                    })?;
                Ok(McpTransport::Http {
                    url: url.to_string(),
                })
            }
            other => Err(ConnectionError::UnsupportedTransport {
                server_id: server_id.to_string(),
                transport: other.to_string(),
            }),
        }
    }
}

/// A resolved, ready-to-dial transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpTransport {
    Stdio {
        command: String,
        args: Vec<String>,
        /// The complete environment of the child process.
        env: BTreeMap<String, String>,
    },
    Tcp {
        host: String,
        port: u16,
    },
    Http {
        url: String,
    },
}

impl McpTransport {
    pub fn kind(&self) -> &'static str {
        match self {
            McpTransport::Stdio { .. } => "stdio",
            McpTransport::Tcp { .. } => "tcp",
            McpTransport::Http { .. } => "http",
        }
    }
}

/// Timeouts and backoff policy for the connection registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistrySettings {
    pub connect_timeout: Duration,
    pub discovery_timeout: Duration,
    pub close_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_factor: f64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(60),
            discovery_timeout: Duration::from_secs(60),
            close_timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn deserializes_camel_case_fields() {
        let config: ServerConfig = serde_json::from_value(serde_json::json!({
            "command": "npx",
            "args": ["-y", "@modelcontextprotocol/server-filesystem"],
            "env": { "ROOT": "/srv" }
        }))
        .unwrap();

        assert_eq!(config.transport_name(), "stdio");
        assert!(config.enable);
        assert!(!config.required);
        assert_eq!(config.env.get("ROOT").map(String::as_str), Some("/srv"));
    }

    #[test]
    fn stdio_transport_gets_restricted_env() {
        let config = ServerConfig::stdio("server-bin", vec![]).with_env("TOKEN", "t");
        let McpTransport::Stdio { env, .. } = config.resolve_transport("fs").unwrap() else {
            unreachable!("stdio config resolves to stdio transport");
        };

        assert_eq!(env.get("TOKEN").map(String::as_str), Some("t"));
        assert_eq!(env.get("PATH").map(String::as_str), Some(crate::session::SAFE_PATH));
    }

    #[rstest]
    #[case::missing_command(ServerConfig::default())]
    #[case::blank_command(ServerConfig::stdio("  ", vec![]))]
    #[case::tcp_without_port(ServerConfig { port: None, ..ServerConfig::tcp("localhost", 1) })]
    #[case::http_without_url(ServerConfig { url: None, ..ServerConfig::http("x") })]
    fn incomplete_configs_are_rejected(#[case] config: ServerConfig) {
        let err = config.resolve_transport("srv").unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidConfig { .. }), "{err:?}");
    }

    #[rstest]
    #[case("sse")]
    #[case("websocket")]
    #[case("")]
    fn unknown_transports_are_unsupported(#[case] transport: &str) {
        let config = ServerConfig {
            transport: Some(transport.to_string()),
            ..ServerConfig::stdio("bin", vec![])
        };
        let err = config.resolve_transport("srv").unwrap_err();
        assert_eq!(
            err,
            ConnectionError::UnsupportedTransport {
                server_id: "srv".to_string(),
                transport: transport.to_string(),
            }
        );
    }
}
