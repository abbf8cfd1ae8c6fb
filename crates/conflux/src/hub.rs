use std::sync::Arc;

use conflux_core::{ConnectionError, Dispatcher, Registry, SessionConnector};
use conflux_sandbox::ScriptEngine;
use futures::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::builtins::{self, BuiltinResponse};
use crate::config::HubConfig;
use crate::error::{HubError, Result};

/// Registry, dispatcher and script engine wired together from one
/// [`HubConfig`].
#[derive(Debug)]
pub struct Hub {
    config: HubConfig,
    registry: Registry,
    dispatcher: Arc<Dispatcher>,
    engine: ScriptEngine,
}

impl Hub {
    pub fn new(config: HubConfig, connector: Arc<dyn SessionConnector>) -> Result<Self> {
        config.settings.validate()?;

        let registry = Registry::new(connector, config.settings.registry_settings());
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            config.settings.dispatcher_config(),
        ));
        let engine = ScriptEngine::new(dispatcher.clone(), config.settings.engine_config());

        Ok(Self {
            config,
            registry,
            dispatcher,
            engine,
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn engine(&self) -> &ScriptEngine {
        &self.engine
    }

    /// Connects every enabled server concurrently.
    ///
    /// A failing `required` server aborts startup and disconnects whatever
    /// did connect. Optional failures are logged and left to retry in the
    /// background.
    pub async fn start(&self) -> Result<()> {
        let servers: Vec<_> = self.config.enabled_servers().collect();
        info!(servers = servers.len(), "Starting hub");

        let attempts = join_all(servers.iter().map(|(id, server)| async move {
            (*id, *server, self.registry.connect_to_server(id, server).await)
        }))
        .await;

        let mut required_failure: Option<(String, ConnectionError)> = None;
        for (id, server, outcome) in attempts {
            let Err(e) = outcome else {
                continue;
            };
            if server.required {
                error!(server_id = %id, error = %e, "Required MCP server failed to connect");
                if required_failure.is_none() {
                    required_failure = Some((id.clone(), e));
                }
                continue;
            }

            warn!(server_id = %id, error = %e, "Optional MCP server failed to connect");
            if let Err(e) = self.registry.register_offline(id, server).await {
                warn!(server_id = %id, error = %e, "MCP server will not be retried");
            }
        }

        if let Some((server_id, source)) = required_failure {
            if let Err(e) = self.registry.disconnect_all().await {
                warn!(error = %e, "Errors while unwinding failed startup");
            }
            return Err(HubError::RequiredServer { server_id, source });
        }

        info!(
            connected = self.registry.list_clients().await.len(),
            "Hub started"
        );
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down hub");
        self.registry.disconnect_all().await?;
        Ok(())
    }

    /// Runs one of the built-in tools by name.
    pub async fn call_builtin(
        &self,
        name: &str,
        args: Value,
        cancel: &CancellationToken,
    ) -> Result<BuiltinResponse> {
        match name {
            builtins::EXECUTE => builtins::execute(&self.engine, args, cancel).await,
            builtins::LIST => builtins::list(&self.registry, args).await,
            builtins::REFRESH_TOOLS => builtins::refresh_tools(&self.registry, args, cancel).await,
            builtins::INSPECT => builtins::inspect(&self.registry).await,
            other => Err(HubError::UnknownBuiltin(other.to_string())),
        }
    }
}
