//! Connection registry.
//!
//! One [`ServerConnection`] per backend id, each watched by a supervisor task
//! that reconnects with exponential backoff when the session dies. The map
//! lock only guards membership; per-connection state has its own lock and no
//! lock is ever held across session I/O.

mod backoff;
mod connection;
mod supervisor;


use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{McpTransport, RegistrySettings, ServerConfig};
use crate::error::{ConnectionError, Result};
use crate::session::{RemoteSession, SessionConnector, ToolSchema};

pub use backoff::Backoff;
pub use connection::{ConnectionStatus, ToolSnapshot};

use connection::{ServerConnection, snapshot};
use supervisor::Supervisor;

/// Thread-safe registry of backend connections. Cloning is cheap and shares
/// the same underlying state.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
    connections: RwLock<HashMap<String, Arc<ServerConnection>>>,
    root: CancellationToken,
    connector: Arc<dyn SessionConnector>,
    settings: RegistrySettings,
    generation: AtomicU64,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("settings", &self.inner.settings)
            .field("shutting_down", &self.inner.root.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl RegistryInner {
    async fn lookup(&self, id: &str) -> Option<Arc<ServerConnection>> {
        self.connections.read().await.get(id).cloned()
    }

    /// The record for `id`, but only while it is still the one a supervisor
    /// of `generation` was spawned for.
    pub(crate) async fn lookup_generation(
        &self,
        id: &str,
        generation: u64,
    ) -> Option<Arc<ServerConnection>> {
        self.lookup(id)
            .await
            .filter(|connection| connection.generation == generation)
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Connects and discovers tools, closing the session again if discovery
    /// does not succeed.
    pub(crate) async fn establish(
        &self,
        id: &str,
        transport: &McpTransport,
    ) -> Result<(Arc<dyn RemoteSession>, ToolSnapshot)> {
        debug!(server_id = %id, transport = transport.kind(), "Connecting to MCP server");

        let session = match timeout(
            self.settings.connect_timeout,
            self.connector.connect(id, transport),
        )
        .await
        {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return Err(ConnectionError::connect_failed(id, e.to_string())),
            Err(_) => {
                return Err(ConnectionError::ConnectTimeout {
                    server_id: id.to_string(),
                });
            }
        };

        let discovered = timeout(self.settings.discovery_timeout, session.list_tools()).await;
        match discovered {
            Ok(Ok(tools)) => {
                debug!(server_id = %id, tool_count = tools.len(), "Discovered tools");
                Ok((session, snapshot(tools)))
            }
            Ok(Err(e)) => {
                self.close_quietly(id, session.as_ref()).await;
                Err(ConnectionError::ListToolsFailed {
                    server_id: id.to_string(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                self.close_quietly(id, session.as_ref()).await;
                Err(ConnectionError::ListToolsTimeout {
                    server_id: id.to_string(),
                })
            }
        }
    }

    pub(crate) async fn close_quietly(&self, id: &str, session: &dyn RemoteSession) {
        match timeout(self.settings.close_timeout, session.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(server_id = %id, error = %e, "Error closing MCP session"),
            Err(_) => warn!(
                server_id = %id,
                timeout = ?self.settings.close_timeout,
                "Timed out closing MCP session"
            ),
        }
    }
}

impl Registry {
    pub fn new(connector: Arc<dyn SessionConnector>, settings: RegistrySettings) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connections: RwLock::new(HashMap::new()),
                root: CancellationToken::new(),
                connector,
                settings,
                generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.inner.settings
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.root.is_cancelled()
    }

    /// Connects to a backend, discovers its tools and starts supervising it.
    ///
    /// Idempotent while the backend has a live session. A record without a
    /// session is replaced, stopping its supervisor first.
    pub async fn connect_to_server(&self, id: &str, config: &ServerConfig) -> Result<()> {
        if self.is_shutting_down() {
            return Err(ConnectionError::ShuttingDown);
        }

        let transport = config.resolve_transport(id)?;

        if let Some(existing) = self.inner.lookup(id).await
            && existing.live_session().await.is_some()
        {
            debug!(server_id = %id, "Already connected");
            return Ok(());
        }

        let (session, tools) = self.inner.establish(id, &transport).await?;
        let tool_count = tools.len();

        let connection = Arc::new(self.new_record(id, config));
        connection.mark_connected(session.clone(), tools).await;

        let installed = {
            let mut connections = self.inner.connections.write().await;
            if self.is_shutting_down() {
                Err(ConnectionError::ShuttingDown)
            } else {
                let current = connections.get(id).cloned();
                let current_live = match &current {
                    Some(current) => current.live_session().await.is_some(),
                    None => false,
                };
                if current_live {
                    Ok(false)
                } else {
                    if let Some(previous) = current {
                        previous.cancel.cancel();
                    }
                    connections.insert(id.to_string(), connection.clone());
                    Ok(true)
                }
            }
        };

        match installed {
            Ok(true) => {
                info!(server_id = %id, tool_count, "Connected to MCP server");
                self.spawn_supervisor(&connection, Some(session));
                Ok(())
            }
            Ok(false) => {
                debug!(server_id = %id, "Lost connect race, closing duplicate session");
                self.inner.close_quietly(id, session.as_ref()).await;
                Ok(())
            }
            Err(e) => {
                self.inner.close_quietly(id, session.as_ref()).await;
                Err(e)
            }
        }
    }

    /// Stores a backend that could not be reached yet. Its supervisor starts
    /// straight in the reconnect loop.
    pub async fn register_offline(&self, id: &str, config: &ServerConfig) -> Result<()> {
        if self.is_shutting_down() {
            return Err(ConnectionError::ShuttingDown);
        }
        config.resolve_transport(id)?;

        let connection = Arc::new(self.new_record(id, config));
        connection.state.write().await.reconnecting = true;

        {
            let mut connections = self.inner.connections.write().await;
            if let Some(current) = connections.get(id) {
                if current.live_session().await.is_some() {
                    return Ok(());
                }
                current.cancel.cancel();
            }
            connections.insert(id.to_string(), connection.clone());
        }

        info!(server_id = %id, "Registered offline MCP server, retrying in background");
        self.spawn_supervisor(&connection, None);
        Ok(())
    }

    fn new_record(&self, id: &str, config: &ServerConfig) -> ServerConnection {
        ServerConnection::new(
            id.to_string(),
            config.clone(),
            self.inner.next_generation(),
            self.inner.root.child_token(),
            Backoff::from_settings(&self.inner.settings),
        )
    }

    fn spawn_supervisor(
        &self,
        connection: &ServerConnection,
        session: Option<Arc<dyn RemoteSession>>,
    ) {
        let supervisor = Supervisor::new(
            Arc::downgrade(&self.inner),
            connection.id.clone(),
            connection.generation,
            connection.cancel.clone(),
        );
        tokio::spawn(supervisor.run(session));
    }

    /// Stops every supervisor and closes every session concurrently, each
    /// under the close timeout. All failures are reported together.
    pub async fn disconnect_all(&self) -> Result<()> {
        self.inner.root.cancel();

        let drained: Vec<Arc<ServerConnection>> = self
            .inner
            .connections
            .write()
            .await
            .drain()
            .map(|(_, connection)| connection)
            .collect();

        info!(count = drained.len(), "Disconnecting all MCP servers");

        let close_timeout = self.inner.settings.close_timeout;
        let closes = drained.into_iter().map(|connection| async move {
            connection.cancel.cancel();
            let session = connection.state.write().await.session.take()?;
            match timeout(close_timeout, session.close()).await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(ConnectionError::CloseFailed {
                    server_id: connection.id.clone(),
                    message: e.to_string(),
                }),
                Err(_) => Some(ConnectionError::CloseTimeout {
                    server_id: connection.id.clone(),
                }),
            }
        });

        let errors: Vec<ConnectionError> = join_all(closes).await.into_iter().flatten().collect();
        if errors.is_empty() {
            Ok(())
        } else {
            warn!(error_count = errors.len(), "Errors while disconnecting MCP servers");
            Err(ConnectionError::Disconnect(errors))
        }
    }

    pub async fn get_client(&self, id: &str) -> Result<Arc<dyn RemoteSession>> {
        let connection = self
            .inner
            .lookup(id)
            .await
            .ok_or_else(|| ConnectionError::NotFound(id.to_string()))?;
        connection
            .live_session()
            .await
            .ok_or_else(|| ConnectionError::NotConnected(id.to_string()))
    }

    /// Every registered backend id, sorted.
    pub async fn list_clients(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.connections.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn get_tools(&self, id: &str) -> Result<BTreeMap<String, ToolSchema>> {
        let connection = self
            .inner
            .lookup(id)
            .await
            .ok_or_else(|| ConnectionError::NotFound(id.to_string()))?;
        let tools = connection.state.read().await.tools.clone();
        Ok((*tools).clone())
    }

    /// Every tool of every backend, keyed `serverId.toolName`.
    pub async fn get_all_tools(&self) -> BTreeMap<String, ToolSchema> {
        let mut all = BTreeMap::new();
        for (id, tools) in self.snapshots().await {
            for (name, schema) in tools.iter() {
                all.insert(format!("{id}.{name}"), schema.clone());
            }
        }
        all
    }

    /// Tool names advertised by two or more backends, with their sorted owners.
    pub async fn detect_name_collisions(&self) -> BTreeMap<String, Vec<String>> {
        let mut owners: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (id, tools) in self.snapshots().await {
            for name in tools.keys() {
                owners.entry(name.clone()).or_default().push(id.clone());
            }
        }
        owners.retain(|_, ids| ids.len() > 1);
        for ids in owners.values_mut() {
            ids.sort();
        }
        owners
    }

    /// Re-runs discovery for one backend and swaps in the new snapshot.
    pub async fn refresh_tools(&self, id: &str) -> Result<usize> {
        let connection = self
            .inner
            .lookup(id)
            .await
            .ok_or_else(|| ConnectionError::NotFound(id.to_string()))?;
        let session = connection
            .live_session()
            .await
            .ok_or_else(|| ConnectionError::NotConnected(id.to_string()))?;

        let tools = match timeout(self.inner.settings.discovery_timeout, session.list_tools()).await
        {
            Ok(Ok(tools)) => snapshot(tools),
            Ok(Err(e)) => {
                return Err(ConnectionError::ListToolsFailed {
                    server_id: id.to_string(),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                return Err(ConnectionError::ListToolsTimeout {
                    server_id: id.to_string(),
                });
            }
        };

        let count = tools.len();
        let mut state = connection.state.write().await;
        if state
            .session
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &session))
        {
            state.tools = tools;
        }
        drop(state);

        info!(server_id = %id, tool_count = count, "Refreshed tools");
        Ok(count)
    }

    /// Connection health of every backend, sorted by id.
    pub async fn statuses(&self) -> Vec<ConnectionStatus> {
        let connections: Vec<Arc<ServerConnection>> =
            self.inner.connections.read().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(connections.len());
        for connection in connections {
            statuses.push(connection.status().await);
        }
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    async fn snapshots(&self) -> Vec<(String, ToolSnapshot)> {
        let connections: Vec<Arc<ServerConnection>> =
            self.inner.connections.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(connections.len());
        for connection in connections {
            let tools = connection.state.read().await.tools.clone();
            snapshots.push((connection.id.clone(), tools));
        }
        snapshots
    }
}
