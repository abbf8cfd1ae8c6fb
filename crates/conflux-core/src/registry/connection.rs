use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;
use crate::config::ServerConfig;
use crate::session::{RemoteSession, ToolSchema};

pub type ToolSnapshot = Arc<BTreeMap<String, ToolSchema>>;

/// The registry's record for one backend.
#[derive(Debug)]
pub(crate) struct ServerConnection {
    pub(crate) id: String,
    pub(crate) config: ServerConfig,
    pub(crate) generation: u64,
    pub(crate) cancel: CancellationToken,
    pub(crate) state: RwLock<ConnectionState>,
}

#[derive(Debug)]
pub(crate) struct ConnectionState {
    pub(crate) session: Option<Arc<dyn RemoteSession>>,
    pub(crate) tools: ToolSnapshot,
    pub(crate) reconnecting: bool,
    pub(crate) last_connected: Option<DateTime<Utc>>,
    pub(crate) backoff: Backoff,
}

impl ServerConnection {
    pub(crate) fn new(
        id: String,
        config: ServerConfig,
        generation: u64,
        cancel: CancellationToken,
        backoff: Backoff,
    ) -> Self {
        Self {
            id,
            config,
            generation,
            cancel,
            state: RwLock::new(ConnectionState {
                session: None,
                tools: Arc::new(BTreeMap::new()),
                reconnecting: false,
                last_connected: None,
                backoff,
            }),
        }
    }

    /// Installs a freshly discovered session and its tool snapshot.
    pub(crate) async fn mark_connected(
        &self,
        session: Arc<dyn RemoteSession>,
        tools: ToolSnapshot,
    ) {
        let mut state = self.state.write().await;
        state.session = Some(session);
        state.tools = tools;
        state.reconnecting = false;
        state.last_connected = Some(Utc::now());
        state.backoff.reset();
    }

    pub(crate) async fn live_session(&self) -> Option<Arc<dyn RemoteSession>> {
        self.state.read().await.session.clone()
    }

    pub(crate) async fn status(&self) -> ConnectionStatus {
        let state = self.state.read().await;
        ConnectionStatus {
            id: self.id.clone(),
            transport: self.config.transport_name().to_string(),
            connected: state.session.is_some(),
            reconnecting: state.reconnecting,
            last_connected: state.last_connected,
            backoff: state.backoff.current(),
            tool_count: state.tools.len(),
        }
    }
}

pub(crate) fn snapshot(tools: Vec<ToolSchema>) -> ToolSnapshot {
    Arc::new(
        tools
            .into_iter()
            .map(|tool| (tool.name.clone(), tool))
            .collect(),
    )
}

/// Read-only view of one backend's connection health.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub id: String,
    pub transport: String,
    pub connected: bool,
    pub reconnecting: bool,
    pub last_connected: Option<DateTime<Utc>>,
    #[serde(rename = "backoffMs", serialize_with = "serialize_millis")]
    pub backoff: Duration,
    pub tool_count: usize,
}

fn serialize_millis<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}
