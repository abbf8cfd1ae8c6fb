use std::sync::{Arc, Weak};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::RegistryInner;
use super::connection::ServerConnection;
use crate::session::RemoteSession;

/// Watches one connection record and reconnects it when its session dies.
///
/// Holds only a weak handle on the registry; it exits when its token is
/// cancelled, when the registry is gone, or when its record has been replaced
/// by a newer generation.
pub(crate) struct Supervisor {
    registry: Weak<RegistryInner>,
    server_id: String,
    generation: u64,
    cancel: CancellationToken,
}

impl Supervisor {
    pub(crate) fn new(
        registry: Weak<RegistryInner>,
        server_id: String,
        generation: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            server_id,
            generation,
            cancel,
        }
    }

    pub(crate) async fn run(self, mut session: Option<Arc<dyn RemoteSession>>) {
        debug!(server_id = %self.server_id, generation = self.generation, "Supervisor started");

        loop {
            if let Some(current) = session.take()
                && !self.watch(current).await
            {
                break;
            }

            match self.reconnect().await {
                Some(fresh) => session = Some(fresh),
                None => break,
            }
        }

        debug!(server_id = %self.server_id, generation = self.generation, "Supervisor stopped");
    }

    async fn connection(&self) -> Option<Arc<ServerConnection>> {
        let registry = self.registry.upgrade()?;
        registry
            .lookup_generation(&self.server_id, self.generation)
            .await
    }

    /// Blocks until `session` terminates. Returns `false` when supervision
    /// should stop instead of reconnecting.
    async fn watch(&self, session: Arc<dyn RemoteSession>) -> bool {
        let outcome = tokio::select! {
            () = self.cancel.cancelled() => return false,
            outcome = session.wait_for_termination() => outcome,
        };
        if self.cancel.is_cancelled() {
            return false;
        }

        match outcome {
            Ok(()) => info!(server_id = %self.server_id, "MCP session closed"),
            Err(e) => warn!(server_id = %self.server_id, error = %e, "MCP session terminated"),
        }

        let Some(connection) = self.connection().await else {
            return false;
        };
        let mut state = connection.state.write().await;
        if state
            .session
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &session))
        {
            state.session = None;
        }
        state.reconnecting = true;
        true
    }

    /// Retries until a new session is up, sleeping the current backoff before
    /// every attempt.
    async fn reconnect(&self) -> Option<Arc<dyn RemoteSession>> {
        loop {
            let delay = {
                let connection = self.connection().await?;
                connection.state.read().await.backoff.current()
            };

            tokio::select! {
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }

            let registry = self.registry.upgrade()?;
            let connection = registry
                .lookup_generation(&self.server_id, self.generation)
                .await?;

            let attempt = match connection.config.resolve_transport(&self.server_id) {
                Ok(transport) => {
                    tokio::select! {
                        () = self.cancel.cancelled() => return None,
                        attempt = registry.establish(&self.server_id, &transport) => attempt,
                    }
                }
                Err(e) => Err(e),
            };

            match attempt {
                Ok((session, tools)) => {
                    let tool_count = tools.len();
                    connection.mark_connected(session.clone(), tools).await;

                    if self.cancel.is_cancelled() {
                        connection.state.write().await.session = None;
                        registry.close_quietly(&self.server_id, session.as_ref()).await;
                        return None;
                    }

                    info!(server_id = %self.server_id, tool_count, "Reconnected to MCP server");
                    return Some(session);
                }
                Err(e) => {
                    let mut state = connection.state.write().await;
                    state.backoff.advance();
                    warn!(
                        server_id = %self.server_id,
                        error = %e,
                        next_attempt_in = ?state.backoff.current(),
                        "Reconnect attempt failed"
                    );
                }
            }
        }
    }
}
