//! Test utilities for conflux-core
//!
//! An in-memory [`SessionConnector`] whose sessions can be told to fail
//! discovery, hang on close, or terminate on demand. Exposed behind the
//! `test-utils` feature so the sandbox and hub crates can reuse it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::config::McpTransport;
use crate::error::SessionError;
use crate::session::{JsonObject, RemoteSession, SessionConnector, ToolResponse, ToolSchema};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scriptable behaviour of one fake backend.
#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    pub tools: Vec<ToolSchema>,
    pub responses: HashMap<String, ToolResponse>,
    pub call_errors: HashMap<String, SessionError>,
    /// Number of upcoming connection attempts that fail.
    pub connect_failures: usize,
    pub fail_discovery: bool,
    pub discovery_delay: Option<Duration>,
    pub call_delay: Option<Duration>,
    pub hang_on_close: bool,
}

impl FakeBackend {
    pub fn with_tools<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tools: names.into_iter().map(ToolSchema::new).collect(),
            ..Self::default()
        }
    }

    pub fn respond<N: Into<String>>(mut self, tool: N, response: ToolResponse) -> Self {
        self.responses.insert(tool.into(), response);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Lifecycle {
    Running,
    Closed,
    Terminated(String),
}

#[derive(Debug, Default)]
struct BackendSlot {
    behaviour: Arc<Mutex<FakeBackend>>,
    sessions: Vec<Arc<FakeSession>>,
    connects: usize,
}

/// Connector handing out [`FakeSession`]s for registered backend ids.
#[derive(Debug, Default)]
pub struct FakeConnector {
    backends: Mutex<HashMap<String, BackendSlot>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_backend<S: Into<String>>(&self, id: S, backend: FakeBackend) {
        locked(&self.backends).insert(
            id.into(),
            BackendSlot {
                behaviour: Arc::new(Mutex::new(backend)),
                ..BackendSlot::default()
            },
        );
    }

    /// Changes a backend's behaviour; live sessions see the change too.
    pub fn update_backend<F>(&self, id: &str, update: F)
    where
        F: FnOnce(&mut FakeBackend),
    {
        let behaviour = locked(&self.backends)
            .get(id)
            .map(|slot| slot.behaviour.clone());
        if let Some(behaviour) = behaviour {
            update(&mut locked(&behaviour));
        }
    }

    pub fn connect_count(&self, id: &str) -> usize {
        locked(&self.backends).get(id).map_or(0, |slot| slot.connects)
    }

    pub fn latest_session(&self, id: &str) -> Option<Arc<FakeSession>> {
        locked(&self.backends)
            .get(id)
            .and_then(|slot| slot.sessions.last().cloned())
    }

    pub fn sessions(&self, id: &str) -> Vec<Arc<FakeSession>> {
        locked(&self.backends)
            .get(id)
            .map(|slot| slot.sessions.clone())
            .unwrap_or_default()
    }

    /// Kills the most recent session of `id` as if the backend crashed.
    pub fn terminate(&self, id: &str, reason: &str) {
        if let Some(session) = self.latest_session(id) {
            session.terminate(reason);
        }
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(
        &self,
        server_id: &str,
        _transport: &McpTransport,
    ) -> Result<Arc<dyn RemoteSession>, SessionError> {
        let mut backends = locked(&self.backends);
        let slot = backends
            .get_mut(server_id)
            .ok_or_else(|| SessionError::Transport(format!("no fake backend '{server_id}'")))?;
        slot.connects += 1;

        {
            let mut behaviour = locked(&slot.behaviour);
            if behaviour.connect_failures > 0 {
                behaviour.connect_failures -= 1;
                return Err(SessionError::Transport("connection refused".to_string()));
            }
        }

        let session = Arc::new(FakeSession::new(server_id, slot.behaviour.clone()));
        slot.sessions.push(session.clone());
        Ok(session)
    }
}

/// A session living entirely in memory.
#[derive(Debug)]
pub struct FakeSession {
    server_id: String,
    behaviour: Arc<Mutex<FakeBackend>>,
    lifecycle: watch::Sender<Lifecycle>,
    calls: Mutex<Vec<(String, Option<JsonObject>)>>,
    close_calls: AtomicUsize,
}

impl FakeSession {
    fn new(server_id: &str, behaviour: Arc<Mutex<FakeBackend>>) -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle::Running);
        Self {
            server_id: server_id.to_string(),
            behaviour,
            lifecycle,
            calls: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        }
    }

    pub fn terminate(&self, reason: &str) {
        self.lifecycle
            .send_replace(Lifecycle::Terminated(reason.to_string()));
    }

    pub fn is_running(&self) -> bool {
        *self.lifecycle.borrow() == Lifecycle::Running
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<(String, Option<JsonObject>)> {
        locked(&self.calls).clone()
    }

    fn behaviour(&self) -> FakeBackend {
        locked(&self.behaviour).clone()
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn list_tools(&self) -> Result<Vec<ToolSchema>, SessionError> {
        let behaviour = self.behaviour();
        if let Some(delay) = behaviour.discovery_delay {
            tokio::time::sleep(delay).await;
        }
        if behaviour.fail_discovery {
            return Err(SessionError::Request(format!(
                "{}: tools/list rejected",
                self.server_id
            )));
        }
        Ok(behaviour.tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<ToolResponse, SessionError> {
        locked(&self.calls).push((name.to_string(), arguments));

        let behaviour = self.behaviour();
        if let Some(delay) = behaviour.call_delay {
            tokio::time::sleep(delay).await;
        }
        if !self.is_running() {
            return Err(SessionError::Request("transport closed".to_string()));
        }
        if let Some(error) = behaviour.call_errors.get(name) {
            return Err(error.clone());
        }
        behaviour
            .responses
            .get(name)
            .cloned()
            .ok_or_else(|| SessionError::Request(format!("tool {name} not found")))
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.behaviour().hang_on_close {
            std::future::pending::<()>().await;
        }
        self.lifecycle.send_if_modified(|state| {
            if *state == Lifecycle::Running {
                *state = Lifecycle::Closed;
                true
            } else {
                false
            }
        });
        Ok(())
    }

    async fn wait_for_termination(&self) -> Result<(), SessionError> {
        let mut lifecycle = self.lifecycle.subscribe();
        let state = lifecycle
            .wait_for(|state| *state != Lifecycle::Running)
            .await
            .map(|state| state.clone())
            .unwrap_or(Lifecycle::Closed);
        match state {
            Lifecycle::Terminated(reason) => Err(SessionError::Terminated(reason)),
            Lifecycle::Running | Lifecycle::Closed => Ok(()),
        }
    }
}
