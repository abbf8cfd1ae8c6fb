use std::sync::Arc;

use conflux_core::{DispatchError, ToolCaller};
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::logs::{LogBuffer, LogEntry};

/// Everything a script can ask of the host.
pub trait HostBridge: Send + Sync {
    /// Calls `serverId.toolName`, blocking the interpreter thread until the
    /// call settles.
    fn invoke_tool(&self, name: &str, params: Option<Value>) -> Result<Value, DispatchError>;

    /// Records a log line. A full buffer silently drops it.
    fn log(&self, level: &str, message: &str, fields: Option<Map<String, Value>>);
}

/// The bridge backing one script execution.
pub struct ExecutionBridge {
    tools: Arc<dyn ToolCaller>,
    runtime: Handle,
    cancel: CancellationToken,
    logs: Arc<LogBuffer>,
}

impl ExecutionBridge {
    pub fn new(
        tools: Arc<dyn ToolCaller>,
        runtime: Handle,
        cancel: CancellationToken,
        logs: Arc<LogBuffer>,
    ) -> Self {
        Self {
            tools,
            runtime,
            cancel,
            logs,
        }
    }
}

impl HostBridge for ExecutionBridge {
    fn invoke_tool(&self, name: &str, params: Option<Value>) -> Result<Value, DispatchError> {
        if self.cancel.is_cancelled() {
            return Err(DispatchError::Cancelled(name.to_string()));
        }
        debug!(tool = %name, "Script invoking tool");
        self.runtime
            .block_on(self.tools.call_tool(name, params, &self.cancel))
    }

    fn log(&self, level: &str, message: &str, fields: Option<Map<String, Value>>) {
        if self.logs.is_full() {
            return;
        }
        self.logs.push(LogEntry::new(level, message, fields));
    }
}
