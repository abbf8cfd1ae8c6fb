use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use conflux_core::ToolCaller;
use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Runtime, Value as JsValue};
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::bridge::{ExecutionBridge, HostBridge};
use crate::error::RuntimeError;
use crate::harden::harden;
use crate::host::{install_host_objects, to_json};
use crate::logs::{LogBuffer, LogEntry};
use crate::validate::validate_script;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub timeout: Duration,
    pub max_script_bytes: usize,
    pub memory_limit: usize,
    pub max_stack_bytes: usize,
    pub max_log_entries: usize,
    /// How long an interrupted interpreter gets to unwind before the call
    /// returns anyway.
    pub grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_script_bytes: 100 * 1024,
            memory_limit: 50 * 1024 * 1024,
            max_stack_bytes: 512 * 1024,
            max_log_entries: 1000,
            grace: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptOutcome {
    pub result: Value,
    pub logs: Vec<LogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RuntimeError>,
}

impl ScriptOutcome {
    fn completed(result: Value, logs: Vec<LogEntry>) -> Self {
        Self {
            result,
            logs,
            error: None,
        }
    }

    fn failed(error: RuntimeError, logs: Vec<LogEntry>) -> Self {
        Self {
            result: Value::Null,
            logs,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
enum Interruption {
    Deadline,
    Cancelled,
}

/// Runs orchestration scripts, one fresh interpreter per call.
#[derive(Clone)]
pub struct ScriptEngine {
    tools: Arc<dyn ToolCaller>,
    config: EngineConfig,
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ScriptEngine {
    pub fn new(tools: Arc<dyn ToolCaller>, config: EngineConfig) -> Self {
        Self { tools, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Executes `code`. Every failure is reported in the outcome, together
    /// with whatever the script logged before it stopped.
    pub async fn execute(&self, cancel: &CancellationToken, code: &str) -> ScriptOutcome {
        if let Err(e) = validate_script(code, self.config.max_script_bytes) {
            debug!(kind = e.kind.as_str(), "Script rejected before execution");
            return ScriptOutcome::failed(e, Vec::new());
        }
        if cancel.is_cancelled() {
            return ScriptOutcome::failed(
                RuntimeError::timeout("script execution cancelled"),
                Vec::new(),
            );
        }

        let logs = Arc::new(LogBuffer::new(self.config.max_log_entries));
        let interrupted = Arc::new(AtomicBool::new(false));
        let calls = cancel.child_token();
        let bridge: Arc<dyn HostBridge> = Arc::new(ExecutionBridge::new(
            self.tools.clone(),
            Handle::current(),
            calls.clone(),
            logs.clone(),
        ));

        let mut worker = tokio::task::spawn_blocking({
            let code = code.to_string();
            let config = self.config.clone();
            let interrupted = interrupted.clone();
            move || run_script(&code, &config, &bridge, &interrupted)
        });

        let reason = tokio::select! {
            joined = &mut worker => return finish(joined, &logs),
            () = tokio::time::sleep(self.config.timeout) => Interruption::Deadline,
            () = cancel.cancelled() => Interruption::Cancelled,
        };

        interrupted.store(true, Ordering::SeqCst);
        calls.cancel();
        warn!(reason = ?reason, "Interrupting script execution");

        if tokio::time::timeout(self.config.grace, &mut worker)
            .await
            .is_err()
        {
            warn!(grace = ?self.config.grace, "Interpreter did not stop within grace period");
        }

        let error = match reason {
            Interruption::Deadline => RuntimeError::timeout(format!(
                "script execution exceeded timeout of {:?}",
                self.config.timeout
            )),
            Interruption::Cancelled => RuntimeError::timeout("script execution cancelled"),
        };
        ScriptOutcome::failed(error, logs.snapshot())
    }
}

fn finish(joined: Result<Result<Value, RuntimeError>, JoinError>, logs: &LogBuffer) -> ScriptOutcome {
    match joined {
        Ok(Ok(result)) => ScriptOutcome::completed(result, logs.snapshot()),
        Ok(Err(e)) => ScriptOutcome::failed(e, logs.snapshot()),
        Err(e) => {
            error!(error = %e, "Script worker failed");
            ScriptOutcome::failed(
                RuntimeError::runtime("script execution failed unexpectedly"),
                logs.snapshot(),
            )
        }
    }
}

/// Body of the blocking worker: prepare, harden, evaluate, export.
fn run_script(
    code: &str,
    config: &EngineConfig,
    bridge: &Arc<dyn HostBridge>,
    interrupted: &Arc<AtomicBool>,
) -> Result<Value, RuntimeError> {
    let runtime = Runtime::new()
        .map_err(|e| RuntimeError::runtime(format!("failed to create interpreter: {e}")))?;
    runtime.set_memory_limit(config.memory_limit);
    runtime.set_max_stack_size(config.max_stack_bytes);
    let flag = interrupted.clone();
    runtime.set_interrupt_handler(Some(Box::new(move || flag.load(Ordering::Relaxed))));

    let context = Context::full(&runtime)
        .map_err(|e| RuntimeError::runtime(format!("failed to create interpreter context: {e}")))?;

    context.with(|ctx| {
        install_host_objects(&ctx, bridge)
            .and_then(|()| harden(&ctx))
            .map_err(|e| RuntimeError::runtime(format!("failed to prepare sandbox: {e}")))?;

        match ctx.eval::<JsValue, _>(code).catch(&ctx) {
            Ok(value) => Ok(export_result(&ctx, value)),
            Err(caught) if interrupted.load(Ordering::SeqCst) => {
                debug!(error = %caught, "Script stopped by interrupt");
                Err(RuntimeError::timeout("script execution interrupted"))
            }
            Err(caught) => Err(classify(caught)),
        }
    })
}

/// The completion value as JSON; anything JSON cannot carry is `null`.
fn export_result<'js>(ctx: &Ctx<'js>, value: JsValue<'js>) -> Value {
    match to_json(ctx, value) {
        Ok(Some(json)) => json,
        Ok(None) => Value::Null,
        Err(e) => {
            debug!(error = %e, "Script result is not serializable");
            Value::Null
        }
    }
}

fn classify(caught: CaughtError<'_>) -> RuntimeError {
    match caught {
        CaughtError::Exception(exception) => {
            let name = exception
                .as_object()
                .get::<_, Option<String>>("name")
                .ok()
                .flatten()
                .unwrap_or_else(|| "Error".to_string());
            let message = exception.message().unwrap_or_default();
            let text = if message.is_empty() {
                name.clone()
            } else {
                format!("{name}: {message}")
            };
            if name == "SyntaxError" {
                RuntimeError::syntax(text)
            } else {
                RuntimeError::runtime(text)
            }
        }
        CaughtError::Value(value) => {
            let text = value
                .get::<rquickjs::convert::Coerced<String>>()
                .map(|coerced| coerced.0)
                .unwrap_or_else(|_| "non-error value".to_string());
            RuntimeError::runtime(format!("Uncaught {text}"))
        }
        CaughtError::Error(e) => RuntimeError::runtime(e.to_string()),
    }
}
