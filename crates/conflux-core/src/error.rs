use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConnectionError>;

/// Failures reported by a [`crate::session::RemoteSession`] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Failed to start transport: {0}")]
    Transport(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Session terminated: {0}")]
    Terminated(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Unsupported transport for {server_id}: {transport} (supported: stdio, tcp, http)")]
    UnsupportedTransport {
        server_id: String,
        transport: String,
    },

    #[error("Invalid configuration for {server_id}: {message}")]
    InvalidConfig { server_id: String, message: String },

    #[error("Cannot connect to {server_id}: {message}")]
    ConnectFailed { server_id: String, message: String },

    #[error("Timeout connecting to {server_id}")]
    ConnectTimeout { server_id: String },

    #[error("Failed to list tools from {server_id}: {message}")]
    ListToolsFailed { server_id: String, message: String },

    #[error("Timeout listing tools from {server_id}")]
    ListToolsTimeout { server_id: String },

    #[error("Failed to disconnect from {server_id}: {message}")]
    CloseFailed { server_id: String, message: String },

    #[error("Timeout disconnecting from {server_id}")]
    CloseTimeout { server_id: String },

    #[error("Server not found: {0}")]
    NotFound(String),

    #[error("Server not connected: {0}")]
    NotConnected(String),

    #[error("Connection registry is shutting down")]
    ShuttingDown,

    #[error("Errors during disconnect: {}", join_errors(.0))]
    Disconnect(Vec<ConnectionError>),
}

impl ConnectionError {
    pub fn connect_failed<S: Into<String>, M: Into<String>>(server_id: S, message: M) -> Self {
        ConnectionError::ConnectFailed {
            server_id: server_id.into(),
            message: message.into(),
        }
    }

    pub fn invalid_config<S: Into<String>, M: Into<String>>(server_id: S, message: M) -> Self {
        ConnectionError::InvalidConfig {
            server_id: server_id.into(),
            message: message.into(),
        }
    }

    /// The backend the error is about, when it is about a single one.
    pub fn server_id(&self) -> Option<&str> {
        match self {
            ConnectionError::UnsupportedTransport { server_id, .. }
            | ConnectionError::InvalidConfig { server_id, .. }
            | ConnectionError::ConnectFailed { server_id, .. }
            | ConnectionError::ConnectTimeout { server_id }
            | ConnectionError::ListToolsFailed { server_id, .. }
            | ConnectionError::ListToolsTimeout { server_id }
            | ConnectionError::CloseFailed { server_id, .. }
            | ConnectionError::CloseTimeout { server_id } => Some(server_id),
            ConnectionError::NotFound(server_id) | ConnectionError::NotConnected(server_id) => {
                Some(server_id)
            }
            ConnectionError::ShuttingDown | ConnectionError::Disconnect(_) => None,
        }
    }
}

fn join_errors(errors: &[ConnectionError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors surfaced to callers of [`crate::dispatch::Dispatcher::call`].
///
/// Every message is safe to show inside the sandbox: remote failures are
/// sanitized before they are wrapped here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("{0}")]
    Validation(String),

    #[error("tool '{0}' is not authorized")]
    Unauthorized(String),

    #[error("server '{0}' not found - check server name or use 'list' to find available tools")]
    ServerUnavailable(String),

    #[error("tool '{tool}' failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("unsupported content type from '{0}'")]
    UnsupportedContent(String),

    #[error("tool '{0}' was cancelled")]
    Cancelled(String),
}

impl DispatchError {
    pub fn validation<M: Into<String>>(message: M) -> Self {
        DispatchError::Validation(message.into())
    }

    pub fn tool_failed<T: Into<String>, M: Into<String>>(tool: T, message: M) -> Self {
        DispatchError::ToolFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }
}
