use conflux_core::ConnectionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("Invalid hub configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Invalid hub settings: {0}")]
    Settings(String),

    #[error("Required server '{server_id}' failed to start: {source}")]
    RequiredServer {
        server_id: String,
        #[source]
        source: ConnectionError,
    },

    #[error("Unknown built-in tool: {0}")]
    UnknownBuiltin(String),

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: &'static str, message: String },

    #[error("Failed to encode {tool} response: {message}")]
    Encode { tool: &'static str, message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl HubError {
    pub fn invalid_arguments<M: Into<String>>(tool: &'static str, message: M) -> Self {
        HubError::InvalidArguments {
            tool,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HubError>;
