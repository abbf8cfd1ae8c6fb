// Connection management and tool dispatch for the Conflux hub

pub mod config;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{McpTransport, RegistrySettings, ServerConfig};
pub use dispatch::{AllowList, Dispatcher, DispatcherConfig, ToolCaller};
pub use error::{ConnectionError, DispatchError, Result, SessionError};
pub use registry::{ConnectionStatus, Registry};
pub use session::{
    ContentItem, JsonObject, RemoteSession, RmcpConnector, SessionConnector, ToolResponse,
    ToolSchema,
};
