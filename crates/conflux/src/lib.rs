// Hub facade: configuration, startup policy and the built-in tools

pub mod builtins;
pub mod config;
pub mod error;
pub mod hub;
pub mod utils;

pub use builtins::{BuiltinResponse, EXECUTE, INSPECT, LIST, REFRESH_TOOLS};
pub use config::{HubConfig, HubSettings};
pub use error::{HubError, Result};
pub use hub::Hub;
