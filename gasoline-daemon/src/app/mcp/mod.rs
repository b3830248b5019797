pub mod errors;
pub mod params;
pub mod reproduction;
pub mod service;
pub mod tools;

pub use errors::{ToolError, ToolOutput};
pub use service::{McpBridgeError, McpBridgeService};
