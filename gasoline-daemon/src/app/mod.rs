pub mod capture;
pub mod mcp;
pub mod settings;
