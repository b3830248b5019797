pub mod store_port;

pub use store_port::{SettingsStore, SettingsStoreError};
